//! Bounded retry around a caller-supplied fetch.
//!
//! A fixed number of retries with a fixed delay between attempts. There is
//! no backoff and no jitter.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::types::{BoxError, FetchError};

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Retry policy for upstream fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Fixed delay between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Create a policy.
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Single attempt, no retries.
    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Total number of attempts the policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Run `op` until it succeeds or the attempt budget is exhausted.
    ///
    /// On exhaustion the returned [`FetchError`] carries the last error.
    pub async fn run<F, Fut, T, E>(&self, key: &str, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 1;
        loop {
            let last_error: BoxError = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(key, attempt, "Fetch succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e.into(),
            };

            if attempt >= max_attempts {
                warn!(
                    key,
                    attempts = attempt,
                    error = %last_error,
                    "Fetch failed, retries exhausted"
                );
                return Err(FetchError::new(key, attempt, last_error));
            }

            debug!(
                key,
                attempt,
                max_attempts,
                delay_ms = self.delay.as_millis() as u64,
                error = %last_error,
                "Fetch attempt failed, retrying"
            );
            tokio::time::sleep(self.delay).await;
            attempt += 1;
        }
    }
}
