//! Fetch coalescing (single-flight).
//!
//! When several callers miss the cache for the same key at the same time,
//! only one upstream fetch runs. Every other caller subscribes to its result.
//!
//! ```text
//! get_or_fetch(k) A ─┐
//!                    │                           caller-supplied
//! get_or_fetch(k) B ─┼──► FetchCoalescer ──────► fetch (1 task)
//!                    │         │                      │
//! get_or_fetch(k) C ─┘         ▼                      ▼
//!                     [A, B, C receive the    ◄───────┘
//!                      same result]
//! ```
//!
//! The fetch runs in its own spawned task, so dropping any waiter (including
//! the one that started the fetch) only detaches that waiter. The in-flight
//! record is removed before the result is broadcast; a request arriving
//! after that starts a fresh fetch.

use bytes::Bytes;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

use crate::cache::types::FetchError;

/// Outcome shared by every waiter of one fetch.
pub type CoalescedResult = Result<Bytes, FetchError>;

/// Statistics for monitoring coalescing effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoalescerStats {
    /// Total requests received
    pub total_requests: u64,
    /// Requests that joined an in-flight fetch
    pub coalesced_requests: u64,
    /// Requests that started a new fetch
    pub new_requests: u64,
}

impl CoalescerStats {
    /// Returns the coalescing ratio (0.0 to 1.0)
    pub fn coalescing_ratio(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.coalesced_requests as f64 / self.total_requests as f64
        }
    }
}

/// Registration outcome.
pub(crate) enum CoalesceResult {
    /// First request for the key; the caller must start the fetch and
    /// eventually call [`FetchCoalescer::complete`].
    NewRequest(broadcast::Receiver<CoalescedResult>),
    /// A fetch is already in flight; wait on the receiver.
    Coalesced(broadcast::Receiver<CoalescedResult>),
}

/// Tracks in-flight fetches by key.
pub struct FetchCoalescer {
    /// In-flight fetches: key -> broadcast sender for the result
    in_flight: Mutex<HashMap<String, broadcast::Sender<CoalescedResult>>>,
    stats: Mutex<CoalescerStats>,
}

impl FetchCoalescer {
    /// Creates a new coalescer.
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
            stats: Mutex::new(CoalescerStats::default()),
        }
    }

    /// Registers interest in `key`.
    pub(crate) async fn register(&self, key: &str) -> CoalesceResult {
        let mut in_flight = self.in_flight.lock().await;
        let mut stats = self.stats.lock().await;

        stats.total_requests += 1;

        if let Some(tx) = in_flight.get(key) {
            stats.coalesced_requests += 1;
            debug!(key, "Coalescing request - waiting for in-flight fetch");
            CoalesceResult::Coalesced(tx.subscribe())
        } else {
            // A single result is ever sent per channel
            let (tx, rx) = broadcast::channel(1);
            in_flight.insert(key.to_string(), tx);
            stats.new_requests += 1;
            debug!(
                key,
                in_flight_count = in_flight.len(),
                "New request - starting fetch"
            );
            CoalesceResult::NewRequest(rx)
        }
    }

    /// Removes the in-flight record for `key` and delivers `result` to all
    /// waiters.
    pub(crate) async fn complete(&self, key: &str, result: CoalescedResult) {
        let tx = self.in_flight.lock().await.remove(key);

        if let Some(tx) = tx {
            let waiters = tx.receiver_count();
            // Receivers may all have been dropped
            let _ = tx.send(result);
            debug!(key, waiters, "Broadcast fetch result");
        }
    }

    /// Runs `fetch` for `key` unless a fetch is already in flight, and
    /// returns the shared outcome.
    ///
    /// `fetch` is only invoked (and its future only spawned) by the request
    /// that starts the fetch. It should perform any cache population itself
    /// so that the cache is filled even if every waiter goes away.
    pub async fn run<F, Fut>(self: &Arc<Self>, key: &str, fetch: F) -> CoalescedResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoalescedResult> + Send + 'static,
    {
        let rx = match self.register(key).await {
            CoalesceResult::Coalesced(rx) => rx,
            CoalesceResult::NewRequest(rx) => {
                let fut = fetch();
                let this = Arc::clone(self);
                let key = key.to_string();
                tokio::spawn(async move {
                    let result = AssertUnwindSafe(fut)
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| {
                            Err(FetchError::new(key.clone(), 0, "fetch task panicked".into()))
                        });
                    this.complete(&key, result).await;
                });
                rx
            }
        };

        Self::wait(key, rx).await
    }

    async fn wait(key: &str, mut rx: broadcast::Receiver<CoalescedResult>) -> CoalescedResult {
        match rx.recv().await {
            Ok(result) => result,
            Err(e) => Err(FetchError::new(
                key,
                0,
                format!("fetch task ended without a result: {}", e).into(),
            )),
        }
    }

    /// Returns a snapshot of the current statistics.
    pub async fn stats(&self) -> CoalescerStats {
        *self.stats.lock().await
    }

    /// Returns the number of currently in-flight fetches.
    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// Logs current statistics.
    pub async fn log_stats(&self) {
        let stats = self.stats().await;
        let in_flight = self.in_flight_count().await;

        info!(
            total_requests = stats.total_requests,
            coalesced = stats.coalesced_requests,
            new_requests = stats.new_requests,
            in_flight,
            coalescing_ratio = format!("{:.1}%", stats.coalescing_ratio() * 100.0),
            "Fetch coalescing statistics"
        );
    }
}

impl Default for FetchCoalescer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FetchCoalescer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCoalescer").finish_non_exhaustive()
    }
}
