//! Time-related utilities for the cache.
//!
//! Expiration is tracked as wall-clock time so that TTLs survive process
//! restarts via the on-disk sidecar. All cache components read "now" through
//! the [`Clock`] trait, which lets tests simulate the passage of hours or days
//! without sleeping.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time.
    fn now(&self) -> SystemTime;
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Clock backed by [`SystemTime::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Manually advanced clock for tests and simulations.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use artcache::time::{Clock, ManualClock};
///
/// let clock = ManualClock::new();
/// let before = clock.now();
/// clock.advance(Duration::from_secs(3600));
/// assert_eq!(clock.now().duration_since(before).unwrap(), Duration::from_secs(3600));
/// ```
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    /// Create a clock starting at the current system time.
    pub fn new() -> Self {
        Self::starting_at(SystemTime::now())
    }

    /// Create a clock starting at the given time.
    pub fn starting_at(start: SystemTime) -> Self {
        Self {
            millis: AtomicU64::new(to_unix_millis(start)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        from_unix_millis(self.millis.load(Ordering::SeqCst))
    }
}

/// Latest expiration a sidecar records, in milliseconds since the epoch.
pub const MAX_EXPIRY_MILLIS: u64 = u64::MAX / 2;

/// Convert a `SystemTime` to milliseconds since the unix epoch.
///
/// Times before the epoch clamp to zero; times past `u64::MAX` milliseconds
/// clamp to `u64::MAX`.
pub fn to_unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Convert milliseconds since the unix epoch back to a `SystemTime`.
pub fn from_unix_millis(millis: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis)
}

/// Compute an absolute expiration time.
///
/// Saturates at [`MAX_EXPIRY_MILLIS`], so memory and disk record the same
/// instant for very long TTLs.
pub fn expires_after(now: SystemTime, ttl: Duration) -> SystemTime {
    let latest = from_unix_millis(MAX_EXPIRY_MILLIS);
    match now.checked_add(ttl) {
        Some(at) if at < latest => at,
        _ => latest,
    }
}
