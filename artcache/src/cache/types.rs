//! Core types for the cache system.

use bytes::Bytes;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;

use crate::cache::codec::CodecError;

/// A storage layer of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Bounded in-process tier
    Memory,
    /// Persistent directory-backed tier
    Disk,
}

/// Set of tiers an operation applies to.
///
/// Reads always consult memory before disk, regardless of how the set was
/// built.
///
/// # Example
///
/// ```
/// use artcache::cache::{Tier, TierSet};
///
/// let tiers = TierSet::ALL;
/// assert!(tiers.contains(Tier::Memory));
/// assert!(tiers.contains(Tier::Disk));
/// assert!(!TierSet::MEMORY.contains(Tier::Disk));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TierSet(u8);

impl TierSet {
    const MEMORY_BIT: u8 = 0b01;
    const DISK_BIT: u8 = 0b10;

    /// No tiers.
    pub const NONE: TierSet = TierSet(0);
    /// Memory tier only.
    pub const MEMORY: TierSet = TierSet(Self::MEMORY_BIT);
    /// Disk tier only.
    pub const DISK: TierSet = TierSet(Self::DISK_BIT);
    /// Memory and disk.
    pub const ALL: TierSet = TierSet(Self::MEMORY_BIT | Self::DISK_BIT);

    fn bit(tier: Tier) -> u8 {
        match tier {
            Tier::Memory => Self::MEMORY_BIT,
            Tier::Disk => Self::DISK_BIT,
        }
    }

    /// Check whether the set includes a tier.
    pub fn contains(self, tier: Tier) -> bool {
        self.0 & Self::bit(tier) != 0
    }

    /// Return a copy of the set with `tier` added.
    pub fn with(self, tier: Tier) -> Self {
        Self(self.0 | Self::bit(tier))
    }

    /// True if no tier is selected.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl Default for TierSet {
    fn default() -> Self {
        Self::ALL
    }
}

impl From<Tier> for TierSet {
    fn from(tier: Tier) -> Self {
        Self::NONE.with(tier)
    }
}

impl fmt::Debug for TierSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        if self.contains(Tier::Memory) {
            set.entry(&Tier::Memory);
        }
        if self.contains(Tier::Disk) {
            set.entry(&Tier::Disk);
        }
        set.finish()
    }
}

/// One cached value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Sanitized key token
    pub key: String,
    /// Opaque payload
    pub payload: Bytes,
    /// Absolute time after which the entry is invalid
    pub expires_at: SystemTime,
    /// Weight charged against the memory budget
    pub cost: usize,
}

impl CacheEntry {
    /// Create an entry whose cost is the payload length.
    pub fn new(key: impl Into<String>, payload: Bytes, expires_at: SystemTime) -> Self {
        let cost = payload.len();
        Self {
            key: key.into(),
            payload,
            expires_at,
            cost,
        }
    }

    /// True once `now` has reached the expiration time.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }
}

/// Boxed error produced by a caller-supplied fetch.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Upstream fetch failure after the retry budget was exhausted.
///
/// Cheap to clone: every waiter coalesced onto the same fetch receives a copy.
#[derive(Debug, Clone, Error)]
#[error("fetch for '{key}' failed after {attempts} attempt(s): {source}")]
pub struct FetchError {
    /// Logical key that was being fetched
    pub key: String,
    /// Number of attempts made
    pub attempts: u32,
    /// Last underlying error
    #[source]
    pub source: Arc<dyn StdError + Send + Sync + 'static>,
}

impl FetchError {
    /// Build a fetch error from the last underlying failure.
    pub fn new(key: impl Into<String>, attempts: u32, source: BoxError) -> Self {
        Self {
            key: key.into(),
            attempts,
            source: Arc::from(source),
        }
    }
}

/// Cache-related errors.
///
/// Only [`CacheError::FetchFailed`] is produced by the read paths; disk
/// failures degrade to misses internally.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The caller-supplied fetch failed on every attempt
    #[error(transparent)]
    FetchFailed(#[from] FetchError),

    /// A freshly fetched value could not be encoded or decoded
    #[error("Cache codec error: {0}")]
    DecodeFailed(#[from] CodecError),

    /// I/O error while preparing the cache directory
    #[error("Cache I/O error: {0}")]
    DiskIo(#[from] std::io::Error),

    /// Invalid cache configuration
    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),
}
