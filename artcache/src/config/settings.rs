//! Settings structs for each configuration section.
//!
//! Pure data types; parsing lives in [`super::parser`] and serialization in
//! [`super::writer`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::{
    DiskCacheConfig, DEFAULT_DISK_BUDGET, DEFAULT_MAX_ENTRIES, DEFAULT_MAX_RETRIES,
    DEFAULT_MEMORY_BUDGET, DEFAULT_PREFETCH_CONCURRENCY, DEFAULT_RETRY_DELAY,
    DEFAULT_SWEEP_INTERVAL,
};

/// Complete configuration loaded from config.ini.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    /// `[cache]` section
    pub cache: CacheSettings,
    /// `[retry]` section
    pub retry: RetrySettings,
    /// `[category.<name>]` sections keyed by category name
    pub categories: BTreeMap<String, CategorySettings>,
}

/// Defaults shared by every category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Cache root directory
    pub directory: PathBuf,
    /// Memory tier budget in bytes
    pub memory_size: usize,
    /// Memory tier entry limit
    pub memory_entries: usize,
    /// Per-category disk budget in bytes
    pub disk_size: u64,
    /// Seconds between expiration sweeps
    pub sweep_interval_secs: u64,
    /// Concurrent fetches during prefetch
    pub prefetch_concurrency: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            directory: DiskCacheConfig::default().cache_dir,
            memory_size: DEFAULT_MEMORY_BUDGET,
            memory_entries: DEFAULT_MAX_ENTRIES,
            disk_size: DEFAULT_DISK_BUDGET,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL.as_secs(),
            prefetch_concurrency: DEFAULT_PREFETCH_CONCURRENCY,
        }
    }
}

/// Fetch retry behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySettings {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Fixed delay between attempts, in milliseconds
    pub delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay_ms: DEFAULT_RETRY_DELAY.as_millis() as u64,
        }
    }
}

impl RetrySettings {
    /// Delay between attempts.
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Per-category overrides. Unset fields fall back to `[cache]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategorySettings {
    /// Memory tier cost budget in bytes
    pub memory_size: Option<usize>,
    /// Memory tier entry limit
    pub memory_entries: Option<usize>,
    /// Disk budget for this category in bytes
    pub disk_size: Option<u64>,
}
