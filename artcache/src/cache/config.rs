//! Configuration types for the cache system.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::memory::CostFn;
use crate::cache::retry::RetryPolicy;
use crate::cache::types::CacheError;
use crate::time::{SharedClock, SystemClock};

/// Default memory tier budget: 256 MB.
pub const DEFAULT_MEMORY_BUDGET: usize = 256 * 1024 * 1024;

/// Default memory tier entry limit.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Default disk budget per category: 1 GB.
pub const DEFAULT_DISK_BUDGET: u64 = 1024 * 1024 * 1024;

/// Default interval between expiration sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Default number of concurrent fetches during prefetch.
pub const DEFAULT_PREFETCH_CONCURRENCY: usize = 8;

/// Memory tier configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryCacheConfig {
    /// Maximum total cost (bytes) held in memory
    pub max_size_bytes: usize,
    /// Maximum number of entries held in memory
    pub max_entries: usize,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MEMORY_BUDGET,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

/// Disk tier configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskCacheConfig {
    /// Cache root; each category gets a subdirectory
    pub cache_dir: PathBuf,
    /// Byte budget for this category
    pub max_size_bytes: u64,
    /// Interval between expiration sweeps
    pub sweep_interval: Duration,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("artcache");

        Self {
            cache_dir,
            max_size_bytes: DEFAULT_DISK_BUDGET,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Complete cache system configuration for one category.
#[derive(Clone)]
pub struct CacheConfig {
    /// Category name, used as the disk subdirectory
    pub category: String,
    /// Memory tier configuration
    pub memory: MemoryCacheConfig,
    /// Disk tier configuration
    pub disk: DiskCacheConfig,
    /// Retry policy for upstream fetches
    pub retry: RetryPolicy,
    /// Maximum concurrent fetches during prefetch
    pub prefetch_concurrency: usize,
    /// Time source for expiration
    pub clock: SharedClock,
    /// Memory tier weigher; payload length when unset
    pub cost_fn: Option<CostFn>,
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("category", &self.category)
            .field("memory", &self.memory)
            .field("disk", &self.disk)
            .field("retry", &self.retry)
            .field("prefetch_concurrency", &self.prefetch_concurrency)
            .field("clock", &self.clock)
            .field("custom_cost_fn", &self.cost_fn.is_some())
            .finish()
    }
}

impl CacheConfig {
    /// Create a configuration for a category with default budgets.
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            memory: MemoryCacheConfig::default(),
            disk: DiskCacheConfig::default(),
            retry: RetryPolicy::default(),
            prefetch_concurrency: DEFAULT_PREFETCH_CONCURRENCY,
            clock: Arc::new(SystemClock),
            cost_fn: None,
        }
    }

    /// Set the memory tier cost budget in bytes.
    pub fn with_memory_budget(mut self, size: usize) -> Self {
        self.memory.max_size_bytes = size;
        self
    }

    /// Set the memory tier entry limit.
    pub fn with_max_entries(mut self, entries: usize) -> Self {
        self.memory.max_entries = entries;
        self
    }

    /// Set the disk budget in bytes.
    pub fn with_disk_budget(mut self, size: u64) -> Self {
        self.disk.max_size_bytes = size;
        self
    }

    /// Set the cache root directory.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.disk.cache_dir = dir.into();
        self
    }

    /// Set the interval between expiration sweeps.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.disk.sweep_interval = interval;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set prefetch concurrency.
    pub fn with_prefetch_concurrency(mut self, concurrency: usize) -> Self {
        self.prefetch_concurrency = concurrency;
        self
    }

    /// Set the time source.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Weigh memory entries with `cost_fn` instead of payload length.
    pub fn with_cost_fn(mut self, cost_fn: CostFn) -> Self {
        self.cost_fn = Some(cost_fn);
        self
    }

    /// Check the configuration for values the cache cannot work with.
    pub fn validate(&self) -> Result<(), CacheError> {
        let category = self.category.as_str();
        if category.is_empty()
            || category == "."
            || category == ".."
            || category.contains(['/', '\\'])
        {
            return Err(CacheError::InvalidConfig(format!(
                "category '{}' must be a single directory name",
                category
            )));
        }
        if self.disk.sweep_interval.is_zero() {
            return Err(CacheError::InvalidConfig(
                "sweep interval must be greater than zero".to_string(),
            ));
        }
        if self.prefetch_concurrency == 0 {
            return Err(CacheError::InvalidConfig(
                "prefetch concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
