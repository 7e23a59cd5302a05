//! Tiered artifact cache.
//!
//! A bounded in-memory tier sits in front of a persistent, per-category disk
//! tier. Misses go through a single-flight coalescer and a bounded retry
//! policy before reaching the caller-supplied fetch.
//!
//! Most callers only need [`CacheSystem`], [`CacheConfig`] and [`TierSet`].

mod coalesce;
mod codec;
mod config;
mod daemon;
mod disk;
mod disk_eviction;
mod key;
mod memory;
mod retry;
mod stats;
mod system;
mod types;

pub use coalesce::{CoalescedResult, CoalescerStats, FetchCoalescer};
pub use codec::{Codec, CodecError, JsonCodec, RawCodec};
pub use config::{
    CacheConfig, DiskCacheConfig, MemoryCacheConfig, DEFAULT_DISK_BUDGET, DEFAULT_MAX_ENTRIES,
    DEFAULT_MEMORY_BUDGET, DEFAULT_PREFETCH_CONCURRENCY, DEFAULT_SWEEP_INTERVAL,
};
pub use daemon::{run_eviction_daemon, EvictionDaemon, MaintenanceContext, MaintenanceReport};
pub use disk::{DiskCache, DiskHit, DiskLookup, Sidecar, META_EXTENSION};
pub use disk_eviction::{
    clear_disk_cache, disk_cache_stats, evict_to_budget, list_categories, scan_dir,
    sweep_expired, CategoryUsage, DiskUsage, EvictionResult,
};
pub use key::{is_data_token, sanitize_key, MAX_TOKEN_LEN};
pub use memory::{CostFn, MemoryCache, MemoryLookup};
pub use retry::{RetryPolicy, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY};
pub use stats::{CacheStats, StatsCounter};
pub use system::{CacheSystem, PrefetchSummary};
pub use types::{BoxError, CacheEntry, CacheError, FetchError, Tier, TierSet};
