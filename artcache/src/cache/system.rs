//! Cache facade.
//!
//! [`CacheSystem`] composes the memory tier, one disk category, the fetch
//! coalescer, the retry policy and the statistics counter behind a small
//! key/bytes API:
//!
//! ```text
//! get_or_fetch(key)
//!   ├─► memory tier ── hit ─────────────────────────────► bytes
//!   ├─► disk tier ──── hit ─► promote to memory ────────► bytes
//!   └─► coalescer ─► retry(fetch) ─► put(memory, disk) ─► bytes
//! ```
//!
//! The facade is cheap to clone; clones share the same tiers. It is meant
//! to be created once by the application and handed to whatever needs it.
//!
//! Disk failures never reach callers. They are logged, counted, and turn
//! into misses (reads) or no-ops (writes).

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::codec::Codec;
use crate::cache::coalesce::FetchCoalescer;
use crate::cache::config::CacheConfig;
use crate::cache::daemon::{EvictionDaemon, MaintenanceContext, MaintenanceReport};
use crate::cache::disk::{DiskCache, DiskLookup};
use crate::cache::disk_eviction::EvictionResult;
use crate::cache::key::sanitize_key;
use crate::cache::memory::{MemoryCache, MemoryLookup};
use crate::cache::stats::{CacheStats, StatsCounter};
use crate::cache::types::{BoxError, CacheError, FetchError, Tier, TierSet};
use crate::time::{expires_after, SharedClock};

/// Outcome of a bulk prefetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefetchSummary {
    /// Keys submitted
    pub requested: usize,
    /// Keys that were already cached
    pub already_cached: usize,
    /// Keys fetched and stored
    pub fetched: usize,
    /// Keys whose fetch failed
    pub failed: usize,
    /// Keys skipped or abandoned because the prefetch was cancelled
    pub cancelled: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PrefetchOutcome {
    Cached,
    Fetched,
    Failed,
    Cancelled,
}

struct Inner {
    config: CacheConfig,
    memory: Arc<MemoryCache>,
    disk: DiskCache,
    coalescer: Arc<FetchCoalescer>,
    stats: Arc<StatsCounter>,
    clock: SharedClock,
    maintenance: MaintenanceContext,
    daemon: Option<EvictionDaemon>,
}

/// Two-tier cache for one category.
#[derive(Clone)]
pub struct CacheSystem {
    inner: Arc<Inner>,
}

impl CacheSystem {
    /// Build the cache and spawn its eviction daemon on the current runtime.
    pub async fn start(config: CacheConfig) -> Result<Self, CacheError> {
        Self::build(config, true).await
    }

    /// Build the cache without a background daemon.
    ///
    /// Expired entries are still never served; maintenance runs only when
    /// [`prune_expired`](Self::prune_expired) or
    /// [`enforce_disk_budget`](Self::enforce_disk_budget) are called.
    pub async fn open(config: CacheConfig) -> Result<Self, CacheError> {
        Self::build(config, false).await
    }

    async fn build(config: CacheConfig, with_daemon: bool) -> Result<Self, CacheError> {
        config.validate()?;

        let disk = DiskCache::new(
            config.disk.cache_dir.clone(),
            config.category.clone(),
            config.disk.max_size_bytes,
        );
        disk.ensure_dir().await?;

        let mut memory = MemoryCache::new(config.memory.max_size_bytes, config.memory.max_entries);
        if let Some(cost_fn) = &config.cost_fn {
            memory = memory.with_cost_fn(Arc::clone(cost_fn));
        }
        let memory = Arc::new(memory);
        let stats = Arc::new(StatsCounter::new());
        let clock = Arc::clone(&config.clock);

        let maintenance = MaintenanceContext {
            disk: disk.clone(),
            memory: Arc::clone(&memory),
            stats: Arc::clone(&stats),
            clock: Arc::clone(&clock),
        };
        let daemon = with_daemon
            .then(|| EvictionDaemon::start(maintenance.clone(), config.disk.sweep_interval));

        info!(
            category = %config.category,
            dir = %disk.dir().display(),
            memory_budget = config.memory.max_size_bytes,
            max_entries = config.memory.max_entries,
            disk_budget = config.disk.max_size_bytes,
            "Cache system ready"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                memory,
                disk,
                coalescer: Arc::new(FetchCoalescer::new()),
                stats,
                clock,
                maintenance,
                daemon,
            }),
        })
    }

    /// Category served by this cache.
    pub fn category(&self) -> &str {
        &self.inner.config.category
    }

    /// Configuration the cache was built with.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Memory tier.
    pub fn memory(&self) -> &MemoryCache {
        &self.inner.memory
    }

    /// Disk tier.
    pub fn disk(&self) -> &DiskCache {
        &self.inner.disk
    }

    /// Look up a key, memory first.
    ///
    /// A disk hit is promoted into memory when `tiers` includes memory,
    /// keeping the expiration recorded on disk.
    pub async fn get(&self, key: &str, tiers: TierSet) -> Option<Bytes> {
        let token = sanitize_key(key);
        if let Some(value) = self.lookup(key, &token, tiers).await {
            return Some(value);
        }

        self.inner.stats.record_miss();
        debug!(key, ?tiers, "Cache miss");
        None
    }

    /// Memory then disk lookup. Hits are counted; misses are left to the caller.
    async fn lookup(&self, key: &str, token: &str, tiers: TierSet) -> Option<Bytes> {
        let now = self.inner.clock.now();

        if tiers.contains(Tier::Memory) {
            if let MemoryLookup::Hit(entry) = self.inner.memory.get(token, now) {
                self.inner.stats.record_memory_hit();
                debug!(key, "Memory cache hit");
                return Some(entry.payload);
            }
        }

        if tiers.contains(Tier::Disk) {
            match self.inner.disk.read(token, now).await {
                Ok(DiskLookup::Hit(hit)) => {
                    self.inner.stats.record_disk_hit();
                    debug!(key, "Disk cache hit");
                    if tiers.contains(Tier::Memory) {
                        self.put_memory(token, hit.payload.clone(), hit.expires_at);
                    }
                    return Some(hit.payload);
                }
                Ok(DiskLookup::Expired) => {
                    self.inner.stats.record_disk_eviction(1);
                }
                Ok(DiskLookup::Miss) => {}
                Err(e) => {
                    self.inner.stats.record_disk_read_failure();
                    debug!(key, error = %e, "Disk cache read failed, treating as miss");
                }
            }
        }

        None
    }

    /// Store a value in the selected tiers, replacing any previous value.
    ///
    /// A tier left out of `tiers` has its copy of the key dropped so the
    /// tiers never disagree.
    pub async fn put(&self, key: &str, value: impl Into<Bytes>, ttl: Duration, tiers: TierSet) {
        let token = sanitize_key(key);
        self.store(&token, value.into(), ttl, tiers).await;
    }

    async fn store(&self, token: &str, payload: Bytes, ttl: Duration, tiers: TierSet) {
        let expires_at = expires_after(self.inner.clock.now(), ttl);

        if tiers.contains(Tier::Memory) {
            self.put_memory(token, payload.clone(), expires_at);
        } else {
            self.inner.memory.remove(token);
        }

        if tiers.contains(Tier::Disk) {
            match self.inner.disk.write(token, &payload, expires_at).await {
                Ok(_) => self.inner.stats.record_disk_write(),
                Err(e) => {
                    self.inner.stats.record_disk_write_failure();
                    warn!(
                        token,
                        error = %e,
                        "Disk cache write failed, dropping previous disk entry"
                    );
                    if let Err(e) = self.inner.disk.remove(token).await {
                        debug!(token, error = %e, "Failed to drop stale disk entry");
                    }
                }
            }
        } else if let Err(e) = self.inner.disk.remove(token).await {
            debug!(token, error = %e, "Failed to drop stale disk entry");
        }
    }

    fn put_memory(&self, token: &str, payload: Bytes, expires_at: std::time::SystemTime) {
        let evicted = self.inner.memory.put(token, payload, expires_at);
        if evicted > 0 {
            self.inner.stats.record_memory_eviction(evicted as u64);
        }
    }

    /// Return the cached value, or fetch, store and return it.
    ///
    /// Concurrent calls for the same key share a single fetch. The fetch is
    /// retried according to the configured [`RetryPolicy`]; if every
    /// attempt fails, all waiters receive [`CacheError::FetchFailed`] and
    /// nothing is cached.
    ///
    /// Dropping the returned future detaches this caller only; the fetch
    /// keeps running and still populates the cache.
    ///
    /// [`RetryPolicy`]: crate::cache::RetryPolicy
    ///
    /// # Example
    ///
    /// ```no_run
    /// use std::time::Duration;
    /// use artcache::cache::{CacheConfig, CacheSystem, TierSet};
    ///
    /// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
    /// let cache = CacheSystem::start(CacheConfig::new("images")).await?;
    /// let poster = cache
    ///     .get_or_fetch("poster_7", Duration::from_secs(7 * 86_400), TierSet::ALL, || async {
    ///         Ok::<_, std::io::Error>(vec![0x89, b'P', b'N', b'G'])
    ///     })
    ///     .await?;
    /// assert_eq!(&poster[..4], b"\x89PNG");
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get_or_fetch<F, Fut, T, E>(
        &self,
        key: &str,
        ttl: Duration,
        tiers: TierSet,
        fetch: F,
    ) -> Result<Bytes, CacheError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Into<Bytes> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        if let Some(value) = self.get(key, tiers).await {
            return Ok(value);
        }

        let token = sanitize_key(key);
        let this = self.clone();
        let key_owned = key.to_string();
        let task_token = token.clone();

        let result = self
            .inner
            .coalescer
            .run(&token, move || async move {
                this.fetch_and_store(&key_owned, &task_token, ttl, tiers, fetch)
                    .await
            })
            .await;

        Ok(result?)
    }

    async fn fetch_and_store<F, Fut, T, E>(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
        tiers: TierSet,
        mut fetch: F,
    ) -> Result<Bytes, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Into<Bytes>,
        E: Into<BoxError>,
    {
        // An earlier leader may have stored the value after our caller's miss.
        if let Some(value) = self.lookup(key, token, tiers).await {
            debug!(key, "Value stored by a previous fetch, skipping upstream");
            return Ok(value);
        }

        match self.inner.config.retry.run(key, &mut fetch).await {
            Ok(value) => {
                let payload: Bytes = value.into();
                self.inner.stats.record_fetch(payload.len() as u64);
                self.store(token, payload.clone(), ttl, tiers).await;
                Ok(payload)
            }
            Err(e) => {
                self.inner.stats.record_fetch_failure();
                Err(e)
            }
        }
    }

    /// Look up and decode a typed value.
    ///
    /// A cached payload that fails to decode is removed from every tier and
    /// reported as a miss.
    pub async fn get_as<C: Codec>(&self, key: &str, tiers: TierSet, codec: &C) -> Option<C::Value> {
        let bytes = self.get(key, tiers).await?;
        match codec.decode(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                self.inner.stats.record_decode_failure();
                warn!(key, error = %e, "Cached entry could not be decoded, evicting");
                self.remove(key).await;
                None
            }
        }
    }

    /// Encode and store a typed value.
    pub async fn put_as<C: Codec>(
        &self,
        key: &str,
        value: &C::Value,
        ttl: Duration,
        tiers: TierSet,
        codec: &C,
    ) -> Result<(), CacheError> {
        let bytes = codec.encode(value)?;
        self.put(key, bytes, ttl, tiers).await;
        Ok(())
    }

    /// Typed [`get_or_fetch`](Self::get_or_fetch).
    ///
    /// The fetched value is encoded with `codec` before it is stored.
    pub async fn get_or_fetch_as<C, F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        tiers: TierSet,
        codec: C,
        mut fetch: F,
    ) -> Result<C::Value, CacheError>
    where
        C: Codec + Clone + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<C::Value, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        if let Some(value) = self.get_as(key, tiers, &codec).await {
            return Ok(value);
        }

        let encoder = codec.clone();
        let bytes = self
            .get_or_fetch(key, ttl, tiers, move || {
                let fut = fetch();
                let encoder = encoder.clone();
                async move {
                    let value = fut.await.map_err(Into::<BoxError>::into)?;
                    encoder.encode(&value).map_err(BoxError::from)
                }
            })
            .await?;

        Ok(codec.decode(&bytes)?)
    }

    /// Remove a key from every tier. Missing entries are not an error.
    pub async fn remove(&self, key: &str) {
        let token = sanitize_key(key);
        self.inner.memory.remove(&token);
        if let Err(e) = self.inner.disk.remove(&token).await {
            warn!(key, error = %e, "Failed to remove disk cache entry");
        }
    }

    /// Empty the selected tiers.
    pub async fn clear(&self, tiers: TierSet) {
        if tiers.contains(Tier::Memory) {
            self.inner.memory.clear();
        }
        if tiers.contains(Tier::Disk) {
            match self.inner.disk.clear().await {
                Ok(result) => info!(
                    category = %self.category(),
                    files_deleted = result.files_deleted,
                    bytes_freed = result.bytes_freed,
                    "Disk cache cleared"
                ),
                Err(e) => warn!(category = %self.category(), error = %e, "Failed to clear disk cache"),
            }
        }
    }

    /// Check whether a live entry exists in any tier.
    ///
    /// Does not touch recency, promote, or delete anything.
    pub async fn exists(&self, key: &str) -> bool {
        let token = sanitize_key(key);
        let now = self.inner.clock.now();
        if self.inner.memory.contains(&token, now) {
            return true;
        }
        match self.inner.disk.exists(&token, now).await {
            Ok(found) => found,
            Err(e) => {
                debug!(key, error = %e, "Disk existence check failed");
                false
            }
        }
    }

    async fn exists_in(&self, key: &str, tiers: TierSet) -> bool {
        let token = sanitize_key(key);
        let now = self.inner.clock.now();
        (tiers.contains(Tier::Memory) && self.inner.memory.contains(&token, now))
            || (tiers.contains(Tier::Disk)
                && self.inner.disk.exists(&token, now).await.unwrap_or(false))
    }

    /// Snapshot of occupancy and counters.
    pub async fn stats(&self) -> CacheStats {
        let mut stats = self.inner.stats.snapshot();
        stats.category = self.category().to_string();
        stats.memory_entries = self.inner.memory.entry_count();
        stats.memory_bytes = self.inner.memory.total_cost();
        stats.coalesced_fetches = self.inner.coalescer.stats().await.coalesced_requests;

        match self.inner.disk.size_of().await {
            Ok(usage) => {
                stats.disk_entries = usage.entries;
                stats.aggregate_disk_bytes = usage.bytes;
            }
            Err(e) => debug!(error = %e, "Failed to measure disk cache"),
        }
        stats
    }

    /// Delete expired disk entries now.
    pub async fn prune_expired(&self) -> EvictionResult {
        self.inner.maintenance.prune_expired().await
    }

    /// Evict oldest disk entries until the category fits its budget.
    pub async fn enforce_disk_budget(&self) -> EvictionResult {
        self.inner.maintenance.enforce_budget().await
    }

    /// Run one full maintenance cycle (sweep, then budget eviction).
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        self.inner.maintenance.run_cycle().await
    }

    /// Drop the whole memory tier in response to memory pressure.
    ///
    /// Synchronous; the disk tier is untouched.
    pub fn handle_memory_pressure(&self) {
        let entries = self.inner.memory.entry_count();
        let bytes = self.inner.memory.total_cost();
        self.inner.memory.clear();
        info!(
            category = %self.category(),
            entries,
            bytes,
            "Memory pressure: memory tier cleared"
        );
    }

    /// Warm the cache for a batch of keys.
    ///
    /// Up to `prefetch_concurrency` fetches run at once. Keys already cached
    /// in `tiers` are skipped. Cancelling `cancel` stops the batch: pending
    /// keys are skipped and in-progress waits are abandoned (their fetches
    /// still complete and populate the cache).
    pub async fn prefetch<F, Fut, T, E>(
        &self,
        keys: Vec<String>,
        ttl: Duration,
        tiers: TierSet,
        fetch: F,
        cancel: CancellationToken,
    ) -> PrefetchSummary
    where
        F: Fn(String) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Into<Bytes> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let requested = keys.len();
        let concurrency = self.inner.config.prefetch_concurrency;

        let system = self.clone();
        let outcomes: Vec<PrefetchOutcome> = stream::iter(keys)
            .map(move |key| {
                let this = system.clone();
                let fetch = fetch.clone();
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        return PrefetchOutcome::Cancelled;
                    }
                    if this.exists_in(&key, tiers).await {
                        return PrefetchOutcome::Cached;
                    }

                    let fetch_key = key.clone();
                    let request = this.get_or_fetch(&key, ttl, tiers, move || fetch(fetch_key.clone()));
                    tokio::select! {
                        _ = cancel.cancelled() => PrefetchOutcome::Cancelled,
                        result = request => match result {
                            Ok(_) => PrefetchOutcome::Fetched,
                            Err(e) => {
                                debug!(key = %key, error = %e, "Prefetch failed");
                                PrefetchOutcome::Failed
                            }
                        },
                    }
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let count = |o: PrefetchOutcome| outcomes.iter().filter(|&&x| x == o).count();
        let summary = PrefetchSummary {
            requested,
            already_cached: count(PrefetchOutcome::Cached),
            fetched: count(PrefetchOutcome::Fetched),
            failed: count(PrefetchOutcome::Failed),
            cancelled: count(PrefetchOutcome::Cancelled),
        };

        info!(
            category = %self.category(),
            requested = summary.requested,
            cached = summary.already_cached,
            fetched = summary.fetched,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "Prefetch complete"
        );
        summary
    }

    /// Stop the eviction daemon, if one is running, and log final fetch
    /// coalescing statistics.
    pub async fn shutdown(&self) {
        if let Some(daemon) = &self.inner.daemon {
            daemon.shutdown().await;
        }
        self.inner.coalescer.log_stats().await;
    }

    /// Whether a background daemon is running.
    pub fn has_daemon(&self) -> bool {
        self.inner.daemon.as_ref().is_some_and(|d| d.is_running())
    }
}

impl std::fmt::Debug for CacheSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheSystem")
            .field("category", &self.inner.config.category)
            .field("memory", &self.inner.memory)
            .field("disk", &self.inner.disk)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::codec::{JsonCodec, RawCodec};
    use crate::cache::retry::RetryPolicy;
    use crate::time::ManualClock;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(3600);

    async fn create_test_cache(temp_dir: &TempDir) -> (CacheSystem, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let config = CacheConfig::new("responses")
            .with_cache_dir(temp_dir.path())
            .with_memory_budget(1024 * 1024)
            .with_max_entries(100)
            .with_disk_budget(10 * 1024 * 1024)
            .with_retry(RetryPolicy::new(2, Duration::from_millis(10)))
            .with_clock(clock.clone());
        (CacheSystem::open(config).await.unwrap(), clock)
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Movie {
        title: String,
    }

    #[tokio::test]
    async fn test_open_creates_category_dir() {
        let temp_dir = TempDir::new().unwrap();
        let (cache, _) = create_test_cache(&temp_dir).await;

        assert!(temp_dir.path().join("responses").is_dir());
        assert_eq!(cache.category(), "responses");
        assert!(!cache.has_daemon());
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_config() {
        let result = CacheSystem::open(CacheConfig::new("../escape")).await;
        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let (cache, _) = create_test_cache(&temp_dir).await;

        cache.put("https://api/x?id=1", b"payload".to_vec(), HOUR, TierSet::ALL).await;

        let value = cache.get("https://api/x?id=1", TierSet::ALL).await;
        assert_eq!(value, Some(Bytes::from_static(b"payload")));
        assert_eq!(cache.stats().await.memory_hits, 1);
    }

    #[tokio::test]
    async fn test_get_miss_counts() {
        let temp_dir = TempDir::new().unwrap();
        let (cache, _) = create_test_cache(&temp_dir).await;

        assert_eq!(cache.get("nothing", TierSet::ALL).await, None);
        assert_eq!(cache.stats().await.miss_count, 1);
    }

    #[tokio::test]
    async fn test_disk_hit_promotes_to_memory() {
        let temp_dir = TempDir::new().unwrap();
        let (cache, _) = create_test_cache(&temp_dir).await;

        cache.put("k", b"v".to_vec(), HOUR, TierSet::DISK).await;
        assert_eq!(cache.memory().entry_count(), 0);

        assert!(cache.get("k", TierSet::ALL).await.is_some());
        assert_eq!(cache.memory().entry_count(), 1);

        cache.get("k", TierSet::ALL).await;
        let stats = cache.stats().await;
        assert_eq!(stats.disk_hits, 1);
        assert_eq!(stats.memory_hits, 1);
    }

    #[tokio::test]
    async fn test_disk_only_get_does_not_promote() {
        let temp_dir = TempDir::new().unwrap();
        let (cache, _) = create_test_cache(&temp_dir).await;

        cache.put("k", b"v".to_vec(), HOUR, TierSet::DISK).await;
        assert!(cache.get("k", TierSet::DISK).await.is_some());
        assert_eq!(cache.memory().entry_count(), 0);
    }

    #[tokio::test]
    async fn test_promoted_entry_keeps_disk_expiration() {
        let temp_dir = TempDir::new().unwrap();
        let (cache, clock) = create_test_cache(&temp_dir).await;

        cache.put("k", b"v".to_vec(), HOUR, TierSet::DISK).await;
        clock.advance(Duration::from_secs(1800));
        assert!(cache.get("k", TierSet::ALL).await.is_some());

        clock.advance(Duration::from_secs(1801));
        assert_eq!(cache.get("k", TierSet::MEMORY).await, None);
    }

    #[tokio::test]
    async fn test_memory_only_put_drops_stale_disk_copy() {
        let temp_dir = TempDir::new().unwrap();
        let (cache, _) = create_test_cache(&temp_dir).await;

        cache.put("k", b"old".to_vec(), HOUR, TierSet::ALL).await;
        cache.put("k", b"new".to_vec(), HOUR, TierSet::MEMORY).await;

        assert_eq!(cache.get("k", TierSet::DISK).await, None);
        assert_eq!(
            cache.get("k", TierSet::ALL).await,
            Some(Bytes::from_static(b"new"))
        );
    }

    #[tokio::test]
    async fn test_failed_overwrite_drops_stale_disk_entry() {
        let temp_dir = TempDir::new().unwrap();
        let (cache, _) = create_test_cache(&temp_dir).await;
        cache.put("k", b"old".to_vec(), HOUR, TierSet::ALL).await;

        // Occupy the next staging names with directories so the write fails
        let next = crate::cache::disk::TMP_COUNTER.load(Ordering::SeqCst);
        for n in next..next + 512 {
            std::fs::create_dir(cache.disk().dir().join(format!("k.{}.tmp", n))).unwrap();
        }

        cache.put("k", b"new".to_vec(), HOUR, TierSet::ALL).await;

        assert_eq!(cache.stats().await.disk_write_failures, 1);
        assert_eq!(cache.get("k", TierSet::DISK).await, None);
        assert!(!cache.disk().meta_path("k").exists());

        cache.handle_memory_pressure();
        assert_eq!(cache.get("k", TierSet::ALL).await, None);
    }

    #[tokio::test]
    async fn test_huge_ttl_keeps_tiers_in_agreement() {
        let temp_dir = TempDir::new().unwrap();
        let (cache, _) = create_test_cache(&temp_dir).await;
        let forever = Duration::from_secs(u64::MAX / 1000);

        cache.put("forever", b"v".to_vec(), forever, TierSet::ALL).await;

        let memory = cache.get("forever", TierSet::MEMORY).await;
        let disk = cache.get("forever", TierSet::DISK).await;
        assert_eq!(memory, Some(Bytes::from_static(b"v")));
        assert_eq!(memory, disk);
    }

    #[tokio::test]
    async fn test_custom_cost_fn_drives_memory_eviction() {
        let temp_dir = TempDir::new().unwrap();
        let config = CacheConfig::new("images")
            .with_cache_dir(temp_dir.path())
            .with_memory_budget(250)
            .with_cost_fn(Arc::new(|_: &Bytes| 100));
        let cache = CacheSystem::open(config).await.unwrap();

        for key in ["a", "b", "c"] {
            cache.put(key, b"x".to_vec(), HOUR, TierSet::MEMORY).await;
        }

        assert_eq!(cache.memory().entry_count(), 2);
        assert_eq!(cache.memory().total_cost(), 200);
        assert_eq!(cache.get("a", TierSet::MEMORY).await, None);
        assert_eq!(cache.stats().await.memory_evictions, 1);
    }

    #[tokio::test]
    async fn test_leader_skips_fetch_when_value_already_stored() {
        let temp_dir = TempDir::new().unwrap();
        let (cache, _) = create_test_cache(&temp_dir).await;
        let calls = Arc::new(AtomicUsize::new(0));

        // Stored by an earlier leader after this caller's own lookup missed
        cache.put("movie_9", b"stored".to_vec(), HOUR, TierSet::DISK).await;

        let counter = Arc::clone(&calls);
        let value = cache
            .fetch_and_store("movie_9", &sanitize_key("movie_9"), HOUR, TierSet::ALL, move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(b"refetched".to_vec())
                }
            })
            .await
            .unwrap();

        assert_eq!(&value[..], b"stored");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(cache.stats().await.fetches, 0);
    }

    #[tokio::test]
    async fn test_expired_entries_are_misses() {
        let temp_dir = TempDir::new().unwrap();
        let (cache, clock) = create_test_cache(&temp_dir).await;

        cache.put("k", b"v".to_vec(), Duration::from_secs(1), TierSet::ALL).await;
        clock.advance(Duration::from_secs(2));

        assert_eq!(cache.get("k", TierSet::ALL).await, None);
        assert!(!cache.disk().data_path(&sanitize_key("k")).exists());
    }

    #[tokio::test]
    async fn test_get_or_fetch_fetches_once_then_hits() {
        let temp_dir = TempDir::new().unwrap();
        let (cache, _) = create_test_cache(&temp_dir).await;
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let value = cache
                .get_or_fetch("movie_1", HOUR, TierSet::ALL, move || {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, BoxError>(b"fetched".to_vec())
                    }
                })
                .await
                .unwrap();
            assert_eq!(&value[..], b"fetched");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats().await;
        assert_eq!(stats.fetches, 1);
        assert_eq!(stats.disk_writes, 1);
    }

    #[tokio::test]
    async fn test_get_or_fetch_failure_is_not_cached() {
        let temp_dir = TempDir::new().unwrap();
        let (cache, _) = create_test_cache(&temp_dir).await;
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let result = cache
            .get_or_fetch("k", HOUR, TierSet::ALL, move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<Vec<u8>, _>("503 Service Unavailable")
                }
            })
            .await;

        match result {
            Err(CacheError::FetchFailed(e)) => {
                assert_eq!(e.attempts, 3);
                assert_eq!(e.source.to_string(), "503 Service Unavailable");
            }
            other => panic!("expected FetchFailed, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!cache.exists("k").await);
        assert_eq!(cache.stats().await.fetch_failures, 1);
    }

    #[tokio::test]
    async fn test_typed_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let (cache, _) = create_test_cache(&temp_dir).await;
        let codec = JsonCodec::<Movie>::new();
        let movie = Movie {
            title: "Face/Off".to_string(),
        };

        cache
            .put_as("movie_42", &movie, HOUR, TierSet::ALL, &codec)
            .await
            .unwrap();

        assert_eq!(cache.get_as("movie_42", TierSet::ALL, &codec).await, Some(movie));
    }

    #[tokio::test]
    async fn test_corrupt_typed_entry_is_evicted() {
        let temp_dir = TempDir::new().unwrap();
        let (cache, _) = create_test_cache(&temp_dir).await;
        let codec = JsonCodec::<Movie>::new();

        cache.put("movie_42", b"\x00not json".to_vec(), HOUR, TierSet::ALL).await;

        assert_eq!(cache.get_as("movie_42", TierSet::ALL, &codec).await, None);
        assert!(!cache.exists("movie_42").await);
        assert_eq!(cache.stats().await.decode_failures, 1);
    }

    #[tokio::test]
    async fn test_get_or_fetch_as_replaces_corrupt_entry() {
        let temp_dir = TempDir::new().unwrap();
        let (cache, _) = create_test_cache(&temp_dir).await;
        let codec = JsonCodec::<Movie>::new();

        cache.put("movie_42", b"garbage".to_vec(), HOUR, TierSet::ALL).await;

        let movie = cache
            .get_or_fetch_as("movie_42", HOUR, TierSet::ALL, codec.clone(), || async {
                Ok::<_, BoxError>(Movie {
                    title: "Face/Off".to_string(),
                })
            })
            .await
            .unwrap();

        assert_eq!(movie.title, "Face/Off");
        assert_eq!(
            cache.get("movie_42", TierSet::DISK).await,
            Some(Bytes::from_static(br#"{"title":"Face/Off"}"#))
        );
    }

    #[tokio::test]
    async fn test_raw_codec_passthrough() {
        let temp_dir = TempDir::new().unwrap();
        let (cache, _) = create_test_cache(&temp_dir).await;

        let value = cache
            .get_or_fetch_as("img", HOUR, TierSet::ALL, RawCodec, || async {
                Ok::<_, BoxError>(Bytes::from_static(b"\x89PNG"))
            })
            .await
            .unwrap();
        assert_eq!(&value[..], b"\x89PNG");
    }

    #[tokio::test]
    async fn test_remove_and_exists() {
        let temp_dir = TempDir::new().unwrap();
        let (cache, _) = create_test_cache(&temp_dir).await;

        cache.put("k", b"v".to_vec(), HOUR, TierSet::ALL).await;
        assert!(cache.exists("k").await);

        cache.remove("k").await;
        assert!(!cache.exists("k").await);

        // Removing again is fine
        cache.remove("k").await;
    }

    #[tokio::test]
    async fn test_clear_selected_tiers() {
        let temp_dir = TempDir::new().unwrap();
        let (cache, _) = create_test_cache(&temp_dir).await;

        cache.put("a", b"1".to_vec(), HOUR, TierSet::ALL).await;
        cache.put("b", b"2".to_vec(), HOUR, TierSet::ALL).await;

        cache.clear(TierSet::DISK).await;
        let stats = cache.stats().await;
        assert_eq!(stats.memory_entries, 2);
        assert_eq!(stats.disk_entries, 0);

        cache.clear(TierSet::ALL).await;
        assert_eq!(cache.stats().await.memory_entries, 0);
    }

    #[tokio::test]
    async fn test_handle_memory_pressure_keeps_disk() {
        let temp_dir = TempDir::new().unwrap();
        let (cache, _) = create_test_cache(&temp_dir).await;

        cache.put("k", b"v".to_vec(), HOUR, TierSet::ALL).await;
        cache.handle_memory_pressure();

        assert_eq!(cache.memory().entry_count(), 0);
        assert_eq!(
            cache.get("k", TierSet::ALL).await,
            Some(Bytes::from_static(b"v"))
        );
    }

    #[tokio::test]
    async fn test_stats_report_disk_usage() {
        let temp_dir = TempDir::new().unwrap();
        let (cache, _) = create_test_cache(&temp_dir).await;

        cache.put("a", vec![0u8; 100], HOUR, TierSet::DISK).await;
        cache.put("b", vec![0u8; 200], HOUR, TierSet::DISK).await;

        let stats = cache.stats().await;
        assert_eq!(stats.category, "responses");
        assert_eq!(stats.entry_counts(), (0, 2));
        assert!(stats.aggregate_disk_bytes >= 300);
    }

    #[tokio::test]
    async fn test_prefetch_fetches_missing_keys() {
        let temp_dir = TempDir::new().unwrap();
        let (cache, _) = create_test_cache(&temp_dir).await;
        cache.put("k0", b"cached".to_vec(), HOUR, TierSet::ALL).await;

        let keys: Vec<String> = (0..5).map(|i| format!("k{}", i)).collect();
        let summary = cache
            .prefetch(
                keys,
                HOUR,
                TierSet::ALL,
                |key: String| async move {
                    if key == "k4" {
                        Err::<Vec<u8>, BoxError>("not found".into())
                    } else {
                        Ok(key.into_bytes())
                    }
                },
                CancellationToken::new(),
            )
            .await;

        assert_eq!(summary.requested, 5);
        assert_eq!(summary.already_cached, 1);
        assert_eq!(summary.fetched, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.cancelled, 0);
        assert_eq!(
            cache.get("k2", TierSet::ALL).await,
            Some(Bytes::from_static(b"k2"))
        );
    }

    #[tokio::test]
    async fn test_prefetch_cancelled_before_start() {
        let temp_dir = TempDir::new().unwrap();
        let (cache, _) = create_test_cache(&temp_dir).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = cache
            .prefetch(
                vec!["a".to_string(), "b".to_string()],
                HOUR,
                TierSet::ALL,
                |key: String| async move { Ok::<_, BoxError>(key.into_bytes()) },
                cancel,
            )
            .await;

        assert_eq!(summary.cancelled, 2);
        assert_eq!(summary.fetched, 0);
    }

    #[tokio::test]
    async fn test_prefetch_cancellation_does_not_block_get() {
        let temp_dir = TempDir::new().unwrap();
        let (cache, _) = create_test_cache(&temp_dir).await;
        cache.put("hot", b"v".to_vec(), HOUR, TierSet::ALL).await;
        let cancel = CancellationToken::new();

        let prefetch = {
            let cache = cache.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                cache
                    .prefetch(
                        vec!["slow".to_string()],
                        HOUR,
                        TierSet::ALL,
                        |_key: String| async move {
                            tokio::time::sleep(Duration::from_secs(30)).await;
                            Ok::<_, BoxError>(Vec::new())
                        },
                        cancel,
                    )
                    .await
            })
        };

        assert!(cache.get("hot", TierSet::ALL).await.is_some());

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let summary = prefetch.await.unwrap();
        assert_eq!(summary.cancelled, 1);
    }

    #[tokio::test]
    async fn test_start_spawns_daemon_and_shutdown_stops_it() {
        let temp_dir = TempDir::new().unwrap();
        let config = CacheConfig::new("images").with_cache_dir(temp_dir.path());

        let cache = CacheSystem::start(config).await.unwrap();
        assert!(cache.has_daemon());

        cache.shutdown().await;
        assert!(!cache.has_daemon());
    }
}
