//! Cache statistics tracking and reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Live counters updated on the request paths.
///
/// All methods take `&self`; counters are relaxed atomics.
#[derive(Debug)]
pub struct StatsCounter {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    fetch_failures: AtomicU64,
    bytes_fetched: AtomicU64,
    memory_evictions: AtomicU64,
    disk_evictions: AtomicU64,
    disk_writes: AtomicU64,
    disk_write_failures: AtomicU64,
    disk_read_failures: AtomicU64,
    decode_failures: AtomicU64,
    created_at: Instant,
}

impl Default for StatsCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsCounter {
    /// Create a zeroed counter set.
    pub fn new() -> Self {
        Self {
            memory_hits: AtomicU64::new(0),
            disk_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
            bytes_fetched: AtomicU64::new(0),
            memory_evictions: AtomicU64::new(0),
            disk_evictions: AtomicU64::new(0),
            disk_writes: AtomicU64::new(0),
            disk_write_failures: AtomicU64::new(0),
            disk_read_failures: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    /// Record a memory tier hit.
    pub fn record_memory_hit(&self) {
        Self::bump(&self.memory_hits, 1);
    }

    /// Record a disk tier hit.
    pub fn record_disk_hit(&self) {
        Self::bump(&self.disk_hits, 1);
    }

    /// Record a lookup that found nothing in any requested tier.
    pub fn record_miss(&self) {
        Self::bump(&self.misses, 1);
    }

    /// Record a successful upstream fetch.
    pub fn record_fetch(&self, bytes: u64) {
        Self::bump(&self.fetches, 1);
        Self::bump(&self.bytes_fetched, bytes);
    }

    /// Record an upstream fetch that exhausted its retries.
    pub fn record_fetch_failure(&self) {
        Self::bump(&self.fetch_failures, 1);
    }

    /// Record memory tier evictions.
    pub fn record_memory_eviction(&self, count: u64) {
        Self::bump(&self.memory_evictions, count);
    }

    /// Record disk tier evictions (expired or over budget).
    pub fn record_disk_eviction(&self, count: u64) {
        Self::bump(&self.disk_evictions, count);
    }

    /// Record a successful disk write.
    pub fn record_disk_write(&self) {
        Self::bump(&self.disk_writes, 1);
    }

    /// Record a failed disk write.
    pub fn record_disk_write_failure(&self) {
        Self::bump(&self.disk_write_failures, 1);
    }

    /// Record a disk read that failed and degraded to a miss.
    pub fn record_disk_read_failure(&self) {
        Self::bump(&self.disk_read_failures, 1);
    }

    /// Record a cached payload that could not be decoded.
    pub fn record_decode_failure(&self) {
        Self::bump(&self.decode_failures, 1);
    }

    /// Snapshot the counters. Occupancy and coalescing fields are left at
    /// zero for the caller to fill in.
    pub fn snapshot(&self) -> CacheStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CacheStats {
            memory_hits: load(&self.memory_hits),
            disk_hits: load(&self.disk_hits),
            miss_count: load(&self.misses),
            fetches: load(&self.fetches),
            fetch_failures: load(&self.fetch_failures),
            bytes_fetched: load(&self.bytes_fetched),
            memory_evictions: load(&self.memory_evictions),
            disk_evictions: load(&self.disk_evictions),
            disk_writes: load(&self.disk_writes),
            disk_write_failures: load(&self.disk_write_failures),
            disk_read_failures: load(&self.disk_read_failures),
            decode_failures: load(&self.decode_failures),
            uptime: self.created_at.elapsed(),
            ..Default::default()
        }
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    /// Disk category these statistics describe
    pub category: String,

    // Occupancy
    pub memory_entries: usize,
    pub memory_bytes: usize,
    pub disk_entries: usize,
    pub aggregate_disk_bytes: u64,

    // Lookups
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub miss_count: u64,

    // Fetches
    pub fetches: u64,
    pub fetch_failures: u64,
    pub bytes_fetched: u64,
    pub coalesced_fetches: u64,

    // Maintenance
    pub memory_evictions: u64,
    pub disk_evictions: u64,
    pub disk_writes: u64,
    pub disk_write_failures: u64,
    pub disk_read_failures: u64,
    pub decode_failures: u64,

    pub uptime: Duration,
}

impl CacheStats {
    /// Hits from any tier.
    pub fn hit_count(&self) -> u64 {
        self.memory_hits + self.disk_hits
    }

    /// Entry counts per tier as `(memory, disk)`.
    pub fn entry_counts(&self) -> (usize, usize) {
        (self.memory_entries, self.disk_entries)
    }

    /// Overall hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count() + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count() as f64 / total as f64
        }
    }

    /// Share of hits served from memory (0.0 to 1.0).
    pub fn memory_hit_share(&self) -> f64 {
        let hits = self.hit_count();
        if hits == 0 {
            0.0
        } else {
            self.memory_hits as f64 / hits as f64
        }
    }

    /// Human-readable report.
    pub fn format(&self) -> String {
        format!(
            r#"Cache Statistics
Category: {}

MEMORY TIER
  Entries:     {}
  Size:        {:.2} MB
  Hits:        {}
  Evictions:   {}

DISK TIER
  Entries:     {}
  Size:        {:.2} MB
  Hits:        {}
  Writes:      {}
  Failures:    {}
  Evictions:   {}

FETCHES
  Total:       {}
  Failures:    {}
  Coalesced:   {}
  Bytes:       {:.2} MB

OVERALL
  Misses:      {}
  Hit Rate:    {:.1}%
  Uptime:      {}s
"#,
            self.category,
            self.memory_entries,
            self.memory_bytes as f64 / (1024.0 * 1024.0),
            self.memory_hits,
            self.memory_evictions,
            self.disk_entries,
            self.aggregate_disk_bytes as f64 / (1024.0 * 1024.0),
            self.disk_hits,
            self.disk_writes,
            self.disk_write_failures,
            self.disk_evictions,
            self.fetches,
            self.fetch_failures,
            self.coalesced_fetches,
            self.bytes_fetched as f64 / (1024.0 * 1024.0),
            self.miss_count,
            self.hit_rate() * 100.0,
            self.uptime.as_secs(),
        )
    }

    /// One-line summary used in periodic log output.
    pub fn summary(&self) -> String {
        format!(
            "mem {} entries / {:.1} MB, disk {} entries / {:.1} MB, hit rate {:.1}%",
            self.memory_entries,
            self.memory_bytes as f64 / (1024.0 * 1024.0),
            self.disk_entries,
            self.aggregate_disk_bytes as f64 / (1024.0 * 1024.0),
            self.hit_rate() * 100.0,
        )
    }
}
