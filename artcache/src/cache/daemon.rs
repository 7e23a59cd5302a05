//! Background eviction daemon.
//!
//! Each cycle runs the expiration sweep and then size-budget eviction on
//! one disk category, records the evictions and logs a one-line summary of
//! the cache. The first cycle runs immediately on start.
//!
//! The daemon is a tokio task driven by a [`CancellationToken`]; it stops
//! when [`EvictionDaemon::shutdown`] is called or the daemon is dropped.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::disk::DiskCache;
use crate::cache::disk_eviction::EvictionResult;
use crate::cache::memory::MemoryCache;
use crate::cache::stats::StatsCounter;
use crate::time::SharedClock;

/// Everything one maintenance cycle touches.
#[derive(Debug, Clone)]
pub struct MaintenanceContext {
    /// Disk category to sweep and evict
    pub disk: DiskCache,
    /// Memory tier, read for the cycle summary only
    pub memory: Arc<MemoryCache>,
    /// Counters that receive disk evictions
    pub stats: Arc<StatsCounter>,
    /// Time source for the expiration sweep
    pub clock: SharedClock,
}

/// Outcome of one maintenance cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Expiration sweep result
    pub expired: EvictionResult,
    /// Size-budget eviction result
    pub budget: EvictionResult,
}

impl MaintenanceReport {
    /// Entries removed by both passes.
    pub fn entries_deleted(&self) -> usize {
        self.expired.entries_deleted + self.budget.entries_deleted
    }
}

impl MaintenanceContext {
    /// Run the expiration sweep.
    pub async fn prune_expired(&self) -> EvictionResult {
        match self.disk.prune_expired(self.clock.now()).await {
            Ok(result) => {
                self.stats.record_disk_eviction(result.entries_deleted as u64);
                result
            }
            Err(e) => {
                warn!(category = %self.disk.category(), error = %e, "Expiration sweep failed");
                EvictionResult::default()
            }
        }
    }

    /// Run size-budget eviction.
    pub async fn enforce_budget(&self) -> EvictionResult {
        match self.disk.enforce_budget().await {
            Ok(result) => {
                self.stats.record_disk_eviction(result.entries_deleted as u64);
                result
            }
            Err(e) => {
                warn!(category = %self.disk.category(), error = %e, "Budget eviction failed");
                EvictionResult::default()
            }
        }
    }

    /// Sweep, then evict down to budget.
    pub async fn run_cycle(&self) -> MaintenanceReport {
        let expired = self.prune_expired().await;
        let budget = self.enforce_budget().await;
        let report = MaintenanceReport { expired, budget };
        self.log_report(&report).await;
        report
    }

    async fn log_report(&self, report: &MaintenanceReport) {
        let category = self.disk.category();
        if report.entries_deleted() > 0 {
            info!(
                category,
                expired = report.expired.entries_deleted,
                evicted = report.budget.entries_deleted,
                bytes_freed = report.expired.bytes_freed + report.budget.bytes_freed,
                size_after = report.budget.size_after,
                "Disk cache maintenance complete"
            );
        } else {
            debug!(category, "Disk cache maintenance complete, nothing removed");
        }

        let mut stats = self.stats.snapshot();
        stats.category = category.to_string();
        stats.memory_entries = self.memory.entry_count();
        stats.memory_bytes = self.memory.total_cost();
        if let Ok(usage) = self.disk.size_of().await {
            stats.disk_entries = usage.entries;
            stats.aggregate_disk_bytes = usage.bytes;
        }
        info!(category, "Cache: {}", stats.summary());
    }
}

/// Handle to a running eviction daemon.
#[derive(Debug)]
pub struct EvictionDaemon {
    cancellation: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl EvictionDaemon {
    /// Spawn the daemon on the current tokio runtime.
    pub fn start(context: MaintenanceContext, interval: Duration) -> Self {
        let cancellation = CancellationToken::new();
        let token = cancellation.clone();

        info!(
            category = %context.disk.category(),
            max_size_bytes = context.disk.max_size_bytes(),
            interval_secs = interval.as_secs(),
            "Starting disk cache eviction daemon"
        );

        let handle = tokio::spawn(run_eviction_daemon(context, interval, token));

        Self {
            cancellation,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Stop the daemon and wait for the task to finish.
    pub async fn shutdown(&self) {
        self.cancellation.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Eviction daemon task failed");
            }
        }
    }

    /// Check if the daemon is still running.
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl Drop for EvictionDaemon {
    fn drop(&mut self) {
        self.cancellation.cancel();
    }
}

/// Run maintenance cycles until cancelled.
pub async fn run_eviction_daemon(
    context: MaintenanceContext,
    interval: Duration,
    cancellation: CancellationToken,
) {
    // Initial cycle on startup
    tokio::select! {
        _ = cancellation.cancelled() => {
            info!("Disk cache eviction daemon shutting down");
            return;
        }
        _ = context.run_cycle() => {}
    }

    loop {
        tokio::select! {
            _ = cancellation.cancelled() => {
                info!("Disk cache eviction daemon shutting down");
                break;
            }
            _ = tokio::time::sleep(interval) => {
                context.run_cycle().await;
            }
        }
    }
}
