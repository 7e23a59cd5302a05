//! Disk tier maintenance: expiration sweep and size-budget eviction.
//!
//! Everything in this module is blocking filesystem work. Async callers go
//! through [`DiskCache`](super::disk::DiskCache), which wraps these functions
//! in `spawn_blocking`.
//!
//! # Scan model
//!
//! A category directory is flat. Its files are grouped into units:
//!
//! - an entry: data blob plus its `.meta` sidecar, aged by the blob's mtime
//! - an orphan: a blob without sidecar, a sidecar without blob, a leftover
//!   staging file or anything else that is not part of an entry
//!
//! A unit is always deleted as a whole.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, info, warn};

use super::disk::{Sidecar, META_EXTENSION};
use super::key::is_data_token;

/// Orphans younger than this are left alone; they may belong to a write
/// that is still in progress.
pub const ORPHAN_GRACE: Duration = Duration::from_secs(60);

/// Result of a sweep, eviction or clear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionResult {
    /// Number of cache entries deleted (orphans excluded)
    pub entries_deleted: usize,
    /// Number of files deleted
    pub files_deleted: usize,
    /// Total bytes freed
    pub bytes_freed: u64,
    /// Directory size before the run
    pub size_before: u64,
    /// Directory size after the run
    pub size_after: u64,
    /// Duration of the run in milliseconds
    pub duration_ms: u64,
}

impl EvictionResult {
    /// Fold another result into this one.
    pub fn merge(&mut self, other: &EvictionResult) {
        self.entries_deleted += other.entries_deleted;
        self.files_deleted += other.files_deleted;
        self.bytes_freed += other.bytes_freed;
        self.size_before += other.size_before;
        self.size_after += other.size_after;
        self.duration_ms += other.duration_ms;
    }
}

/// File count and size of a category directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskUsage {
    /// Complete entries (data blob with sidecar)
    pub entries: usize,
    /// All files, sidecars and orphans included
    pub files: usize,
    /// Sum of all file sizes
    pub bytes: u64,
}

/// Disk usage of one category under a cache root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryUsage {
    /// Category directory name
    pub category: String,
    /// Usage of that directory
    pub usage: DiskUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitKind {
    Entry,
    Orphan,
}

#[derive(Debug)]
struct Unit {
    kind: UnitKind,
    files: Vec<(PathBuf, u64)>,
    sidecar: Option<PathBuf>,
    modified: SystemTime,
    bytes: u64,
}

#[derive(Debug)]
struct FileInfo {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

/// List regular files in `dir` by name. A missing directory is empty.
fn list_files(dir: &Path) -> io::Result<HashMap<String, FileInfo>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(e),
    };

    let mut files = HashMap::new();
    for entry in entries.flatten() {
        let metadata = match entry.metadata() {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => continue,
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        files.insert(
            name,
            FileInfo {
                path: entry.path(),
                size: metadata.len(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            },
        );
    }
    Ok(files)
}

/// Group a directory's files into entries and orphans.
fn collect_units(dir: &Path) -> io::Result<Vec<Unit>> {
    let mut files = list_files(dir)?;
    let mut units = Vec::new();

    let tokens: Vec<String> = files.keys().filter(|n| is_data_token(n)).cloned().collect();
    for token in tokens {
        let Some(data) = files.remove(&token) else {
            continue;
        };
        let meta = files.remove(&format!("{}.{}", token, META_EXTENSION));

        let mut unit = Unit {
            kind: if meta.is_some() {
                UnitKind::Entry
            } else {
                UnitKind::Orphan
            },
            bytes: data.size,
            modified: data.modified,
            files: vec![(data.path, data.size)],
            sidecar: None,
        };
        if let Some(meta) = meta {
            unit.bytes += meta.size;
            unit.sidecar = Some(meta.path.clone());
            unit.files.push((meta.path, meta.size));
        }
        units.push(unit);
    }

    for (_, file) in files {
        units.push(Unit {
            kind: UnitKind::Orphan,
            bytes: file.size,
            modified: file.modified,
            files: vec![(file.path, file.size)],
            sidecar: None,
        });
    }

    Ok(units)
}

/// Delete every file of a unit. Returns (files deleted, bytes freed).
fn delete_unit(unit: &Unit) -> (usize, u64) {
    let mut deleted = 0;
    let mut freed = 0;
    for (path, size) in &unit.files {
        match std::fs::remove_file(path) {
            Ok(()) => {
                deleted += 1;
                freed += size;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                // Log but continue - another file of the unit may still go
                debug!(
                    path = %path.display(),
                    error = %e,
                    "Failed to delete cache file"
                );
            }
        }
    }
    (deleted, freed)
}

/// Aggregate file count and size of a category directory.
pub fn scan_dir(dir: &Path) -> io::Result<DiskUsage> {
    let units = collect_units(dir)?;
    Ok(DiskUsage {
        entries: units.iter().filter(|u| u.kind == UnitKind::Entry).count(),
        files: units.iter().map(|u| u.files.len()).sum(),
        bytes: units.iter().map(|u| u.bytes).sum(),
    })
}

/// Delete expired entries and stale orphans from a category directory.
///
/// An entry whose sidecar can no longer be parsed is deleted as well; it
/// could never be served again.
pub fn sweep_expired(dir: &Path, now: SystemTime) -> EvictionResult {
    let start = Instant::now();
    let units = match collect_units(dir) {
        Ok(units) => units,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Failed to scan cache directory");
            return EvictionResult::default();
        }
    };

    let size_before: u64 = units.iter().map(|u| u.bytes).sum();
    let mut result = EvictionResult {
        size_before,
        ..Default::default()
    };

    for unit in &units {
        let doomed = match unit.kind {
            UnitKind::Entry => unit
                .sidecar
                .as_deref()
                .and_then(Sidecar::read_blocking)
                .map_or(true, |sidecar| sidecar.is_expired(now)),
            UnitKind::Orphan => now
                .duration_since(unit.modified)
                .is_ok_and(|age| age >= ORPHAN_GRACE),
        };
        if !doomed {
            continue;
        }

        let (files, bytes) = delete_unit(unit);
        result.files_deleted += files;
        result.bytes_freed += bytes;
        if unit.kind == UnitKind::Entry && files > 0 {
            result.entries_deleted += 1;
        }
    }

    result.size_after = size_before.saturating_sub(result.bytes_freed);
    result.duration_ms = start.elapsed().as_millis() as u64;

    debug!(
        dir = %dir.display(),
        entries_deleted = result.entries_deleted,
        files_deleted = result.files_deleted,
        bytes_freed = result.bytes_freed,
        "Expiration sweep complete"
    );
    result
}

/// Delete the oldest units (by mtime) until the directory holds at most
/// `budget` bytes.
pub fn evict_to_budget(dir: &Path, budget: u64) -> EvictionResult {
    let start = Instant::now();
    let mut units = match collect_units(dir) {
        Ok(units) => units,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Failed to scan cache directory");
            return EvictionResult::default();
        }
    };

    let size_before: u64 = units.iter().map(|u| u.bytes).sum();
    let mut result = EvictionResult {
        size_before,
        size_after: size_before,
        ..Default::default()
    };

    if size_before <= budget {
        debug!(
            dir = %dir.display(),
            size_bytes = size_before,
            limit_bytes = budget,
            "Disk cache under limit, no eviction needed"
        );
        return result;
    }

    info!(
        dir = %dir.display(),
        current_size_bytes = size_before,
        limit_bytes = budget,
        units = units.len(),
        "Disk cache over limit, starting eviction"
    );

    // Oldest first
    units.sort_by_key(|u| u.modified);

    let mut remaining = size_before;
    for unit in &units {
        if remaining <= budget {
            break;
        }
        let (files, bytes) = delete_unit(unit);
        remaining = remaining.saturating_sub(bytes);
        result.files_deleted += files;
        result.bytes_freed += bytes;
        if unit.kind == UnitKind::Entry && files > 0 {
            result.entries_deleted += 1;
        }
    }

    if remaining > budget {
        warn!(
            remaining_size = remaining,
            target_size = budget,
            shortfall_bytes = remaining - budget,
            "Eviction could not reach target size"
        );
    }

    result.size_after = remaining;
    result.duration_ms = start.elapsed().as_millis() as u64;
    result
}

/// Delete every file in a category directory, keeping the directory.
pub fn clear_dir(dir: &Path) -> io::Result<EvictionResult> {
    let start = Instant::now();
    let units = collect_units(dir)?;
    let size_before: u64 = units.iter().map(|u| u.bytes).sum();

    let mut result = EvictionResult {
        size_before,
        ..Default::default()
    };
    for unit in &units {
        let (files, bytes) = delete_unit(unit);
        result.files_deleted += files;
        result.bytes_freed += bytes;
        if unit.kind == UnitKind::Entry && files > 0 {
            result.entries_deleted += 1;
        }
    }
    result.size_after = size_before.saturating_sub(result.bytes_freed);
    result.duration_ms = start.elapsed().as_millis() as u64;
    Ok(result)
}

/// List category directories under a cache root, sorted by name.
pub fn list_categories(root: &Path) -> io::Result<Vec<String>> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut categories: Vec<String> = entries
        .flatten()
        .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    categories.sort();
    Ok(categories)
}

/// Per-category disk usage of a whole cache root.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use artcache::cache::disk_cache_stats;
///
/// for category in disk_cache_stats(Path::new("/var/cache/artcache")).unwrap() {
///     println!("{}: {} bytes", category.category, category.usage.bytes);
/// }
/// ```
pub fn disk_cache_stats(root: &Path) -> io::Result<Vec<CategoryUsage>> {
    list_categories(root)?
        .into_iter()
        .map(|category| {
            let usage = scan_dir(&root.join(&category))?;
            Ok(CategoryUsage { category, usage })
        })
        .collect()
}

/// Delete every cached file under a cache root.
pub fn clear_disk_cache(root: &Path) -> io::Result<EvictionResult> {
    let mut total = EvictionResult::default();
    for category in list_categories(root)? {
        total.merge(&clear_dir(&root.join(category))?);
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{from_unix_millis, to_unix_millis};
    use tempfile::TempDir;

    /// Create an entry (blob + sidecar) with a given size, age and TTL.
    fn create_entry(dir: &Path, token: &str, size: usize, age_secs: u64, expires_at: SystemTime) {
        std::fs::create_dir_all(dir).unwrap();
        let data = dir.join(token);
        let meta = dir.join(format!("{}.meta", token));
        std::fs::write(&data, vec![0u8; size]).unwrap();
        std::fs::write(
            &meta,
            format!(r#"{{"expiresAt":{}}}"#, to_unix_millis(expires_at)),
        )
        .unwrap();
        set_age(&data, age_secs);
    }

    fn create_file(path: &Path, size: usize, age_secs: u64) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, vec![0u8; size]).unwrap();
        set_age(path, age_secs);
    }

    fn set_age(path: &Path, age_secs: u64) {
        let mtime = SystemTime::now() - Duration::from_secs(age_secs);
        filetime::set_file_mtime(path, filetime::FileTime::from_system_time(mtime)).unwrap();
    }

    fn far_future() -> SystemTime {
        SystemTime::now() + Duration::from_secs(86_400)
    }

    fn meta_len(expires_at: SystemTime) -> u64 {
        format!(r#"{{"expiresAt":{}}}"#, to_unix_millis(expires_at)).len() as u64
    }

    #[test]
    fn test_scan_dir_empty_and_missing() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(scan_dir(temp_dir.path()).unwrap(), DiskUsage::default());
        assert_eq!(
            scan_dir(&temp_dir.path().join("missing")).unwrap(),
            DiskUsage::default()
        );
    }

    #[test]
    fn test_scan_dir_counts_entries_and_orphans() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let expires = far_future();

        create_entry(dir, "a", 100, 10, expires);
        create_entry(dir, "b", 200, 10, expires);
        create_file(&dir.join("c.7.tmp"), 50, 10);

        let usage = scan_dir(dir).unwrap();
        assert_eq!(usage.entries, 2);
        assert_eq!(usage.files, 5);
        assert_eq!(usage.bytes, 350 + 2 * meta_len(expires));
    }

    #[test]
    fn test_sweep_removes_expired_pairs_only() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let now = SystemTime::now();

        create_entry(dir, "stale", 100, 10, now - Duration::from_secs(1));
        create_entry(dir, "fresh", 100, 10, now + Duration::from_secs(3600));

        let result = sweep_expired(dir, now);

        assert_eq!(result.entries_deleted, 1);
        assert_eq!(result.files_deleted, 2);
        assert!(!dir.join("stale").exists());
        assert!(!dir.join("stale.meta").exists());
        assert!(dir.join("fresh").exists());
        assert!(dir.join("fresh.meta").exists());
    }

    #[test]
    fn test_sweep_removes_corrupt_sidecar_entries() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        create_entry(dir, "bad", 10, 10, far_future());
        std::fs::write(dir.join("bad.meta"), b"???").unwrap();

        let result = sweep_expired(dir, SystemTime::now());

        assert_eq!(result.entries_deleted, 1);
        assert!(!dir.join("bad").exists());
    }

    #[test]
    fn test_sweep_respects_orphan_grace() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();

        create_file(&dir.join("old-orphan"), 10, 3600);
        create_file(&dir.join("stray.meta"), 10, 3600);
        create_file(&dir.join("inflight.3.tmp"), 10, 0);

        let result = sweep_expired(dir, SystemTime::now());

        assert_eq!(result.entries_deleted, 0);
        assert_eq!(result.files_deleted, 2);
        assert!(!dir.join("old-orphan").exists());
        assert!(!dir.join("stray.meta").exists());
        assert!(dir.join("inflight.3.tmp").exists());
    }

    #[test]
    fn test_evict_oldest_first() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let expires = far_future();

        create_entry(dir, "oldest", 1000, 300, expires);
        create_entry(dir, "middle", 1000, 200, expires);
        create_entry(dir, "newest", 1000, 100, expires);

        let budget = 2000 + 2 * meta_len(expires);
        let result = evict_to_budget(dir, budget);

        assert_eq!(result.entries_deleted, 1);
        assert_eq!(result.files_deleted, 2);
        assert_eq!(result.size_after, budget);
        assert!(!dir.join("oldest").exists());
        assert!(!dir.join("oldest.meta").exists());
        assert!(dir.join("middle").exists());
        assert!(dir.join("newest").exists());
    }

    #[test]
    fn test_evict_counts_sidecars_against_budget() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let expires = far_future();

        for (i, token) in ["e0", "e1", "e2"].iter().enumerate() {
            create_entry(dir, token, 1000, (3 - i as u64) * 60, expires);
        }

        // Two blobs fit exactly, but their sidecars push it over
        let result = evict_to_budget(dir, 2000);

        assert_eq!(result.entries_deleted, 2);
        assert!(result.size_after <= 2000);
        assert!(!dir.join("e0").exists());
        assert!(!dir.join("e1").exists());
        assert!(dir.join("e2").exists());
    }

    #[test]
    fn test_evict_under_budget_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        create_entry(dir, "a", 100, 10, far_future());

        let result = evict_to_budget(dir, 1_000_000);

        assert_eq!(result.files_deleted, 0);
        assert_eq!(result.size_before, result.size_after);
        assert!(dir.join("a").exists());
    }

    #[test]
    fn test_evict_zero_budget_empties_dir() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        create_entry(dir, "a", 100, 20, far_future());
        create_file(&dir.join("orphan"), 100, 10);

        let result = evict_to_budget(dir, 0);

        assert_eq!(result.size_after, 0);
        assert_eq!(scan_dir(dir).unwrap().files, 0);
    }

    #[test]
    fn test_clear_dir() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("images");
        create_entry(&dir, "a", 100, 10, far_future());
        create_entry(&dir, "b", 100, 10, far_future());

        let result = clear_dir(&dir).unwrap();

        assert_eq!(result.entries_deleted, 2);
        assert_eq!(result.files_deleted, 4);
        assert_eq!(result.size_after, 0);
        assert!(dir.exists());
    }

    #[test]
    fn test_disk_cache_stats_per_category() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        create_entry(&root.join("images"), "a", 500, 10, far_future());
        create_entry(&root.join("metadata"), "b", 50, 10, far_future());
        create_entry(&root.join("metadata"), "c", 50, 10, far_future());

        let stats = disk_cache_stats(root).unwrap();

        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].category, "images");
        assert_eq!(stats[0].usage.entries, 1);
        assert_eq!(stats[1].category, "metadata");
        assert_eq!(stats[1].usage.entries, 2);
    }

    #[test]
    fn test_disk_cache_stats_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        assert!(disk_cache_stats(&temp_dir.path().join("nope"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_clear_disk_cache_all_categories() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        create_entry(&root.join("images"), "a", 500, 10, far_future());
        create_entry(&root.join("metadata"), "b", 50, 10, far_future());

        let result = clear_disk_cache(root).unwrap();

        assert_eq!(result.entries_deleted, 2);
        assert!(disk_cache_stats(root)
            .unwrap()
            .iter()
            .all(|c| c.usage.files == 0));
    }

    #[test]
    fn test_eviction_result_merge() {
        let mut total = EvictionResult::default();
        total.merge(&EvictionResult {
            entries_deleted: 1,
            files_deleted: 2,
            bytes_freed: 10,
            size_before: 30,
            size_after: 20,
            duration_ms: 1,
        });
        total.merge(&EvictionResult {
            entries_deleted: 2,
            files_deleted: 4,
            bytes_freed: 5,
            size_before: 5,
            size_after: 0,
            duration_ms: 2,
        });

        assert_eq!(total.entries_deleted, 3);
        assert_eq!(total.bytes_freed, 15);
        assert_eq!(total.size_after, 20);
    }

    #[test]
    fn test_sidecar_helpers_agree_with_format() {
        let expires = from_unix_millis(1_234);
        let temp_dir = TempDir::new().unwrap();
        create_entry(temp_dir.path(), "x", 1, 0, expires);

        let sidecar = Sidecar::read_blocking(&temp_dir.path().join("x.meta")).unwrap();
        assert_eq!(sidecar.expires_at(), expires);
    }
}
