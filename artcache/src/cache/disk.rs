//! Persistent disk tier.
//!
//! Each category (e.g. "metadata", "images", "responses") owns one flat
//! directory under the cache root. An entry is two files:
//!
//! ```text
//! <root>/<category>/<token>        # data blob
//! <root>/<category>/<token>.meta   # {"expiresAt": <unix millis>}
//! ```
//!
//! Both files are written through a temporary file and an atomic rename.
//! The data blob is written first; if the sidecar cannot be written the blob
//! is removed again, so a reader never sees data without an expiration.
//!
//! All methods return `io::Result` or plain values. Deciding what to do with
//! a failure (usually: treat it as a miss) is left to the caller.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tracing::debug;

use crate::cache::disk_eviction::{self, DiskUsage, EvictionResult};
use crate::time::{from_unix_millis, to_unix_millis};

/// File extension of the metadata sidecar.
pub const META_EXTENSION: &str = "meta";

/// File extension of in-progress writes.
pub const TMP_EXTENSION: &str = "tmp";

/// Distinguishes concurrent staging files for the same token.
pub(super) static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Contents of a `.meta` sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sidecar {
    /// Expiration as milliseconds since the unix epoch
    pub expires_at: u64,
}

impl Sidecar {
    /// Sidecar for an absolute expiration time.
    pub fn new(expires_at: SystemTime) -> Self {
        Self {
            expires_at: to_unix_millis(expires_at),
        }
    }

    /// Expiration time.
    pub fn expires_at(&self) -> SystemTime {
        from_unix_millis(self.expires_at)
    }

    /// Check expiration against `now`.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        now >= self.expires_at()
    }

    /// Parse sidecar bytes. Corrupt content yields `None`.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }

    /// Read a sidecar synchronously (used by the eviction scans).
    pub fn read_blocking(path: &Path) -> Option<Self> {
        std::fs::read(path).ok().and_then(|b| Self::parse(&b))
    }

    fn to_bytes(self) -> io::Result<Vec<u8>> {
        serde_json::to_vec(&self).map_err(io::Error::other)
    }
}

/// A live entry read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskHit {
    /// Stored payload
    pub payload: Bytes,
    /// Expiration recorded in the sidecar
    pub expires_at: SystemTime,
}

/// Result of a disk lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskLookup {
    /// Live entry
    Hit(DiskHit),
    /// Entry had expired; both files were deleted
    Expired,
    /// No usable entry (absent, or sidecar missing or unreadable)
    Miss,
}

/// Disk tier for one category.
#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
    category: String,
    dir: PathBuf,
    max_size_bytes: u64,
}

impl DiskCache {
    /// Create a disk tier rooted at `root/category`.
    ///
    /// The directory is not touched until [`DiskCache::ensure_dir`] or the
    /// first write.
    pub fn new(root: impl Into<PathBuf>, category: impl Into<String>, max_size_bytes: u64) -> Self {
        let root = root.into();
        let category = category.into();
        let dir = root.join(&category);
        Self {
            root,
            category,
            dir,
            max_size_bytes,
        }
    }

    /// Cache root shared by all categories.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Category name.
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Directory holding this category's files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Configured size budget in bytes.
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    /// Path of the data blob for a token.
    pub fn data_path(&self, token: &str) -> PathBuf {
        self.dir.join(token)
    }

    /// Path of the sidecar for a token.
    pub fn meta_path(&self, token: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", token, META_EXTENSION))
    }

    /// Create the category directory if needed.
    pub async fn ensure_dir(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    /// Write an entry. Returns the number of bytes written (data + sidecar).
    pub async fn write(&self, token: &str, payload: &[u8], expires_at: SystemTime) -> io::Result<u64> {
        self.ensure_dir().await?;

        let data_path = self.data_path(token);
        let meta_path = self.meta_path(token);
        let sidecar = Sidecar::new(expires_at).to_bytes()?;

        write_atomic(&self.dir, token, &data_path, payload).await?;

        if let Err(e) = write_atomic(&self.dir, token, &meta_path, &sidecar).await {
            // Keep the pair invariant: no data without a sidecar.
            let _ = tokio::fs::remove_file(&data_path).await;
            return Err(e);
        }

        Ok((payload.len() + sidecar.len()) as u64)
    }

    /// Read an entry, deleting it if it has expired.
    pub async fn read(&self, token: &str, now: SystemTime) -> io::Result<DiskLookup> {
        let sidecar = match self.read_sidecar(token).await? {
            Some(sidecar) => sidecar,
            None => return Ok(DiskLookup::Miss),
        };

        if sidecar.is_expired(now) {
            debug!(category = %self.category, token, "Disk entry expired, deleting");
            self.remove(token).await?;
            return Ok(DiskLookup::Expired);
        }

        match tokio::fs::read(self.data_path(token)).await {
            Ok(data) => Ok(DiskLookup::Hit(DiskHit {
                payload: Bytes::from(data),
                expires_at: sidecar.expires_at(),
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(DiskLookup::Miss),
            Err(e) => Err(e),
        }
    }

    /// Check for a live entry without reading the payload or deleting anything.
    pub async fn exists(&self, token: &str, now: SystemTime) -> io::Result<bool> {
        let live = match self.read_sidecar(token).await? {
            Some(sidecar) => !sidecar.is_expired(now),
            None => false,
        };
        Ok(live && tokio::fs::try_exists(self.data_path(token)).await?)
    }

    /// Delete an entry. Missing files are not an error.
    ///
    /// Returns true if a data blob was removed.
    pub async fn remove(&self, token: &str) -> io::Result<bool> {
        let removed = remove_if_present(&self.data_path(token)).await?;
        remove_if_present(&self.meta_path(token)).await?;
        Ok(removed)
    }

    /// Delete every file in the category directory.
    pub async fn clear(&self) -> io::Result<EvictionResult> {
        let dir = self.dir.clone();
        run_blocking(move || disk_eviction::clear_dir(&dir)).await
    }

    /// Aggregate file count and size of the category directory.
    ///
    /// Walks the directory; not meant for request paths.
    pub async fn size_of(&self) -> io::Result<DiskUsage> {
        let dir = self.dir.clone();
        run_blocking(move || disk_eviction::scan_dir(&dir)).await
    }

    /// Delete every entry whose sidecar has expired, plus orphaned files.
    pub async fn prune_expired(&self, now: SystemTime) -> io::Result<EvictionResult> {
        let dir = self.dir.clone();
        run_blocking(move || Ok(disk_eviction::sweep_expired(&dir, now))).await
    }

    /// Delete oldest entries until the category fits its byte budget.
    pub async fn enforce_budget(&self) -> io::Result<EvictionResult> {
        let dir = self.dir.clone();
        let budget = self.max_size_bytes;
        run_blocking(move || Ok(disk_eviction::evict_to_budget(&dir, budget))).await
    }

    async fn read_sidecar(&self, token: &str) -> io::Result<Option<Sidecar>> {
        let meta_path = self.meta_path(token);
        match tokio::fs::read(&meta_path).await {
            Ok(bytes) => {
                let sidecar = Sidecar::parse(&bytes);
                if sidecar.is_none() {
                    debug!(path = %meta_path.display(), "Unreadable sidecar, treating as miss");
                }
                Ok(sidecar)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Write `contents` to `dest` through a uniquely named staging file.
async fn write_atomic(dir: &Path, token: &str, dest: &Path, contents: &[u8]) -> io::Result<()> {
    let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_path = dir.join(format!("{}.{}.{}", token, n, TMP_EXTENSION));

    tokio::fs::write(&tmp_path, contents).await?;
    if let Err(e) = tokio::fs::rename(&tmp_path, dest).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }
    Ok(())
}

async fn remove_if_present(path: &Path) -> io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

async fn run_blocking<T, F>(f: F) -> io::Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(io::Error::other)?
}
