//! Content-addressed stem cache
//!
//! One directory per [`Fingerprint`] under the cache root, holding one WAV per
//! [`StemKind`] plus a hidden `.last_access` marker (Unix milliseconds) that
//! drives LRU eviction and age-based pruning.
//!
//! # Visibility
//! An entry is either absent, in progress (under `.staging/`, invisible to
//! readers) or complete. `put` copies into staging outside the exclusive
//! section, then publishes with a directory rename inside it.
//!
//! # Exclusive section
//! One async mutex per store serializes publish, evict, touch, remove, clear
//! and prune, so eviction never deletes an entry a concurrent `put` is
//! publishing. Filesystem work runs on the blocking pool while the caller
//! suspends.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{Fingerprint, StemKind, StemPaths};

/// Access marker file name inside an entry directory
pub const ACCESS_MARKER: &str = ".last_access";

const STAGING_DIR: &str = ".staging";
const TRASH_DIR: &str = ".trash";

/// Cache errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Source directory is missing stems: {missing:?}")]
    Incomplete { missing: Vec<StemKind> },

    #[error("Cache task failed: {0}")]
    Task(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// One entry as seen by a directory scan
#[derive(Debug, Clone, Serialize)]
pub struct EntrySummary {
    pub fingerprint: Fingerprint,
    /// Artifact bytes (marker excluded)
    pub bytes: u64,
    pub last_access: DateTime<Utc>,
    pub complete: bool,
}

/// Aggregate view over current entries
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total_bytes: u64,
    pub entry_count: usize,
    pub max_bytes: u64,
    pub total_size_mb: f64,
    pub max_size_mb: f64,
    pub usage_percent: f64,
    pub oldest_access: Option<DateTime<Utc>>,
    pub newest_access: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct CacheLayout {
    root: PathBuf,
    max_bytes: u64,
}

/// Directory-per-fingerprint stem store
#[derive(Clone)]
pub struct CacheStore {
    layout: Arc<CacheLayout>,
    section: Arc<Mutex<()>>,
}

impl CacheStore {
    /// Open (creating if needed) a store rooted at `root`
    ///
    /// Leftovers of interrupted publishes (`.staging/`, `.trash/`) are removed.
    pub fn open(root: impl Into<PathBuf>, max_bytes: u64) -> CacheResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        for internal in [STAGING_DIR, TRASH_DIR] {
            let path = root.join(internal);
            if path.exists() {
                if let Err(e) = fs::remove_dir_all(&path) {
                    warn!(path = %path.display(), error = %e, "Failed to remove cache leftovers");
                }
            }
        }

        info!(
            root = %root.display(),
            max_mb = max_bytes / (1024 * 1024),
            "Stem cache opened"
        );

        Ok(Self {
            layout: Arc::new(CacheLayout { root, max_bytes }),
            section: Arc::new(Mutex::new(())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.layout.root
    }

    pub fn max_bytes(&self) -> u64 {
        self.layout.max_bytes
    }

    /// Directory an entry lives in (whether or not it exists)
    pub fn entry_dir(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.layout.root.join(fingerprint.as_str())
    }

    async fn blocking<T, F>(&self, f: F) -> CacheResult<T>
    where
        F: FnOnce(&CacheLayout) -> CacheResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let layout = Arc::clone(&self.layout);
        tokio::task::spawn_blocking(move || f(&layout))
            .await
            .map_err(|e| CacheError::Task(e.to_string()))?
    }

    /// True iff every stem artifact is present
    pub async fn exists(&self, fingerprint: &Fingerprint) -> CacheResult<bool> {
        let dir = self.entry_dir(fingerprint);
        self.blocking(move |_| Ok(missing_stems(&dir)?.is_empty()))
            .await
    }

    /// Artifact paths of a complete entry; refreshes its access time
    pub async fn get(&self, fingerprint: &Fingerprint) -> CacheResult<Option<StemPaths>> {
        let dir = self.entry_dir(fingerprint);
        let _guard = self.section.lock().await;

        let paths = self
            .blocking(move |_| {
                if !missing_stems(&dir)?.is_empty() {
                    return Ok(None);
                }
                write_access(&dir, Utc::now())?;
                Ok(Some(StemPaths::for_dir(&dir)))
            })
            .await?;

        debug!(fingerprint = %fingerprint, hit = paths.is_some(), "Cache lookup");
        Ok(paths)
    }

    /// Replace the entry for `fingerprint` with a copy of `source`
    ///
    /// `source` must contain every stem. After publishing, LRU eviction brings
    /// the store back under its ceiling; the entry just published is never
    /// evicted by its own `put`. Eviction errors are logged, not returned.
    pub async fn put(&self, fingerprint: &Fingerprint, source: &Path) -> CacheResult<StemPaths> {
        let source = source.to_path_buf();
        let staging = self
            .layout
            .root
            .join(STAGING_DIR)
            .join(format!("{}-{}", fingerprint, Uuid::new_v4()));

        // Copy outside the exclusive section; staging is invisible to readers
        let staging_clone = staging.clone();
        self.blocking(move |_| {
            let missing = missing_stems(&source)?;
            if !missing.is_empty() {
                return Err(CacheError::Incomplete { missing });
            }
            if let Err(e) = copy_dir_recursive(&source, &staging_clone) {
                let _ = fs::remove_dir_all(&staging_clone);
                return Err(e.into());
            }
            Ok(())
        })
        .await?;

        let _guard = self.section.lock().await;

        let fp = fingerprint.clone();
        let (paths, evicted) = self
            .blocking(move |layout| {
                let final_dir = layout.root.join(fp.as_str());
                if let Err(e) = publish(layout, &staging, &final_dir, &fp) {
                    let _ = fs::remove_dir_all(&staging);
                    return Err(e.into());
                }
                // The entry is already visible; an eviction failure must not fail the put
                let evicted = match evict_to_ceiling(layout, &fp) {
                    Ok(evicted) => evicted,
                    Err(e) => {
                        warn!(
                            fingerprint = %fp,
                            error = %e,
                            "Eviction scan failed after publish"
                        );
                        Vec::new()
                    }
                };
                Ok((StemPaths::for_dir(&final_dir), evicted))
            })
            .await?;

        info!(
            fingerprint = %fingerprint,
            evicted = evicted.len(),
            "Stems published to cache"
        );
        for victim in &evicted {
            debug!(fingerprint = %victim, "Evicted least recently used entry");
        }

        Ok(paths)
    }

    /// Delete an entry; false if there was none
    pub async fn remove(&self, fingerprint: &Fingerprint) -> CacheResult<bool> {
        let dir = self.entry_dir(fingerprint);
        let _guard = self.section.lock().await;

        let removed = self
            .blocking(move |_| match fs::remove_dir_all(&dir) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            })
            .await?;

        if removed {
            info!(fingerprint = %fingerprint, "Cache entry removed");
        }
        Ok(removed)
    }

    /// Delete every entry; returns how many were removed
    pub async fn clear(&self) -> CacheResult<usize> {
        let _guard = self.section.lock().await;

        let count = self
            .blocking(|layout| {
                let mut count = 0;
                for entry in scan_entries(&layout.root)? {
                    remove_entry(&layout.root, &entry.fingerprint)?;
                    count += 1;
                }
                let trash = layout.root.join(TRASH_DIR);
                if trash.exists() {
                    fs::remove_dir_all(&trash)?;
                }
                Ok(count)
            })
            .await?;

        info!(count, "Cache cleared");
        Ok(count)
    }

    /// Remove entries not accessed within `max_age`
    pub async fn prune_older_than(&self, max_age: Duration) -> CacheResult<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age)
                .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        let _guard = self.section.lock().await;

        let count = self
            .blocking(move |layout| {
                let mut count = 0;
                for entry in scan_entries(&layout.root)? {
                    if entry.last_access < cutoff {
                        remove_entry(&layout.root, &entry.fingerprint)?;
                        count += 1;
                    }
                }
                Ok(count)
            })
            .await?;

        if count > 0 {
            info!(count, cutoff = %cutoff, "Pruned stale cache entries");
        }
        Ok(count)
    }

    /// Every entry with its size and last access, oldest access first
    pub async fn entries(&self) -> CacheResult<Vec<EntrySummary>> {
        let _guard = self.section.lock().await;
        self.blocking(|layout| {
            let mut entries = scan_entries(&layout.root)?;
            entries.sort_by_key(|e| e.last_access);
            Ok(entries)
        })
        .await
    }

    pub async fn stats(&self) -> CacheResult<CacheStats> {
        let entries = self.entries().await?;
        let max_bytes = self.layout.max_bytes;
        let total_bytes: u64 = entries.iter().map(|e| e.bytes).sum();

        Ok(CacheStats {
            total_bytes,
            entry_count: entries.len(),
            max_bytes,
            total_size_mb: round2(total_bytes as f64 / (1024.0 * 1024.0)),
            max_size_mb: max_bytes as f64 / (1024.0 * 1024.0),
            usage_percent: if max_bytes > 0 {
                round2(total_bytes as f64 / max_bytes as f64 * 100.0)
            } else {
                0.0
            },
            oldest_access: entries.iter().map(|e| e.last_access).min(),
            newest_access: entries.iter().map(|e| e.last_access).max(),
        })
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Stems absent from `dir` (all of them if `dir` does not exist)
fn missing_stems(dir: &Path) -> io::Result<Vec<StemKind>> {
    let mut missing = Vec::new();
    for kind in StemKind::ALL {
        match fs::metadata(dir.join(kind.file_name())) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => missing.push(kind),
            Err(e) if e.kind() == io::ErrorKind::NotFound => missing.push(kind),
            Err(e) => return Err(e),
        }
    }
    Ok(missing)
}

/// Swap `staging` in as `final_dir`; the old entry (if any) goes via `.trash/`
fn publish(layout: &CacheLayout, staging: &Path, final_dir: &Path, fp: &Fingerprint) -> io::Result<()> {
    write_access(staging, Utc::now())?;

    let trash = if final_dir.exists() {
        let trash_root = layout.root.join(TRASH_DIR);
        fs::create_dir_all(&trash_root)?;
        let trash = trash_root.join(format!("{}-{}", fp, Uuid::new_v4()));
        fs::rename(final_dir, &trash)?;
        Some(trash)
    } else {
        None
    };

    if let Err(e) = fs::rename(staging, final_dir) {
        if let Some(trash) = &trash {
            if let Err(restore) = fs::rename(trash, final_dir) {
                warn!(fingerprint = %fp, error = %restore, "Failed to restore previous cache entry");
            }
        }
        return Err(e);
    }

    if let Some(trash) = trash {
        if let Err(e) = fs::remove_dir_all(&trash) {
            warn!(path = %trash.display(), error = %e, "Failed to delete replaced cache entry");
        }
    }
    Ok(())
}

/// LRU eviction down to the ceiling, sparing `keep`
fn evict_to_ceiling(layout: &CacheLayout, keep: &Fingerprint) -> CacheResult<Vec<Fingerprint>> {
    let mut entries = scan_entries(&layout.root)?;
    let mut total: u64 = entries.iter().map(|e| e.bytes).sum();
    if total <= layout.max_bytes {
        return Ok(Vec::new());
    }

    entries.sort_by_key(|e| e.last_access);

    let mut evicted = Vec::new();
    for entry in entries {
        if total <= layout.max_bytes {
            break;
        }
        if &entry.fingerprint == keep {
            continue;
        }
        match remove_entry(&layout.root, &entry.fingerprint) {
            Ok(()) => {
                total = total.saturating_sub(entry.bytes);
                evicted.push(entry.fingerprint);
            }
            Err(e) => {
                warn!(fingerprint = %entry.fingerprint, error = %e, "Eviction failed");
            }
        }
    }

    if total > layout.max_bytes {
        warn!(
            fingerprint = %keep,
            total_bytes = total,
            max_bytes = layout.max_bytes,
            "Cache still over ceiling after eviction"
        );
    }
    Ok(evicted)
}

fn remove_entry(root: &Path, fingerprint: &Fingerprint) -> io::Result<()> {
    match fs::remove_dir_all(root.join(fingerprint.as_str())) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Entries under `root`; internal and foreign directories are skipped
fn scan_entries(root: &Path) -> io::Result<Vec<EntrySummary>> {
    let mut entries = Vec::new();

    for dir_entry in fs::read_dir(root)? {
        let dir_entry = dir_entry?;
        if !dir_entry.file_type()?.is_dir() {
            continue;
        }
        let Some(fingerprint) = dir_entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<Fingerprint>().ok())
        else {
            continue;
        };

        let dir = dir_entry.path();
        let scanned = dir_size(&dir).and_then(|bytes| {
            let last_access = read_access(&dir)?;
            let complete = missing_stems(&dir)?.is_empty();
            Ok((bytes, last_access, complete))
        });
        match scanned {
            Ok((bytes, last_access, complete)) => entries.push(EntrySummary {
                fingerprint,
                bytes,
                last_access,
                complete,
            }),
            // Vanished between read_dir and stat
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(entries)
}

/// Artifact bytes under `dir`, marker excluded
fn dir_size(dir: &Path) -> io::Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            total += dir_size(&entry.path())?;
        } else if entry.file_name() != ACCESS_MARKER {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

/// Last access from the marker, falling back to the directory mtime
fn read_access(dir: &Path) -> io::Result<DateTime<Utc>> {
    if let Ok(content) = fs::read_to_string(dir.join(ACCESS_MARKER)) {
        if let Some(ts) = content
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(riff_common::time::from_unix_millis)
        {
            return Ok(ts);
        }
    }
    let modified = fs::metadata(dir)?.modified()?;
    Ok(DateTime::<Utc>::from(modified))
}

fn write_access(dir: &Path, at: DateTime<Utc>) -> io::Result<()> {
    fs::write(
        dir.join(ACCESS_MARKER),
        riff_common::time::to_unix_millis(at).to_string(),
    )
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
