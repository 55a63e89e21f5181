//! Media file cache
//!
//! **Purpose:** Map a [`ContentKey`] to a materialized local file and delete it
//! again once nobody needs it.
//!
//! **Eviction:** every entry carries exactly one deletion deadline. Scheduling
//! spawns a detached task that sleeps until that deadline and deletes the file
//! only if the entry still holds the same deadline (compare-and-delete), so a
//! touch always wins over a stale timer.
//!
//! **TTL invariant:** the TTL must be at least as long as the longest track the
//! fetcher accepts, otherwise a path returned by [`MediaCache::acquire`] could be
//! deleted mid-playback. `PlayerConfig::validate` enforces this.
//!
//! Concurrent `acquire` calls for one key are serialized by a per-key async
//! lock; the second caller finds the first caller's entry instead of fetching
//! again.

mod key;

pub use key::ContentKey;

use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Default time-to-live of a cached file
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone)]
struct CacheEntry {
    path: PathBuf,
    last_access: Instant,
    /// Single outstanding deletion deadline
    deadline: Option<Instant>,
}

struct CacheInner {
    dir: PathBuf,
    ttl: Duration,
    entries: Mutex<HashMap<ContentKey, CacheEntry>>,
    key_locks: Mutex<HashMap<ContentKey, Arc<tokio::sync::Mutex<()>>>>,
}

/// Content-addressed media cache shared by all sessions
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct MediaCache {
    inner: Arc<CacheInner>,
}

impl MediaCache {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                dir: dir.into(),
                ttl,
                entries: Mutex::new(HashMap::new()),
                key_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Target path (without extension) the fetcher writes for `key`
    pub fn path_stem_for(&self, key: &ContentKey) -> PathBuf {
        self.inner.dir.join(key.file_stem())
    }

    /// Number of registered entries
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return a valid path for `key`, calling `fetch` on a miss
    ///
    /// `fetch` receives the deterministic target stem and returns the path it
    /// actually wrote (the fetcher picks the extension).
    pub async fn acquire<F, Fut>(&self, key: &ContentKey, fetch: F) -> Result<PathBuf>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<PathBuf>>,
    {
        let key_lock = self.key_lock(key);
        let result = {
            let _guard = key_lock.lock().await;
            self.acquire_locked(key, fetch).await
        };
        self.release_key_lock(key, key_lock);
        result
    }

    async fn acquire_locked<F, Fut>(&self, key: &ContentKey, fetch: F) -> Result<PathBuf>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<PathBuf>>,
    {
        if let Some(path) = self.cached_path(key).await {
            debug!(key = %key, "Cache hit: {}", path.display());
            return Ok(path);
        }

        tokio::fs::create_dir_all(&self.inner.dir).await?;

        let path = fetch(self.path_stem_for(key)).await?;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(Error::Acquisition(format!(
                "fetched file missing: {}",
                path.display()
            )));
        }

        {
            let mut entries = self.lock_entries();
            entries.insert(
                key.clone(),
                CacheEntry {
                    path: path.clone(),
                    last_access: Instant::now(),
                    deadline: None,
                },
            );
        }
        self.schedule_deletion(key);
        info!(key = %key, "Cached {}", path.display());
        Ok(path)
    }

    /// Path of a registered entry still on disk; touches it
    ///
    /// An entry whose file vanished is dropped.
    pub async fn cached_path(&self, key: &ContentKey) -> Option<PathBuf> {
        let path = self.lock_entries().get(key).map(|e| e.path.clone())?;

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            self.touch(key);
            Some(path)
        } else {
            debug!(key = %key, "Cached file vanished: {}", path.display());
            let mut entries = self.lock_entries();
            if entries.get(key).map(|e| e.path == path).unwrap_or(false) {
                entries.remove(key);
            }
            None
        }
    }

    /// When the entry was last acquired or touched
    pub fn last_access(&self, key: &ContentKey) -> Option<Instant> {
        self.lock_entries().get(key).map(|e| e.last_access)
    }

    /// Push the deletion deadline to now + TTL; false if the key is unknown
    pub fn touch(&self, key: &ContentKey) -> bool {
        {
            let mut entries = self.lock_entries();
            match entries.get_mut(key) {
                Some(entry) => entry.last_access = Instant::now(),
                None => return false,
            }
        }
        self.schedule_deletion(key);
        true
    }

    fn schedule_deletion(&self, key: &ContentKey) {
        let deadline = Instant::now() + self.inner.ttl;
        {
            let mut entries = self.lock_entries();
            match entries.get_mut(key) {
                Some(entry) => entry.deadline = Some(deadline),
                None => return,
            }
        }

        let cache = self.clone();
        let key = key.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            cache.delete_if_deadline(&key, deadline).await;
        });
    }

    /// Compare-and-delete: only fires if the stored deadline is still `deadline`
    async fn delete_if_deadline(&self, key: &ContentKey, deadline: Instant) {
        let path = {
            let mut entries = self.lock_entries();
            let unchanged = entries
                .get(key)
                .map(|e| e.deadline == Some(deadline))
                .unwrap_or(false);
            if unchanged {
                entries.remove(key).map(|e| e.path)
            } else {
                None
            }
        };

        if let Some(path) = path {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => info!("Deleted cached file: {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => error!("Delete error {}: {}", path.display(), e),
            }
        }
    }

    /// Delete every entry whose deadline has passed; returns the count
    ///
    /// Deadline timers normally do this on their own; the sweep catches
    /// entries whose timer task was lost with a runtime.
    pub async fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<PathBuf> = {
            let mut entries = self.lock_entries();
            let keys: Vec<ContentKey> = entries
                .iter()
                .filter(|(_, e)| e.deadline.map(|d| d <= now).unwrap_or(false))
                .map(|(k, _)| k.clone())
                .collect();
            keys.iter()
                .filter_map(|k| entries.remove(k).map(|e| e.path))
                .collect()
        };

        let mut deleted = 0;
        for path in expired {
            if remove_quietly(&path).await {
                deleted += 1;
            }
        }
        deleted
    }

    /// Delete every file in the cache directory not in `active_paths`
    pub async fn evict_inactive(&self, active_paths: &HashSet<PathBuf>) -> usize {
        let files = match self.list_files().await {
            Ok(files) => files,
            Err(e) => {
                error!("Cleanup error: {}", e);
                return 0;
            }
        };
        if files.is_empty() {
            return 0;
        }

        info!("Starting inactive download cleanup");
        let mut deleted_files = HashSet::new();
        for path in files {
            if active_paths.contains(&path) {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    info!("Deleted inactive file: {}", path.display());
                    deleted_files.insert(path);
                }
                Err(e) => error!("Failed to delete {}: {}", path.display(), e),
            }
        }

        self.lock_entries()
            .retain(|_, entry| !deleted_files.contains(&entry.path));

        if !deleted_files.is_empty() {
            info!("Inactive cleanup removed {} files", deleted_files.len());
        }
        deleted_files.len()
    }

    /// Delete every cached file and forget all entries
    pub async fn clear_all(&self) -> usize {
        info!("Clearing all downloads");
        self.lock_entries().clear();

        let files = match self.list_files().await {
            Ok(files) => files,
            Err(e) => {
                error!("Cleanup error: {}", e);
                return 0;
            }
        };

        let mut deleted = 0;
        for path in files {
            if remove_quietly(&path).await {
                deleted += 1;
            }
        }
        info!("Cleared {} files from downloads", deleted);
        deleted
    }

    /// Aggregate on-disk size of the cache directory in bytes
    pub async fn size(&self) -> u64 {
        let files = self.list_files().await.unwrap_or_default();
        let mut total = 0;
        for path in files {
            if let Ok(meta) = tokio::fs::metadata(&path).await {
                total += meta.len();
            }
        }
        total
    }

    /// Startup cleanup: remove leftover files older than the TTL (by mtime)
    pub async fn cleanup_stale(&self) -> usize {
        let files = self.list_files().await.unwrap_or_default();
        let now = SystemTime::now();

        let mut removed = 0;
        for path in files {
            let modified = match tokio::fs::metadata(&path).await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(_) => continue,
            };
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age > self.inner.ttl && remove_quietly(&path).await {
                info!("Removed stale download: {}", path.display());
                removed += 1;
            }
        }
        if removed > 0 {
            info!("Startup cleanup removed {} files", removed);
        }
        removed
    }

    async fn list_files(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.inner.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e),
        };
        while let Some(entry) = dir.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        Ok(files)
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<ContentKey, CacheEntry>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn key_lock(&self, key: &ContentKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .inner
            .key_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    fn release_key_lock(&self, key: &ContentKey, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self
            .inner
            .key_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // map + this handle: nobody else is waiting
        if Arc::strong_count(&lock) == 2 {
            locks.remove(key);
        }
    }
}

async fn remove_quietly(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!("Failed to delete {}: {}", path.display(), e);
            false
        }
    }
}
