//! Cache backends holding the shared permission snapshot
//!
//! - **InMemoryCacheBackend**: process-local, for single-process deployments
//! - **FileCacheBackend**: serialized snapshot on disk, shared by every process on a host

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{PermissionError, Result};
use crate::registrar::Snapshot;

/// Key-value store for permission snapshots
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a live (non-expired) snapshot
    async fn get(&self, key: &str) -> Result<Option<Arc<Snapshot>>>;

    /// Store a snapshot, replacing any previous one; `None` ttl never expires
    async fn put(&self, key: &str, snapshot: Arc<Snapshot>, ttl: Option<Duration>) -> Result<()>;

    /// Remove an entry, returning whether one existed
    async fn forget(&self, key: &str) -> Result<bool>;

    /// Check whether a live entry exists
    async fn has(&self, key: &str) -> Result<bool>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

/// Cached snapshot with TTL
#[derive(Clone)]
struct CachedEntry {
    snapshot: Arc<Snapshot>,
    cached_at: Instant,
    ttl: Option<Duration>,
}

impl CachedEntry {
    fn is_expired(&self) -> bool {
        self.ttl.is_some_and(|ttl| self.cached_at.elapsed() > ttl)
    }
}

/// Process-local cache backend
#[derive(Default)]
pub struct InMemoryCacheBackend {
    entries: DashMap<String, CachedEntry>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<Arc<Snapshot>>> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                return Ok(Some(Arc::clone(&entry.snapshot)));
            }
        }

        // Re-checked under the shard lock so a concurrent put survives
        if self.entries.remove_if(key, |_, entry| entry.is_expired()).is_some() {
            debug!("Cache entry '{}' expired", key);
        }
        Ok(None)
    }

    async fn put(&self, key: &str, snapshot: Arc<Snapshot>, ttl: Option<Duration>) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            CachedEntry {
                snapshot,
                cached_at: Instant::now(),
                ttl,
            },
        );
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<bool> {
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired()))
    }

    async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Suffix counter keeping temporary file names unique within a process
static TMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// On-disk representation of a cached snapshot
#[derive(Serialize, Deserialize)]
struct FileEntry {
    stored_at: DateTime<Utc>,
    ttl_millis: Option<u64>,
    snapshot: Snapshot,
}

impl FileEntry {
    fn is_expired(&self) -> bool {
        let Some(ttl) = self.ttl_millis else {
            return false;
        };
        let age = Utc::now().signed_duration_since(self.stored_at);
        age.num_milliseconds() > 0 && age.num_milliseconds() as u64 > ttl
    }
}

/// Cache backend storing one JSON file per key in a directory
///
/// Writes go to a temporary file that is renamed into place, so readers in
/// other processes see either the old or the new snapshot.
pub struct FileCacheBackend {
    dir: PathBuf,
}

impl FileCacheBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the cache files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", file_name))
    }

    async fn read_entry(&self, key: &str) -> Result<Option<FileEntry>> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(backend_error(&path, e)),
        };

        match serde_json::from_slice::<FileEntry>(&bytes) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                debug!("Ignoring unreadable cache file {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }
}

fn backend_error(path: &Path, e: std::io::Error) -> PermissionError {
    PermissionError::CacheBackend(format!("{}: {}", path.display(), e))
}

#[async_trait]
impl CacheBackend for FileCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<Arc<Snapshot>>> {
        match self.read_entry(key).await? {
            Some(entry) if !entry.is_expired() => Ok(Some(Arc::new(entry.snapshot))),
            _ => Ok(None),
        }
    }

    async fn put(&self, key: &str, snapshot: Arc<Snapshot>, ttl: Option<Duration>) -> Result<()> {
        let entry = FileEntry {
            stored_at: Utc::now(),
            ttl_millis: ttl.map(|ttl| u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)),
            snapshot: (*snapshot).clone(),
        };
        let bytes = serde_json::to_vec(&entry)?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| backend_error(&self.dir, e))?;

        let path = self.path_for(key);
        let tmp = path.with_extension(format!(
            "json.{}.{}.tmp",
            std::process::id(),
            TMP_SEQUENCE.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| backend_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| backend_error(&path, e))?;

        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<bool> {
        let live = matches!(self.read_entry(key).await, Ok(Some(entry)) if !entry.is_expired());
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(live),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(backend_error(&path, e)),
        }
    }

    async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registrar::JoinRow;
    use crate::types::Permission;

    fn snapshot() -> Arc<Snapshot> {
        Arc::new(Snapshot::from_rows(vec![JoinRow::permission(&Permission::new(
            1, "edit", "web",
        ))]))
    }

    #[tokio::test]
    async fn test_memory_put_get_forget() {
        let cache = InMemoryCacheBackend::new();

        assert!(cache.get("perms").await.unwrap().is_none());
        cache.put("perms", snapshot(), None).await.unwrap();
        assert!(cache.has("perms").await.unwrap());
        assert_eq!(cache.get("perms").await.unwrap().unwrap().len(), 1);

        assert!(cache.forget("perms").await.unwrap());
        assert!(!cache.forget("perms").await.unwrap());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_memory_ttl() {
        let cache = InMemoryCacheBackend::new();
        cache
            .put("perms", snapshot(), Some(Duration::from_millis(50)))
            .await
            .unwrap();
        assert!(cache.has("perms").await.unwrap());

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(cache.get("perms").await.unwrap().is_none());
        assert!(!cache.forget("perms").await.unwrap());
    }

    #[tokio::test]
    async fn test_file_backend_shares_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FileCacheBackend::new(dir.path());
        let reader = FileCacheBackend::new(dir.path());

        writer
            .put("gatehouse.permission.cache", snapshot(), None)
            .await
            .unwrap();

        let loaded = reader.get("gatehouse.permission.cache").await.unwrap().unwrap();
        assert_eq!(*loaded, *snapshot());
        assert!(reader.forget("gatehouse.permission.cache").await.unwrap());
        assert!(!writer.has("gatehouse.permission.cache").await.unwrap());
    }

    #[tokio::test]
    async fn test_file_backend_key_sanitizing() {
        let backend = FileCacheBackend::new("/tmp/cache");
        assert_eq!(
            backend.path_for("team/1:perms"),
            PathBuf::from("/tmp/cache/team_1_perms.json")
        );
    }

    #[test]
    fn test_file_entry_expiry() {
        let entry = FileEntry {
            stored_at: Utc::now() - chrono::Duration::seconds(120),
            ttl_millis: Some(60_000),
            snapshot: Snapshot::default(),
        };
        assert!(entry.is_expired());

        let forever = FileEntry {
            ttl_millis: None,
            ..entry
        };
        assert!(!forever.is_expired());
    }

    #[tokio::test]
    async fn test_file_backend_sub_second_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileCacheBackend::new(dir.path());

        backend
            .put("perms", snapshot(), Some(Duration::from_millis(500)))
            .await
            .unwrap();
        assert!(backend.has("perms").await.unwrap(), "entry lives until its ttl");

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(!backend.has("perms").await.unwrap());

        // The expired file is removed but reported as absent
        assert!(!backend.forget("perms").await.unwrap());
        assert!(!backend.path_for("perms").exists());
    }

    #[tokio::test]
    async fn test_file_backend_concurrent_writers() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FileCacheBackend::new(dir.path()));

        let writes = (0..8).map(|_| {
            let backend = Arc::clone(&backend);
            tokio::spawn(async move { backend.put("perms", snapshot(), None).await })
        });
        for handle in futures::future::join_all(writes).await {
            handle.unwrap().unwrap();
        }

        assert!(backend.has("perms").await.unwrap());
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|entry| {
                entry
                    .as_ref()
                    .map(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
                    .unwrap_or(false)
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_memory_expired_get_keeps_fresh_put() {
        let cache = InMemoryCacheBackend::new();
        cache
            .put("perms", snapshot(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(cache.get("perms").await.unwrap().is_none());
        cache.put("perms", snapshot(), None).await.unwrap();
        assert!(cache.get("perms").await.unwrap().is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_memory_backend_blocking_use() {
        let cache = InMemoryCacheBackend::new();
        tokio_test::block_on(cache.put("perms", snapshot(), None)).unwrap();
        assert!(tokio_test::block_on(cache.has("perms")).unwrap());
    }
}
