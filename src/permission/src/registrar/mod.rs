//! Permission registrar: snapshot loading, caching, and invalidation
//!
//! The registrar keeps one [`Snapshot`] of the whole permission graph under a
//! fixed cache key. A snapshot moves through
//!
//! ```text
//! Empty → Loading → Loaded → (Invalidated → Empty)
//! ```
//!
//! Only one task per registrar runs the store query on a miss; tasks arriving
//! while it runs wait on the load lock and reuse its outcome, failures and
//! uncached (degraded) loads included. Snapshots are replaced whole, so a
//! reader sees either the old or the new one.

pub mod snapshot;

pub use snapshot::{JoinRow, Snapshot, Visibility};

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::CacheBackend;
use crate::config::PermissionConfig;
use crate::error::{PermissionError, Result};
use crate::store::PermissionStore;
use crate::team::TeamContext;
use crate::types::{Permission, SubjectRef, TeamId};
use crate::wildcard::{WildcardResolver, WildcardSyntax};

/// Registrar settings
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrarConfig {
    /// Key of the snapshot entry in the cache backend
    pub cache_key: String,

    /// Snapshot lifetime, `None` to never expire
    pub ttl: Option<Duration>,

    /// Filter reads by the current team
    pub teams: bool,

    /// `reset_worker` also drops the process-local collection
    pub reset_on_worker_reuse: bool,

    pub wildcard: WildcardSyntax,
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self::from(&PermissionConfig::default())
    }
}

impl From<&PermissionConfig> for RegistrarConfig {
    fn from(config: &PermissionConfig) -> Self {
        Self {
            cache_key: config.cache.key.clone(),
            ttl: config.cache.ttl(),
            teams: config.teams,
            reset_on_worker_reuse: config.reset_on_worker_reuse,
            wildcard: config.wildcard.clone(),
        }
    }
}

/// Registrar counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistrarStats {
    /// Loads served from the local copy or the cache backend
    pub hits: u64,
    /// Loads that found no cached snapshot
    pub misses: u64,
    /// Store queries issued
    pub loads: u64,
    /// Store queries issued because the cache backend failed
    pub degraded_loads: u64,
}

impl RegistrarStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Process-local decoded copy of the snapshot
struct LocalCopy {
    snapshot: Arc<Snapshot>,
    loaded_at: Instant,
}

/// Result of the most recent load, handed to tasks that queued behind it
enum LoadOutcome {
    Loaded(Arc<Snapshot>),
    Failed(PermissionError),
}

pub struct PermissionRegistrar {
    store: Arc<dyn PermissionStore>,
    cache: Arc<dyn CacheBackend>,
    config: RegistrarConfig,
    local: RwLock<Option<LocalCopy>>,
    load_lock: Mutex<()>,
    completed_loads: AtomicU64,
    last_outcome: RwLock<Option<LoadOutcome>>,
    team: TeamContext,
    resolver: Arc<WildcardResolver>,
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    degraded_loads: AtomicU64,
}

impl PermissionRegistrar {
    pub fn new(
        store: Arc<dyn PermissionStore>,
        cache: Arc<dyn CacheBackend>,
        config: RegistrarConfig,
    ) -> Self {
        let resolver = Arc::new(WildcardResolver::new(config.wildcard.clone()));

        debug!(
            "PermissionRegistrar using {} cache, key '{}', teams={}",
            cache.name(),
            config.cache_key,
            config.teams
        );

        Self {
            store,
            cache,
            config,
            local: RwLock::new(None),
            load_lock: Mutex::new(()),
            completed_loads: AtomicU64::new(0),
            last_outcome: RwLock::new(None),
            team: TeamContext::new(),
            resolver,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            degraded_loads: AtomicU64::new(0),
        }
    }

    /// Build a registrar with the cache backend named in `config`
    pub fn from_config(store: Arc<dyn PermissionStore>, config: &PermissionConfig) -> Self {
        Self::new(store, config.cache.build_backend(), RegistrarConfig::from(config))
    }

    /// Current snapshot, loading it from the store on a miss
    ///
    /// # Errors
    ///
    /// Store failures propagate and leave the registrar without a snapshot.
    /// Cache backend read failures are logged and answered by querying the
    /// store directly, without caching the result.
    pub async fn load_permissions(&self) -> Result<Arc<Snapshot>> {
        if let Some(snapshot) = self.local_snapshot() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(snapshot);
        }

        let ticket = self.completed_loads.load(Ordering::Acquire);
        let _guard = self.load_lock.lock().await;

        // Another task may have finished a load while we waited
        if let Some(snapshot) = self.local_snapshot() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(snapshot);
        }
        if self.completed_loads.load(Ordering::Acquire) != ticket {
            if let Some(outcome) = self.shared_outcome() {
                return outcome;
            }
        }

        let outcome = self.load_uncached().await;
        self.record_outcome(&outcome);
        outcome
    }

    /// Miss path, run under the load lock
    async fn load_uncached(&self) -> Result<Arc<Snapshot>> {
        match self.cache.get(&self.config.cache_key).await {
            Ok(Some(snapshot)) => {
                debug!("Permission snapshot found in {} cache", self.cache.name());
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.publish_local(Arc::clone(&snapshot));
                Ok(snapshot)
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let snapshot = self.query_store().await?;

                match self
                    .cache
                    .put(&self.config.cache_key, Arc::clone(&snapshot), self.config.ttl)
                    .await
                {
                    Ok(()) => self.publish_local(Arc::clone(&snapshot)),
                    Err(e) => warn!("Failed to store permission snapshot: {}", e),
                }

                Ok(snapshot)
            }
            Err(e) => {
                warn!(
                    "Cache backend '{}' unavailable, loading permissions without cache: {}",
                    self.cache.name(),
                    e
                );
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.degraded_loads.fetch_add(1, Ordering::Relaxed);
                self.query_store().await
            }
        }
    }

    /// Outcome of the load that completed while the caller waited, if still held
    fn shared_outcome(&self) -> Option<Result<Arc<Snapshot>>> {
        match self.last_outcome.read().as_ref()? {
            LoadOutcome::Loaded(snapshot) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Ok(Arc::clone(snapshot)))
            }
            LoadOutcome::Failed(e) => {
                debug!("Reusing failed permission load: {}", e);
                Some(Err(e.replicate()))
            }
        }
    }

    fn record_outcome(&self, outcome: &Result<Arc<Snapshot>>) {
        let recorded = match outcome {
            Ok(snapshot) => LoadOutcome::Loaded(Arc::clone(snapshot)),
            Err(e) => LoadOutcome::Failed(e.replicate()),
        };
        *self.last_outcome.write() = Some(recorded);
        self.completed_loads.fetch_add(1, Ordering::Release);
    }

    async fn query_store(&self) -> Result<Arc<Snapshot>> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let rows = self.store.query_full_join(None).await?;
        let snapshot = Arc::new(Snapshot::from_rows(rows));
        debug!(
            "Loaded permission snapshot with {} rows in {:?}",
            snapshot.len(),
            started.elapsed()
        );
        Ok(snapshot)
    }

    fn local_snapshot(&self) -> Option<Arc<Snapshot>> {
        let local = self.local.read();
        let copy = local.as_ref()?;
        if self
            .config
            .ttl
            .is_some_and(|ttl| copy.loaded_at.elapsed() > ttl)
        {
            return None;
        }
        Some(Arc::clone(&copy.snapshot))
    }

    fn publish_local(&self, snapshot: Arc<Snapshot>) {
        *self.local.write() = Some(LocalCopy {
            snapshot,
            loaded_at: Instant::now(),
        });
    }

    /// Read filter for `guard` and, with teams on, the current team
    pub fn visibility<'a>(&self, guard: Option<&'a str>) -> Visibility<'a> {
        let visibility = Visibility::all().maybe_guard(guard);
        if self.config.teams {
            visibility.team(self.team.get())
        } else {
            visibility
        }
    }

    /// Effective permissions of a subject, optionally restricted to a guard
    pub async fn get_permissions(
        &self,
        subject: &SubjectRef,
        guard: Option<&str>,
    ) -> Result<Vec<Permission>> {
        let snapshot = self.load_permissions().await?;
        Ok(snapshot.permissions_for(subject, &self.visibility(guard)))
    }

    /// Effective permissions under an explicit filter
    pub async fn get_permissions_in(
        &self,
        subject: &SubjectRef,
        visibility: &Visibility<'_>,
    ) -> Result<Vec<Permission>> {
        let snapshot = self.load_permissions().await?;
        Ok(snapshot.permissions_for(subject, visibility))
    }

    /// Invalidate the snapshot everywhere
    ///
    /// Returns whether the backend held an entry that was removed. A backend
    /// failure is logged and reported as `false`; the local copy is dropped
    /// either way.
    pub async fn forget_cached_permissions(&self) -> bool {
        match self.try_forget_cached_permissions().await {
            Ok(removed) => removed,
            Err(e) => {
                warn!("Failed to forget cached permissions: {}", e);
                false
            }
        }
    }

    /// Like [`forget_cached_permissions`](Self::forget_cached_permissions), but
    /// returns backend failures
    pub async fn try_forget_cached_permissions(&self) -> Result<bool> {
        self.clear_permissions_collection();
        let removed = self.cache.forget(&self.config.cache_key).await?;
        info!(
            "Permission cache '{}' invalidated (entry existed: {})",
            self.config.cache_key, removed
        );
        Ok(removed)
    }

    /// Whether the backend currently holds a live snapshot
    pub async fn cache_exists(&self) -> Result<bool> {
        self.cache.has(&self.config.cache_key).await
    }

    /// Drop the process-local copy and match cache; the backend entry stays
    pub fn clear_permissions_collection(&self) {
        *self.local.write() = None;
        *self.last_outcome.write() = None;
        self.resolver.clear_cache();
        debug!("Cleared process-local permission collection");
    }

    pub fn set_permissions_team_id(&self, team_id: Option<TeamId>) {
        self.team.set(team_id);
    }

    /// Team id in effect for the calling task
    pub fn get_permissions_team_id(&self) -> Option<TeamId> {
        self.team.get()
    }

    /// Reset per-worker state before a pooled worker serves its next job
    pub fn reset_worker(&self) {
        self.team.clear();
        if self.config.reset_on_worker_reuse {
            self.clear_permissions_collection();
        }
    }

    pub fn store(&self) -> &Arc<dyn PermissionStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<dyn CacheBackend> {
        &self.cache
    }

    pub fn config(&self) -> &RegistrarConfig {
        &self.config
    }

    pub fn teams_enabled(&self) -> bool {
        self.config.teams
    }

    /// Cached wildcard resolver, cleared with the local collection
    pub fn resolver(&self) -> &Arc<WildcardResolver> {
        &self.resolver
    }

    pub fn stats(&self) -> RegistrarStats {
        RegistrarStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            degraded_loads: self.degraded_loads.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheBackend;
    use crate::store::InMemoryPermissionStore;

    async fn registrar_with(config: RegistrarConfig) -> (PermissionRegistrar, Arc<InMemoryPermissionStore>) {
        let store = Arc::new(InMemoryPermissionStore::new());
        let edit = store.create_permission("edit", "web").await.unwrap();
        let writer = store.create_role("writer", "web", None).await.unwrap();
        store.attach_permission_to_role(writer.id, edit.id).await.unwrap();
        store
            .attach_role_to_subject(writer.id, &SubjectRef::new("user", "alice"))
            .await
            .unwrap();

        let registrar = PermissionRegistrar::new(
            store.clone(),
            Arc::new(InMemoryCacheBackend::new()),
            config,
        );
        (registrar, store)
    }

    #[tokio::test]
    async fn test_load_is_cached() {
        let (registrar, store) = registrar_with(RegistrarConfig::default()).await;

        let first = registrar.load_permissions().await.unwrap();
        let second = registrar.load_permissions().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.query_count(), 1);
        assert!(registrar.cache_exists().await.unwrap());

        let stats = registrar.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[tokio::test]
    async fn test_get_permissions() {
        let (registrar, _store) = registrar_with(RegistrarConfig::default()).await;
        let alice = SubjectRef::new("user", "alice");

        let permissions = registrar.get_permissions(&alice, Some("web")).await.unwrap();
        assert_eq!(permissions.len(), 1);
        assert_eq!(permissions[0].name, "edit");

        assert!(registrar.get_permissions(&alice, Some("api")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_forget_reloads_from_store() {
        let (registrar, store) = registrar_with(RegistrarConfig::default()).await;

        registrar.load_permissions().await.unwrap();
        assert!(registrar.forget_cached_permissions().await);
        assert!(!registrar.forget_cached_permissions().await);

        registrar.load_permissions().await.unwrap();
        assert_eq!(store.query_count(), 2);
    }

    #[tokio::test]
    async fn test_clear_collection_keeps_backend_entry() {
        let (registrar, store) = registrar_with(RegistrarConfig::default()).await;

        registrar.load_permissions().await.unwrap();
        registrar.clear_permissions_collection();
        registrar.load_permissions().await.unwrap();

        // Served from the backend, not the store
        assert_eq!(store.query_count(), 1);
    }

    #[tokio::test]
    async fn test_local_copy_expires() {
        let config = RegistrarConfig {
            ttl: Some(Duration::from_millis(20)),
            ..RegistrarConfig::default()
        };
        let (registrar, store) = registrar_with(config).await;

        registrar.load_permissions().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        registrar.load_permissions().await.unwrap();

        assert_eq!(store.query_count(), 2);
    }

    #[tokio::test]
    async fn test_worker_reset() {
        let (registrar, store) = registrar_with(RegistrarConfig::default()).await;
        registrar.set_permissions_team_id(Some(5));
        registrar.load_permissions().await.unwrap();

        registrar.reset_worker();

        assert_eq!(registrar.get_permissions_team_id(), None);
        assert!(registrar.local_snapshot().is_none());
        registrar.load_permissions().await.unwrap();
        assert_eq!(store.query_count(), 1);
    }

    #[tokio::test]
    async fn test_worker_reset_can_keep_collection() {
        let config = RegistrarConfig {
            reset_on_worker_reuse: false,
            ..RegistrarConfig::default()
        };
        let (registrar, _store) = registrar_with(config).await;
        registrar.set_permissions_team_id(Some(5));
        registrar.load_permissions().await.unwrap();

        registrar.reset_worker();

        assert_eq!(registrar.get_permissions_team_id(), None);
        assert!(registrar.local_snapshot().is_some());
    }

    #[tokio::test]
    async fn test_visibility_follows_team_setting() {
        let (registrar, _store) = registrar_with(RegistrarConfig::default()).await;
        registrar.set_permissions_team_id(Some(2));
        assert_eq!(registrar.visibility(Some("web")).team_id(), None);

        let config = RegistrarConfig {
            teams: true,
            ..RegistrarConfig::default()
        };
        let (registrar, _store) = registrar_with(config).await;
        registrar.set_permissions_team_id(Some(2));
        let visibility = registrar.visibility(None);
        assert_eq!(visibility.team_id(), Some(2));
        assert_eq!(visibility.guard_name(), None);
    }
}
