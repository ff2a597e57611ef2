//! Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use gatehouse_permission::{
    CacheBackend, InMemoryCacheBackend, InMemoryPermissionStore, JoinRow, Permission,
    PermissionError, PermissionId, PermissionStore, Result, Role, RoleId, Snapshot, SubjectRef,
    TeamId,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Store wrapper that counts full-join queries and can delay or fail them
pub struct InstrumentedStore {
    inner: InMemoryPermissionStore,
    queries: AtomicUsize,
    delay: Duration,
    failing: AtomicBool,
}

impl InstrumentedStore {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            inner: InMemoryPermissionStore::new(),
            queries: AtomicUsize::new(0),
            delay,
            failing: AtomicBool::new(false),
        }
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl PermissionStore for InstrumentedStore {
    async fn find_permission_by_name(&self, name: &str, guard: &str) -> Result<Option<Permission>> {
        self.inner.find_permission_by_name(name, guard).await
    }

    async fn find_permission_by_id(&self, id: PermissionId, guard: &str) -> Result<Option<Permission>> {
        self.inner.find_permission_by_id(id, guard).await
    }

    async fn create_permission(&self, name: &str, guard: &str) -> Result<Permission> {
        self.inner.create_permission(name, guard).await
    }

    async fn find_role_by_name(&self, name: &str, guard: &str, team_id: Option<TeamId>) -> Result<Option<Role>> {
        self.inner.find_role_by_name(name, guard, team_id).await
    }

    async fn find_role_by_id(&self, id: RoleId, guard: &str) -> Result<Option<Role>> {
        self.inner.find_role_by_id(id, guard).await
    }

    async fn create_role(&self, name: &str, guard: &str, team_id: Option<TeamId>) -> Result<Role> {
        self.inner.create_role(name, guard, team_id).await
    }

    async fn attach_permission_to_role(&self, role_id: RoleId, permission_id: PermissionId) -> Result<bool> {
        self.inner.attach_permission_to_role(role_id, permission_id).await
    }

    async fn detach_permission_from_role(&self, role_id: RoleId, permission_id: PermissionId) -> Result<bool> {
        self.inner.detach_permission_from_role(role_id, permission_id).await
    }

    async fn attach_role_to_subject(&self, role_id: RoleId, subject: &SubjectRef) -> Result<bool> {
        self.inner.attach_role_to_subject(role_id, subject).await
    }

    async fn detach_role_from_subject(&self, role_id: RoleId, subject: &SubjectRef) -> Result<bool> {
        self.inner.detach_role_from_subject(role_id, subject).await
    }

    async fn attach_permission_to_subject(
        &self,
        permission_id: PermissionId,
        subject: &SubjectRef,
        team_id: Option<TeamId>,
    ) -> Result<bool> {
        self.inner
            .attach_permission_to_subject(permission_id, subject, team_id)
            .await
    }

    async fn detach_permission_from_subject(
        &self,
        permission_id: PermissionId,
        subject: &SubjectRef,
        team_id: Option<TeamId>,
    ) -> Result<bool> {
        self.inner
            .detach_permission_from_subject(permission_id, subject, team_id)
            .await
    }

    async fn query_full_join(&self, team_id: Option<TeamId>) -> Result<Vec<JoinRow>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(PermissionError::StoreUnavailable("connection refused".into()));
        }
        self.inner.query_full_join(team_id).await
    }
}

/// Cache backend that can be switched into an outage
#[derive(Default)]
pub struct FlakyCache {
    inner: InMemoryCacheBackend,
    failing: AtomicBool,
    forget_failing: AtomicBool,
}

impl FlakyCache {
    pub fn failing() -> Self {
        let cache = Self::default();
        cache.set_failing(true);
        cache
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fail only `forget`, leaving reads and writes working
    pub fn set_forget_failing(&self, failing: bool) {
        self.forget_failing.store(failing, Ordering::SeqCst);
    }

    /// Whether an entry is held, bypassing failure injection
    pub fn holds_entry(&self) -> bool {
        !self.inner.is_empty()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PermissionError::CacheBackend("cache unreachable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for FlakyCache {
    async fn get(&self, key: &str) -> Result<Option<Arc<Snapshot>>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, snapshot: Arc<Snapshot>, ttl: Option<Duration>) -> Result<()> {
        self.check()?;
        self.inner.put(key, snapshot, ttl).await
    }

    async fn forget(&self, key: &str) -> Result<bool> {
        self.check()?;
        if self.forget_failing.load(Ordering::SeqCst) {
            return Err(PermissionError::CacheBackend("forget rejected".into()));
        }
        self.inner.forget(key).await
    }

    async fn has(&self, key: &str) -> Result<bool> {
        self.check()?;
        self.inner.has(key).await
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

/// A subject with a fixed guard, like an API client
pub struct ApiClient {
    pub id: u32,
}

impl gatehouse_permission::HasRoles for ApiClient {
    fn subject_ref(&self) -> SubjectRef {
        SubjectRef::new("api_client", self.id.to_string())
    }

    fn guard_name(&self) -> Option<&str> {
        Some("api")
    }
}

pub fn user(id: &str) -> SubjectRef {
    SubjectRef::new("user", id)
}
