//! Permission and role storage

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{PermissionError, Result};
use crate::registrar::JoinRow;
use crate::types::{Permission, PermissionId, Role, RoleId, SubjectRef, TeamId};

/// Durable storage for permissions, roles, and their links
///
/// Attach/detach operations return `true` when they changed the link set.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Find a permission by name within a guard
    async fn find_permission_by_name(&self, name: &str, guard: &str) -> Result<Option<Permission>>;

    /// Find a permission by id within a guard
    async fn find_permission_by_id(&self, id: PermissionId, guard: &str) -> Result<Option<Permission>>;

    /// Create a permission; `Duplicate` if the name is taken for the guard
    async fn create_permission(&self, name: &str, guard: &str) -> Result<Permission>;

    /// Find a permission, creating it if missing
    ///
    /// Returns the permission and whether this call created it. A `Duplicate`
    /// from a concurrent creator is retried as a fetch.
    async fn find_or_create_permission(&self, name: &str, guard: &str) -> Result<(Permission, bool)> {
        if let Some(permission) = self.find_permission_by_name(name, guard).await? {
            return Ok((permission, false));
        }

        match self.create_permission(name, guard).await {
            Ok(permission) => Ok((permission, true)),
            Err(PermissionError::Duplicate { .. }) => {
                debug!("Permission '{}' created concurrently, fetching", name);
                self.find_permission_by_name(name, guard)
                    .await?
                    .map(|permission| (permission, false))
                    .ok_or_else(|| PermissionError::permission_named(name, guard))
            }
            Err(e) => Err(e),
        }
    }

    /// Find a role by name within a guard and team
    async fn find_role_by_name(&self, name: &str, guard: &str, team_id: Option<TeamId>) -> Result<Option<Role>>;

    /// Find a role by id within a guard
    async fn find_role_by_id(&self, id: RoleId, guard: &str) -> Result<Option<Role>>;

    /// Create a role; `Duplicate` if the name is taken for the guard and team
    async fn create_role(&self, name: &str, guard: &str, team_id: Option<TeamId>) -> Result<Role>;

    async fn attach_permission_to_role(&self, role_id: RoleId, permission_id: PermissionId) -> Result<bool>;

    async fn detach_permission_from_role(&self, role_id: RoleId, permission_id: PermissionId) -> Result<bool>;

    async fn attach_role_to_subject(&self, role_id: RoleId, subject: &SubjectRef) -> Result<bool>;

    async fn detach_role_from_subject(&self, role_id: RoleId, subject: &SubjectRef) -> Result<bool>;

    async fn attach_permission_to_subject(
        &self,
        permission_id: PermissionId,
        subject: &SubjectRef,
        team_id: Option<TeamId>,
    ) -> Result<bool>;

    async fn detach_permission_from_subject(
        &self,
        permission_id: PermissionId,
        subject: &SubjectRef,
        team_id: Option<TeamId>,
    ) -> Result<bool>;

    /// The full permission ↔ role ↔ subject join, ordered by id
    ///
    /// With a team id, rows of other teams are left out; global rows stay.
    async fn query_full_join(&self, team_id: Option<TeamId>) -> Result<Vec<JoinRow>>;
}

/// Serializable store contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct StoreState {
    next_permission_id: PermissionId,
    next_role_id: RoleId,
    permissions: BTreeMap<PermissionId, Permission>,
    roles: BTreeMap<RoleId, Role>,
    role_has_permissions: BTreeSet<(RoleId, PermissionId)>,
    subject_has_roles: BTreeSet<(SubjectRef, RoleId)>,
    subject_has_permissions: BTreeSet<(SubjectRef, PermissionId, Option<TeamId>)>,
}

impl StoreState {
    fn permission(&self, id: PermissionId) -> Result<&Permission> {
        self.permissions
            .get(&id)
            .ok_or_else(|| PermissionError::permission_id(id))
    }

    fn role(&self, id: RoleId) -> Result<&Role> {
        self.roles.get(&id).ok_or_else(|| PermissionError::role_id(id))
    }
}

/// In-memory permission store, optionally persisted as a JSON file
pub struct InMemoryPermissionStore {
    state: Arc<RwLock<StoreState>>,
    join_queries: AtomicUsize,
}

impl InMemoryPermissionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::from_state(StoreState::default())
    }

    fn from_state(state: StoreState) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
            join_queries: AtomicUsize::new(0),
        }
    }

    /// Load a store saved with [`save`](Self::save); a missing file is an empty store
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Self::from_state(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No store file at {}, starting empty", path.display());
                Ok(Self::new())
            }
            Err(e) => Err(PermissionError::StoreUnavailable(format!(
                "{}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Write the store contents as JSON
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = {
            let state = self.state.read().await;
            serde_json::to_vec_pretty(&*state)?
        };
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    /// Number of full-join queries served
    pub fn query_count(&self) -> usize {
        self.join_queries.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryPermissionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PermissionStore for InMemoryPermissionStore {
    async fn find_permission_by_name(&self, name: &str, guard: &str) -> Result<Option<Permission>> {
        let state = self.state.read().await;
        Ok(state
            .permissions
            .values()
            .find(|p| p.name == name && p.guard == guard)
            .cloned())
    }

    async fn find_permission_by_id(&self, id: PermissionId, guard: &str) -> Result<Option<Permission>> {
        let state = self.state.read().await;
        Ok(state.permissions.get(&id).filter(|p| p.guard == guard).cloned())
    }

    async fn create_permission(&self, name: &str, guard: &str) -> Result<Permission> {
        let mut state = self.state.write().await;

        if state
            .permissions
            .values()
            .any(|p| p.name == name && p.guard == guard)
        {
            return Err(PermissionError::Duplicate {
                kind: "permission",
                name: name.to_string(),
                guard: guard.to_string(),
            });
        }

        state.next_permission_id += 1;
        let permission = Permission::new(state.next_permission_id, name, guard);
        state.permissions.insert(permission.id, permission.clone());
        Ok(permission)
    }

    async fn find_role_by_name(&self, name: &str, guard: &str, team_id: Option<TeamId>) -> Result<Option<Role>> {
        let state = self.state.read().await;
        Ok(state
            .roles
            .values()
            .find(|r| r.name == name && r.guard == guard && r.team_id == team_id)
            .cloned())
    }

    async fn find_role_by_id(&self, id: RoleId, guard: &str) -> Result<Option<Role>> {
        let state = self.state.read().await;
        Ok(state.roles.get(&id).filter(|r| r.guard == guard).cloned())
    }

    async fn create_role(&self, name: &str, guard: &str, team_id: Option<TeamId>) -> Result<Role> {
        let mut state = self.state.write().await;

        if state
            .roles
            .values()
            .any(|r| r.name == name && r.guard == guard && r.team_id == team_id)
        {
            return Err(PermissionError::Duplicate {
                kind: "role",
                name: name.to_string(),
                guard: guard.to_string(),
            });
        }

        state.next_role_id += 1;
        let role = Role::new(state.next_role_id, name, guard, team_id);
        state.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn attach_permission_to_role(&self, role_id: RoleId, permission_id: PermissionId) -> Result<bool> {
        let mut state = self.state.write().await;
        let role_guard = state.role(role_id)?.guard.clone();
        let permission = state.permission(permission_id)?;
        if permission.guard != role_guard {
            return Err(PermissionError::InvalidInput(format!(
                "permission `{}` (guard `{}`) cannot be given to a role of guard `{}`",
                permission.name, permission.guard, role_guard
            )));
        }
        Ok(state.role_has_permissions.insert((role_id, permission_id)))
    }

    async fn detach_permission_from_role(&self, role_id: RoleId, permission_id: PermissionId) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state.role_has_permissions.remove(&(role_id, permission_id)))
    }

    async fn attach_role_to_subject(&self, role_id: RoleId, subject: &SubjectRef) -> Result<bool> {
        let mut state = self.state.write().await;
        state.role(role_id)?;
        Ok(state.subject_has_roles.insert((subject.clone(), role_id)))
    }

    async fn detach_role_from_subject(&self, role_id: RoleId, subject: &SubjectRef) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state.subject_has_roles.remove(&(subject.clone(), role_id)))
    }

    async fn attach_permission_to_subject(
        &self,
        permission_id: PermissionId,
        subject: &SubjectRef,
        team_id: Option<TeamId>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        state.permission(permission_id)?;
        Ok(state
            .subject_has_permissions
            .insert((subject.clone(), permission_id, team_id)))
    }

    async fn detach_permission_from_subject(
        &self,
        permission_id: PermissionId,
        subject: &SubjectRef,
        team_id: Option<TeamId>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state
            .subject_has_permissions
            .remove(&(subject.clone(), permission_id, team_id)))
    }

    async fn query_full_join(&self, team_id: Option<TeamId>) -> Result<Vec<JoinRow>> {
        self.join_queries.fetch_add(1, Ordering::SeqCst);
        let state = self.state.read().await;
        let mut rows = Vec::new();

        for permission in state.permissions.values() {
            rows.push(JoinRow::permission(permission));
        }

        for role in state.roles.values() {
            rows.push(JoinRow::role(role));
        }

        for (role_id, permission_id) in &state.role_has_permissions {
            let role = state.role(*role_id)?;
            let permission = state.permission(*permission_id)?;
            rows.push(JoinRow::role_permission(role, permission));
        }

        for (subject, role_id) in &state.subject_has_roles {
            let role = state.role(*role_id)?;
            let granted: Vec<&Permission> = state
                .role_has_permissions
                .range((*role_id, PermissionId::MIN)..=(*role_id, PermissionId::MAX))
                .filter_map(|(_, permission_id)| state.permissions.get(permission_id))
                .collect();

            if granted.is_empty() {
                rows.push(JoinRow::assignment(role, subject, None));
            }
            for permission in granted {
                rows.push(JoinRow::assignment(role, subject, Some(permission)));
            }
        }

        for (subject, permission_id, link_team) in &state.subject_has_permissions {
            let permission = state.permission(*permission_id)?;
            rows.push(JoinRow::direct(permission, subject, *link_team));
        }

        if let Some(team_id) = team_id {
            rows.retain(|row| row.team_id.is_none() || row.team_id == Some(team_id));
        }

        debug!("Full join produced {} rows", rows.len());
        Ok(rows)
    }
}
