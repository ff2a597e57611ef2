//! Immutable materialization of the permission / role / subject-link graph

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::warn;

use crate::types::{Permission, PermissionId, Role, RoleId, SubjectRef, TeamId};

/// One row of the permission ↔ role ↔ subject join
///
/// Which optional columns are filled tells the row kind:
///
/// | permission | role | subject | meaning |
/// |---|---|---|---|
/// | ✓ | | | permission exists |
/// | | ✓ | | role exists |
/// | ✓ | ✓ | | role grants permission |
/// | ✓ | | ✓ | permission granted directly to subject |
/// | ? | ✓ | ✓ | subject holds role (and, if present, the role grants the permission) |
///
/// `team_id` is the role's team on rows with a role, and the link's team on
/// direct-permission rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRow {
    pub permission_id: Option<PermissionId>,
    pub permission_name: Option<String>,
    pub guard: String,
    pub role_id: Option<RoleId>,
    pub role_name: Option<String>,
    pub team_id: Option<TeamId>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
}

impl JoinRow {
    fn blank(guard: &str) -> Self {
        Self {
            permission_id: None,
            permission_name: None,
            guard: guard.to_string(),
            role_id: None,
            role_name: None,
            team_id: None,
            entity_type: None,
            entity_id: None,
        }
    }

    fn with_permission(mut self, permission: &Permission) -> Self {
        self.permission_id = Some(permission.id);
        self.permission_name = Some(permission.name.clone());
        self
    }

    fn with_role(mut self, role: &Role) -> Self {
        self.role_id = Some(role.id);
        self.role_name = Some(role.name.clone());
        self.team_id = role.team_id;
        self
    }

    fn with_subject(mut self, subject: &SubjectRef) -> Self {
        self.entity_type = Some(subject.entity_type.clone());
        self.entity_id = Some(subject.entity_id.clone());
        self
    }

    /// Catalog row for a permission
    pub fn permission(permission: &Permission) -> Self {
        Self::blank(&permission.guard).with_permission(permission)
    }

    /// Catalog row for a role
    pub fn role(role: &Role) -> Self {
        Self::blank(&role.guard).with_role(role)
    }

    /// Role grants permission
    pub fn role_permission(role: &Role, permission: &Permission) -> Self {
        Self::role(role).with_permission(permission)
    }

    /// Subject holds role, optionally joined with one permission of the role
    pub fn assignment(role: &Role, subject: &SubjectRef, permission: Option<&Permission>) -> Self {
        let row = Self::role(role).with_subject(subject);
        match permission {
            Some(permission) => row.with_permission(permission),
            None => row,
        }
    }

    /// Permission granted directly to subject, under an optional team
    pub fn direct(permission: &Permission, subject: &SubjectRef, team_id: Option<TeamId>) -> Self {
        let mut row = Self::permission(permission).with_subject(subject);
        row.team_id = team_id;
        row
    }

    /// Permission columns as a value, if present
    pub fn to_permission(&self) -> Option<Permission> {
        Some(Permission::new(
            self.permission_id?,
            self.permission_name.clone()?,
            self.guard.clone(),
        ))
    }

    /// Role columns as a value, if present
    pub fn to_role(&self) -> Option<Role> {
        Some(Role::new(
            self.role_id?,
            self.role_name.clone()?,
            self.guard.clone(),
            self.team_id,
        ))
    }

    /// Subject columns as a reference, if present
    pub fn subject(&self) -> Option<SubjectRef> {
        match (&self.entity_type, &self.entity_id) {
            (Some(entity_type), Some(entity_id)) => {
                Some(SubjectRef::new(entity_type.clone(), entity_id.clone()))
            }
            _ => None,
        }
    }
}

/// Guard and team filter applied to snapshot reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Visibility<'a> {
    guard: Option<&'a str>,
    teams: bool,
    team_id: Option<TeamId>,
}

impl<'a> Visibility<'a> {
    /// No guard filter, team scoping off
    pub fn all() -> Self {
        Self {
            guard: None,
            teams: false,
            team_id: None,
        }
    }

    /// Restrict to a guard
    pub fn guard(mut self, guard: &'a str) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Restrict to an optional guard
    pub fn maybe_guard(mut self, guard: Option<&'a str>) -> Self {
        self.guard = guard;
        self
    }

    /// Enable team scoping for the given team context
    pub fn team(mut self, team_id: Option<TeamId>) -> Self {
        self.teams = true;
        self.team_id = team_id;
        self
    }

    /// Guard this view is restricted to, if any
    pub fn guard_name(&self) -> Option<&'a str> {
        self.guard
    }

    /// Team context, if team scoping is on
    pub fn team_id(&self) -> Option<TeamId> {
        self.team_id
    }

    fn admits_guard(&self, guard: &str) -> bool {
        self.guard.map_or(true, |g| g == guard)
    }

    /// Global rows are visible in every team; team rows only in their own team
    fn admits_team(&self, team_id: Option<TeamId>) -> bool {
        !self.teams || team_id.is_none() || team_id == self.team_id
    }
}

impl Default for Visibility<'_> {
    fn default() -> Self {
        Self::all()
    }
}

/// Permission snapshot built from join rows, with lookup indexes
///
/// Snapshots are never patched; the registrar replaces them whole.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<JoinRow>", into = "Vec<JoinRow>")]
pub struct Snapshot {
    rows: Vec<JoinRow>,
    permissions: HashMap<PermissionId, Permission>,
    roles: HashMap<RoleId, Role>,
    role_permissions: HashMap<RoleId, BTreeSet<PermissionId>>,
    subject_roles: HashMap<SubjectRef, BTreeSet<RoleId>>,
    subject_permissions: HashMap<SubjectRef, BTreeSet<(Option<TeamId>, PermissionId)>>,
}

impl Snapshot {
    /// Builds a snapshot, dropping rows that would break name uniqueness
    pub fn from_rows(rows: Vec<JoinRow>) -> Self {
        let mut snapshot = Snapshot::default();
        let mut permission_keys: HashMap<(String, String), PermissionId> = HashMap::new();
        let mut role_keys: HashMap<(String, String, Option<TeamId>), RoleId> = HashMap::new();
        let mut rejected: HashSet<usize> = HashSet::new();

        for (idx, row) in rows.iter().enumerate() {
            let permission = row.to_permission();
            let role = row.to_role();

            if let Some(permission) = &permission {
                let key = (permission.name.clone(), permission.guard.clone());
                let owner = *permission_keys.entry(key).or_insert(permission.id);
                let known = snapshot.permissions.get(&permission.id);
                if owner != permission.id || known.is_some_and(|p| p != permission) {
                    warn!(
                        "Dropping row for permission '{}' (id {}): conflicts with an existing entry",
                        permission.name, permission.id
                    );
                    rejected.insert(idx);
                    continue;
                }
            }

            if let Some(role) = &role {
                let key = (role.name.clone(), role.guard.clone(), role.team_id);
                let owner = *role_keys.entry(key).or_insert(role.id);
                let known = snapshot.roles.get(&role.id);
                if owner != role.id || known.is_some_and(|r| r != role) {
                    warn!(
                        "Dropping row for role '{}' (id {}): conflicts with an existing entry",
                        role.name, role.id
                    );
                    rejected.insert(idx);
                    continue;
                }
            }

            let subject = row.subject();

            if let (Some(role), Some(subject)) = (&role, &subject) {
                snapshot
                    .subject_roles
                    .entry(subject.clone())
                    .or_default()
                    .insert(role.id);
            }

            match (&permission, &role, subject) {
                (Some(permission), Some(role), _) => {
                    snapshot
                        .role_permissions
                        .entry(role.id)
                        .or_default()
                        .insert(permission.id);
                }
                (Some(permission), None, Some(subject)) => {
                    snapshot
                        .subject_permissions
                        .entry(subject)
                        .or_default()
                        .insert((row.team_id, permission.id));
                }
                _ => {}
            }

            if let Some(permission) = permission {
                snapshot.permissions.entry(permission.id).or_insert(permission);
            }
            if let Some(role) = role {
                snapshot.roles.entry(role.id).or_insert(role);
            }
        }

        snapshot.rows = rows
            .into_iter()
            .enumerate()
            .filter(|(idx, _)| !rejected.contains(idx))
            .map(|(_, row)| row)
            .collect();

        snapshot
    }

    /// Rows the snapshot was built from
    pub fn rows(&self) -> &[JoinRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn permission(&self, id: PermissionId) -> Option<&Permission> {
        self.permissions.get(&id)
    }

    pub fn role(&self, id: RoleId) -> Option<&Role> {
        self.roles.get(&id)
    }

    /// Finds a permission by name within a guard
    pub fn find_permission(&self, name: &str, guard: &str) -> Option<&Permission> {
        self.permissions
            .values()
            .find(|p| p.name == name && p.guard == guard)
    }

    /// All permissions visible under the filter, sorted by id
    pub fn permissions(&self, visibility: &Visibility<'_>) -> Vec<Permission> {
        let mut permissions: Vec<Permission> = self
            .permissions
            .values()
            .filter(|p| visibility.admits_guard(&p.guard))
            .cloned()
            .collect();
        permissions.sort_by_key(|p| p.id);
        permissions
    }

    /// All roles visible under the filter, sorted by id
    pub fn roles(&self, visibility: &Visibility<'_>) -> Vec<Role> {
        let mut roles: Vec<Role> = self
            .roles
            .values()
            .filter(|r| visibility.admits_guard(&r.guard) && visibility.admits_team(r.team_id))
            .cloned()
            .collect();
        roles.sort_by_key(|r| r.id);
        roles
    }

    /// Permissions a role grants, sorted by id
    pub fn role_permissions(&self, role_id: RoleId) -> Vec<Permission> {
        self.collect_permissions(
            self.role_permissions
                .get(&role_id)
                .into_iter()
                .flatten()
                .copied(),
            &Visibility::all(),
        )
    }

    /// Roles assigned to a subject, sorted by id
    pub fn roles_for(&self, subject: &SubjectRef, visibility: &Visibility<'_>) -> Vec<Role> {
        let mut roles: Vec<Role> = self
            .subject_roles
            .get(subject)
            .into_iter()
            .flatten()
            .filter_map(|id| self.roles.get(id))
            .filter(|r| visibility.admits_guard(&r.guard) && visibility.admits_team(r.team_id))
            .cloned()
            .collect();
        roles.sort_by_key(|r| r.id);
        roles
    }

    /// Permissions linked directly to a subject
    pub fn direct_permissions_for(
        &self,
        subject: &SubjectRef,
        visibility: &Visibility<'_>,
    ) -> Vec<Permission> {
        let ids = self
            .subject_permissions
            .get(subject)
            .into_iter()
            .flatten()
            .filter(|(team_id, _)| visibility.admits_team(*team_id))
            .map(|(_, id)| *id);
        self.collect_permissions(ids, visibility)
    }

    /// Permissions a subject holds through its roles
    pub fn permissions_via_roles(
        &self,
        subject: &SubjectRef,
        visibility: &Visibility<'_>,
    ) -> Vec<Permission> {
        let ids: Vec<PermissionId> = self
            .roles_for(subject, visibility)
            .iter()
            .filter_map(|role| self.role_permissions.get(&role.id))
            .flatten()
            .copied()
            .collect();
        self.collect_permissions(ids, visibility)
    }

    /// Effective permissions: direct ∪ via roles
    pub fn permissions_for(&self, subject: &SubjectRef, visibility: &Visibility<'_>) -> Vec<Permission> {
        let mut permissions = self.direct_permissions_for(subject, visibility);
        permissions.extend(self.permissions_via_roles(subject, visibility));
        permissions.sort_by_key(|p| p.id);
        permissions.dedup_by_key(|p| p.id);
        permissions
    }

    fn collect_permissions<I>(&self, ids: I, visibility: &Visibility<'_>) -> Vec<Permission>
    where
        I: IntoIterator<Item = PermissionId>,
    {
        let ids: BTreeSet<PermissionId> = ids.into_iter().collect();
        ids.iter()
            .filter_map(|id| self.permissions.get(id))
            .filter(|p| visibility.admits_guard(&p.guard))
            .cloned()
            .collect()
    }
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.rows == other.rows
    }
}

impl Eq for Snapshot {}

impl From<Vec<JoinRow>> for Snapshot {
    fn from(rows: Vec<JoinRow>) -> Self {
        Self::from_rows(rows)
    }
}

impl From<Snapshot> for Vec<JoinRow> {
    fn from(snapshot: Snapshot) -> Self {
        snapshot.rows
    }
}
