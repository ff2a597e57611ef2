//! Role and permission grants
//!
//! Every grant runs in the same order: store write, then events, then cache
//! invalidation. Invalidation also runs when a store write fails part way,
//! since earlier links may already have changed. A write whose invalidation
//! fails returns the cache error: the shared snapshot may still show the
//! old links until it expires or is flushed.

use futures::future::try_join_all;
use std::collections::BTreeSet;
use std::future::Future;
use tracing::{info, warn};

use super::Authorizer;
use crate::error::{PermissionError, Result};
use crate::events::{EventTarget, PermissionEvent};
use crate::types::{HasRoles, Permission, PermissionId, PermissionKey, Role, RoleId, RoleKey, TeamId};

/// Runs `link` over `items`, collecting ids whose link changed
///
/// Stops at the first error, returning the ids changed before it.
async fn apply_links<'a, T, F, Fut>(items: &'a [T], mut link: F) -> (Vec<u64>, Result<()>)
where
    F: FnMut(&'a T) -> Fut,
    Fut: Future<Output = Result<Option<u64>>>,
{
    let mut changed = Vec::new();
    for item in items {
        match link(item).await {
            Ok(Some(id)) => changed.push(id),
            Ok(None) => {}
            Err(e) => return (changed, Err(e)),
        }
    }
    (changed, Ok(()))
}

fn require_name(kind: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(PermissionError::InvalidInput(format!("{} name cannot be empty", kind)));
    }
    Ok(())
}

impl Authorizer {
    /// Team new links and roles are created under
    fn write_team(&self) -> Option<TeamId> {
        if self.registrar.teams_enabled() {
            self.registrar.get_permissions_team_id()
        } else {
            None
        }
    }

    fn default_guard<'a>(&'a self, guard: Option<&'a str>) -> &'a str {
        guard.unwrap_or(self.config.default_guard.as_str())
    }

    /// Dispatch the event for `changed` ids, if any, then invalidate
    ///
    /// A store error in `outcome` wins over an invalidation error.
    async fn finish<T, F>(&self, outcome: Result<T>, changed: Vec<u64>, event: F) -> Result<T>
    where
        F: FnOnce(Vec<u64>) -> PermissionEvent,
    {
        if !changed.is_empty() {
            self.events.dispatch(event(changed));
        }
        let invalidated = self.invalidate().await;
        let value = outcome?;
        invalidated?;
        Ok(value)
    }

    async fn invalidate(&self) -> Result<()> {
        match self.registrar.try_forget_cached_permissions().await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!("Permission cache not invalidated after write: {}", e);
                Err(e)
            }
        }
    }

    async fn find_role(&self, key: &RoleKey, guard: &str) -> Result<Role> {
        let store = self.registrar.store();
        let team = self.write_team();

        let found = match key {
            RoleKey::Id(id) => store.find_role_by_id(*id, guard).await?,
            RoleKey::Name(name) => match store.find_role_by_name(name, guard, team).await? {
                Some(role) => Some(role),
                None if team.is_some() => store.find_role_by_name(name, guard, None).await?,
                None => None,
            },
        };

        // Roles of another team are invisible from this one
        let visible = found.filter(|role| {
            !self.registrar.teams_enabled() || role.team_id.is_none() || role.team_id == team
        });

        visible.ok_or_else(|| match key {
            RoleKey::Id(id) => PermissionError::role_id(*id),
            RoleKey::Name(name) => PermissionError::role_named(name, guard),
        })
    }

    async fn find_permission(&self, key: &PermissionKey, guard: &str) -> Result<Permission> {
        let store = self.registrar.store();
        let found = match key {
            PermissionKey::Id(id) => store.find_permission_by_id(*id, guard).await?,
            PermissionKey::Name(name) => store.find_permission_by_name(name, guard).await?,
        };

        found.ok_or_else(|| match key {
            PermissionKey::Id(id) => PermissionError::permission_id(*id),
            PermissionKey::Name(name) => PermissionError::permission_named(name, guard),
        })
    }

    async fn find_roles<I, R>(&self, roles: I, guard: &str) -> Result<Vec<Role>>
    where
        I: IntoIterator<Item = R>,
        R: Into<RoleKey>,
    {
        let keys: Vec<RoleKey> = roles.into_iter().map(Into::into).collect();
        try_join_all(keys.iter().map(|key| self.find_role(key, guard))).await
    }

    async fn find_permissions<I, P>(&self, permissions: I, guard: &str) -> Result<Vec<Permission>>
    where
        I: IntoIterator<Item = P>,
        P: Into<PermissionKey>,
    {
        let keys: Vec<PermissionKey> = permissions.into_iter().map(Into::into).collect();
        try_join_all(keys.iter().map(|key| self.find_permission(key, guard))).await
    }

    /// Assign roles to a subject
    ///
    /// All roles are resolved before any link is written; an unknown role
    /// fails the call without changes.
    pub async fn assign_role<S, I, R>(&self, subject: &S, roles: I) -> Result<()>
    where
        S: HasRoles + ?Sized,
        I: IntoIterator<Item = R>,
        R: Into<RoleKey>,
    {
        let guard = self.guard_for(subject, None);
        let roles = self.find_roles(roles, guard).await?;
        let subject_ref = subject.subject_ref();
        let store = self.registrar.store();

        let (attached, outcome) = apply_links(&roles, |role| {
            let subject_ref = &subject_ref;
            async move {
                let changed = store.attach_role_to_subject(role.id, subject_ref).await?;
                Ok(changed.then_some(role.id))
            }
        })
        .await;

        self.finish(outcome, attached, |ids| {
            PermissionEvent::role_attached(EventTarget::Subject(subject_ref.clone()), ids)
        })
        .await
    }

    /// Remove a role from a subject, returning whether it was assigned
    pub async fn remove_role<S>(&self, subject: &S, role: impl Into<RoleKey>) -> Result<bool>
    where
        S: HasRoles + ?Sized,
    {
        let guard = self.guard_for(subject, None);
        let role = self.find_role(&role.into(), guard).await?;
        let subject_ref = subject.subject_ref();

        let outcome = self
            .registrar
            .store()
            .detach_role_from_subject(role.id, &subject_ref)
            .await;

        let changed = matches!(outcome, Ok(true)).then_some(role.id);
        self.finish(outcome, changed.into_iter().collect(), |ids| {
            PermissionEvent::role_detached(EventTarget::Subject(subject_ref.clone()), ids)
        })
        .await
    }

    /// Make the subject's roles exactly `roles`
    pub async fn sync_roles<S, I, R>(&self, subject: &S, roles: I) -> Result<()>
    where
        S: HasRoles + ?Sized,
        I: IntoIterator<Item = R>,
        R: Into<RoleKey>,
    {
        let guard = self.guard_for(subject, None);
        let wanted = self.find_roles(roles, guard).await?;
        let current = self.get_roles(subject, Some(guard)).await?;

        let wanted_ids: BTreeSet<RoleId> = wanted.iter().map(|r| r.id).collect();
        let current_ids: BTreeSet<RoleId> = current.iter().map(|r| r.id).collect();
        let to_detach: Vec<RoleId> = current_ids.difference(&wanted_ids).copied().collect();
        let to_attach: Vec<RoleId> = wanted_ids.difference(&current_ids).copied().collect();

        let subject_ref = subject.subject_ref();
        let store = self.registrar.store();

        let (detached, outcome) = apply_links(&to_detach, |role_id| {
            let subject_ref = &subject_ref;
            async move {
                let changed = store.detach_role_from_subject(*role_id, subject_ref).await?;
                Ok(changed.then_some(*role_id))
            }
        })
        .await;

        if !detached.is_empty() {
            self.events.dispatch(PermissionEvent::role_detached(
                EventTarget::Subject(subject_ref.clone()),
                detached,
            ));
        }
        if let Err(e) = outcome {
            return self
                .finish(Err(e), Vec::new(), |ids| {
                    PermissionEvent::role_detached(EventTarget::Subject(subject_ref.clone()), ids)
                })
                .await;
        }

        let (attached, outcome) = apply_links(&to_attach, |role_id| {
            let subject_ref = &subject_ref;
            async move {
                let changed = store.attach_role_to_subject(*role_id, subject_ref).await?;
                Ok(changed.then_some(*role_id))
            }
        })
        .await;

        self.finish(outcome, attached, |ids| {
            PermissionEvent::role_attached(EventTarget::Subject(subject_ref.clone()), ids)
        })
        .await
    }

    /// Grant permissions directly to a subject, under the current team
    pub async fn give_permission_to<S, I, P>(&self, subject: &S, permissions: I) -> Result<()>
    where
        S: HasRoles + ?Sized,
        I: IntoIterator<Item = P>,
        P: Into<PermissionKey>,
    {
        let guard = self.guard_for(subject, None);
        let permissions = self.find_permissions(permissions, guard).await?;
        let subject_ref = subject.subject_ref();
        let team = self.write_team();
        let store = self.registrar.store();

        let (attached, outcome) = apply_links(&permissions, |permission| {
            let subject_ref = &subject_ref;
            async move {
                let changed = store
                    .attach_permission_to_subject(permission.id, subject_ref, team)
                    .await?;
                Ok(changed.then_some(permission.id))
            }
        })
        .await;

        self.finish(outcome, attached, |ids| {
            PermissionEvent::permission_attached(EventTarget::Subject(subject_ref.clone()), ids)
        })
        .await
    }

    /// Revoke a direct permission, returning whether the subject had it
    pub async fn revoke_permission_to<S>(&self, subject: &S, permission: impl Into<PermissionKey>) -> Result<bool>
    where
        S: HasRoles + ?Sized,
    {
        let guard = self.guard_for(subject, None);
        let permission = self.find_permission(&permission.into(), guard).await?;
        let subject_ref = subject.subject_ref();

        let outcome = self
            .registrar
            .store()
            .detach_permission_from_subject(permission.id, &subject_ref, self.write_team())
            .await;

        let changed = matches!(outcome, Ok(true)).then_some(permission.id);
        self.finish(outcome, changed.into_iter().collect(), |ids| {
            PermissionEvent::permission_detached(EventTarget::Subject(subject_ref.clone()), ids)
        })
        .await
    }

    /// Grant permissions to a role; permissions resolve in the role's guard
    pub async fn give_permission_to_role<I, P>(&self, role: &Role, permissions: I) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: Into<PermissionKey>,
    {
        let permissions = self.find_permissions(permissions, &role.guard).await?;
        let store = self.registrar.store();

        let (attached, outcome) = apply_links(&permissions, |permission| async move {
            let changed = store.attach_permission_to_role(role.id, permission.id).await?;
            Ok(changed.then_some(permission.id))
        })
        .await;

        self.finish(outcome, attached, |ids| {
            PermissionEvent::permission_attached(EventTarget::Role { role_id: role.id }, ids)
        })
        .await
    }

    /// Revoke a permission from a role, returning whether the role had it
    pub async fn revoke_permission_from_role(&self, role: &Role, permission: impl Into<PermissionKey>) -> Result<bool> {
        let permission = self.find_permission(&permission.into(), &role.guard).await?;

        let outcome = self
            .registrar
            .store()
            .detach_permission_from_role(role.id, permission.id)
            .await;

        let changed: Option<PermissionId> = matches!(outcome, Ok(true)).then_some(permission.id);
        self.finish(outcome, changed.into_iter().collect(), |ids| {
            PermissionEvent::permission_detached(EventTarget::Role { role_id: role.id }, ids)
        })
        .await
    }

    /// Create a role in the current team
    ///
    /// # Errors
    ///
    /// `Duplicate` if the name is taken for the guard and team.
    pub async fn create_role(&self, name: &str, guard: Option<&str>) -> Result<Role> {
        require_name("role", name)?;
        let guard = self.default_guard(guard);
        let role = self
            .registrar
            .store()
            .create_role(name, guard, self.write_team())
            .await?;

        info!("Created role '{}' for guard '{}'", role.name, role.guard);
        self.invalidate().await?;
        Ok(role)
    }

    /// Find a role in the current team or create it; the flag tells whether it was created
    pub async fn find_or_create_role(&self, name: &str, guard: Option<&str>) -> Result<(Role, bool)> {
        require_name("role", name)?;
        let guard = self.default_guard(guard);
        let team = self.write_team();
        let store = self.registrar.store();

        if let Some(role) = store.find_role_by_name(name, guard, team).await? {
            return Ok((role, false));
        }

        match self.create_role(name, Some(guard)).await {
            Ok(role) => Ok((role, true)),
            Err(PermissionError::Duplicate { .. }) => store
                .find_role_by_name(name, guard, team)
                .await?
                .map(|role| (role, false))
                .ok_or_else(|| PermissionError::role_named(name, guard)),
            Err(e) => Err(e),
        }
    }

    /// Create a permission
    ///
    /// # Errors
    ///
    /// `Duplicate` if the name is taken for the guard.
    pub async fn create_permission(&self, name: &str, guard: Option<&str>) -> Result<Permission> {
        require_name("permission", name)?;
        let guard = self.default_guard(guard);
        let permission = self.registrar.store().create_permission(name, guard).await?;

        info!("Created permission '{}' for guard '{}'", permission.name, permission.guard);
        self.invalidate().await?;
        Ok(permission)
    }

    /// Find a permission or create it; the flag tells whether it was created
    pub async fn find_or_create_permission(&self, name: &str, guard: Option<&str>) -> Result<(Permission, bool)> {
        require_name("permission", name)?;
        let guard = self.default_guard(guard);
        let (permission, created) = self
            .registrar
            .store()
            .find_or_create_permission(name, guard)
            .await?;

        if created {
            info!("Created permission '{}' for guard '{}'", permission.name, permission.guard);
            self.invalidate().await?;
        }
        Ok((permission, created))
    }
}
