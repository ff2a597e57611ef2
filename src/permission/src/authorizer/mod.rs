//! Subject-facing authorization API
//!
//! [`Authorizer`] answers role and permission questions from the registrar's
//! snapshot and performs grants (see [`grants`]). Reads never invalidate the
//! cache; every grant does.
//!
//! With wildcard permissions enabled, each held permission name is treated as
//! a pattern and the requested name as the literal it must cover.

pub mod grants;

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::PermissionConfig;
use crate::error::Result;
use crate::events::{EventDispatcher, EventListener};
use crate::registrar::{PermissionRegistrar, Snapshot};
use crate::store::PermissionStore;
use crate::types::{HasRoles, Permission, PermissionKey, Role};
use crate::wildcard::{verify_matcher, WildcardMatcher};

/// Separator of role alternatives in [`Authorizer::has_role`]
pub const ROLE_SEPARATOR: char = '|';

pub struct Authorizer {
    registrar: Arc<PermissionRegistrar>,
    matcher: Arc<dyn WildcardMatcher>,
    events: EventDispatcher,
    config: PermissionConfig,
}

impl Authorizer {
    /// Create an authorizer over `registrar`, matching with its wildcard resolver
    ///
    /// # Errors
    ///
    /// Fails if `config` does not validate.
    pub fn new(registrar: Arc<PermissionRegistrar>, config: PermissionConfig) -> Result<Self> {
        config.validate()?;
        let matcher: Arc<dyn WildcardMatcher> = registrar.resolver().clone();
        verify_matcher(matcher.as_ref(), registrar.resolver().syntax())?;

        Ok(Self {
            registrar,
            matcher,
            events: EventDispatcher::new(config.events_enabled),
            config,
        })
    }

    /// Build a registrar and authorizer from configuration
    pub fn from_config(store: Arc<dyn PermissionStore>, config: PermissionConfig) -> Result<Self> {
        config.validate()?;
        let registrar = Arc::new(PermissionRegistrar::from_config(store, &config));
        Self::new(registrar, config)
    }

    /// Replace the wildcard matcher
    ///
    /// # Errors
    ///
    /// `InvalidWildcardConfiguration` if the matcher breaks the matching contract
    /// for the registrar's syntax.
    pub fn with_matcher(mut self, matcher: Arc<dyn WildcardMatcher>) -> Result<Self> {
        verify_matcher(matcher.as_ref(), self.registrar.resolver().syntax())?;
        self.matcher = matcher;
        Ok(self)
    }

    pub fn registrar(&self) -> &Arc<PermissionRegistrar> {
        &self.registrar
    }

    pub fn config(&self) -> &PermissionConfig {
        &self.config
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Register a listener for attach/detach events
    pub fn subscribe(&self, listener: Arc<dyn EventListener>) {
        self.events.subscribe(listener);
    }

    /// Explicit guard, else the subject's own, else the configured default
    pub(crate) fn guard_for<'a, S>(&'a self, subject: &'a S, guard: Option<&'a str>) -> &'a str
    where
        S: HasRoles + ?Sized,
    {
        guard
            .or_else(|| subject.guard_name())
            .unwrap_or(self.config.default_guard.as_str())
    }

    /// Whether the subject holds `permission`, directly or through a role
    ///
    /// An unknown permission is a denial. Only store or cache outages are
    /// returned as errors, so callers can tell "denied" from "undeterminable".
    pub async fn has_permission_to<S>(
        &self,
        subject: &S,
        permission: impl Into<PermissionKey>,
        guard: Option<&str>,
    ) -> Result<bool>
    where
        S: HasRoles + ?Sized,
    {
        let guard = self.guard_for(subject, guard);
        let snapshot = self.registrar.load_permissions().await?;
        let visibility = self.registrar.visibility(Some(guard));
        let held = snapshot.permissions_for(&subject.subject_ref(), &visibility);

        Ok(self.holds(&snapshot, &held, &permission.into(), guard))
    }

    /// Fail-closed variant of [`has_permission_to`](Self::has_permission_to)
    pub async fn check_permission_to<S>(
        &self,
        subject: &S,
        permission: impl Into<PermissionKey>,
        guard: Option<&str>,
    ) -> bool
    where
        S: HasRoles + ?Sized,
    {
        let permission = permission.into();
        match self.has_permission_to(subject, permission.clone(), guard).await {
            Ok(granted) => granted,
            Err(e) => {
                warn!(
                    "Denying '{}' to {}: permission lookup failed: {}",
                    permission,
                    subject.subject_ref(),
                    e
                );
                false
            }
        }
    }

    pub async fn has_any_permission<S, I, P>(&self, subject: &S, permissions: I, guard: Option<&str>) -> Result<bool>
    where
        S: HasRoles + ?Sized,
        I: IntoIterator<Item = P>,
        P: Into<PermissionKey>,
    {
        let guard = self.guard_for(subject, guard);
        let snapshot = self.registrar.load_permissions().await?;
        let held = snapshot.permissions_for(&subject.subject_ref(), &self.registrar.visibility(Some(guard)));

        Ok(permissions
            .into_iter()
            .any(|permission| self.holds(&snapshot, &held, &permission.into(), guard)))
    }

    pub async fn has_all_permissions<S, I, P>(&self, subject: &S, permissions: I, guard: Option<&str>) -> Result<bool>
    where
        S: HasRoles + ?Sized,
        I: IntoIterator<Item = P>,
        P: Into<PermissionKey>,
    {
        let guard = self.guard_for(subject, guard);
        let snapshot = self.registrar.load_permissions().await?;
        let held = snapshot.permissions_for(&subject.subject_ref(), &self.registrar.visibility(Some(guard)));

        Ok(permissions
            .into_iter()
            .all(|permission| self.holds(&snapshot, &held, &permission.into(), guard)))
    }

    /// Whether `permission` is linked to the subject itself, ignoring roles and wildcards
    pub async fn has_direct_permission<S>(
        &self,
        subject: &S,
        permission: impl Into<PermissionKey>,
        guard: Option<&str>,
    ) -> Result<bool>
    where
        S: HasRoles + ?Sized,
    {
        let guard = self.guard_for(subject, guard);
        let snapshot = self.registrar.load_permissions().await?;
        let direct = snapshot.direct_permissions_for(&subject.subject_ref(), &self.registrar.visibility(Some(guard)));

        Ok(resolve(&snapshot, &permission.into(), guard)
            .is_some_and(|wanted| direct.iter().any(|p| p.id == wanted.id)))
    }

    pub async fn get_direct_permissions<S>(&self, subject: &S, guard: Option<&str>) -> Result<Vec<Permission>>
    where
        S: HasRoles + ?Sized,
    {
        let guard = self.guard_for(subject, guard);
        let snapshot = self.registrar.load_permissions().await?;
        Ok(snapshot.direct_permissions_for(&subject.subject_ref(), &self.registrar.visibility(Some(guard))))
    }

    pub async fn get_permissions_via_roles<S>(&self, subject: &S, guard: Option<&str>) -> Result<Vec<Permission>>
    where
        S: HasRoles + ?Sized,
    {
        let guard = self.guard_for(subject, guard);
        let snapshot = self.registrar.load_permissions().await?;
        Ok(snapshot.permissions_via_roles(&subject.subject_ref(), &self.registrar.visibility(Some(guard))))
    }

    /// Effective permissions: direct and via roles, sorted by id
    pub async fn get_all_permissions<S>(&self, subject: &S, guard: Option<&str>) -> Result<Vec<Permission>>
    where
        S: HasRoles + ?Sized,
    {
        let guard = self.guard_for(subject, guard);
        self.registrar
            .get_permissions(&subject.subject_ref(), Some(guard))
            .await
    }

    pub async fn get_permission_names<S>(&self, subject: &S, guard: Option<&str>) -> Result<Vec<String>>
    where
        S: HasRoles + ?Sized,
    {
        Ok(self
            .get_all_permissions(subject, guard)
            .await?
            .into_iter()
            .map(|p| p.name)
            .collect())
    }

    /// Roles assigned to the subject in the guard and current team
    pub async fn get_roles<S>(&self, subject: &S, guard: Option<&str>) -> Result<Vec<Role>>
    where
        S: HasRoles + ?Sized,
    {
        let guard = self.guard_for(subject, guard);
        let snapshot = self.registrar.load_permissions().await?;
        Ok(snapshot.roles_for(&subject.subject_ref(), &self.registrar.visibility(Some(guard))))
    }

    pub async fn get_role_names<S>(&self, subject: &S, guard: Option<&str>) -> Result<Vec<String>>
    where
        S: HasRoles + ?Sized,
    {
        Ok(self
            .get_roles(subject, guard)
            .await?
            .into_iter()
            .map(|r| r.name)
            .collect())
    }

    /// Whether the subject holds `role`; `"admin|writer"` holds if either does
    pub async fn has_role<S>(&self, subject: &S, role: &str, guard: Option<&str>) -> Result<bool>
    where
        S: HasRoles + ?Sized,
    {
        self.has_any_role(subject, split_roles(role), guard).await
    }

    pub async fn has_any_role<S, I, R>(&self, subject: &S, roles: I, guard: Option<&str>) -> Result<bool>
    where
        S: HasRoles + ?Sized,
        I: IntoIterator<Item = R>,
        R: AsRef<str>,
    {
        let held = self.role_name_set(subject, guard).await?;
        Ok(roles.into_iter().any(|role| held.contains(role.as_ref())))
    }

    pub async fn has_all_roles<S, I, R>(&self, subject: &S, roles: I, guard: Option<&str>) -> Result<bool>
    where
        S: HasRoles + ?Sized,
        I: IntoIterator<Item = R>,
        R: AsRef<str>,
    {
        let held = self.role_name_set(subject, guard).await?;
        Ok(roles.into_iter().all(|role| held.contains(role.as_ref())))
    }

    /// Whether the subject holds exactly these roles, no more and no fewer
    pub async fn has_exact_roles<S, I, R>(&self, subject: &S, roles: I, guard: Option<&str>) -> Result<bool>
    where
        S: HasRoles + ?Sized,
        I: IntoIterator<Item = R>,
        R: AsRef<str>,
    {
        let held = self.role_name_set(subject, guard).await?;
        let wanted: BTreeSet<String> = roles.into_iter().map(|r| r.as_ref().to_string()).collect();
        Ok(held == wanted)
    }

    async fn role_name_set<S>(&self, subject: &S, guard: Option<&str>) -> Result<BTreeSet<String>>
    where
        S: HasRoles + ?Sized,
    {
        Ok(self.get_role_names(subject, guard).await?.into_iter().collect())
    }

    fn holds(&self, snapshot: &Snapshot, held: &[Permission], wanted: &PermissionKey, guard: &str) -> bool {
        if self.config.enable_wildcard_permission {
            let requested = match wanted {
                PermissionKey::Name(name) => name.as_str(),
                PermissionKey::Id(_) => match resolve(snapshot, wanted, guard) {
                    Some(permission) => permission.name.as_str(),
                    None => return false,
                },
            };
            return held.iter().any(|p| self.matcher.implies(&p.name, requested));
        }

        match resolve(snapshot, wanted, guard) {
            Some(permission) => held.iter().any(|p| p.id == permission.id),
            None => {
                debug!("Permission '{}' does not exist for guard '{}'", wanted, guard);
                false
            }
        }
    }
}

/// Looks a permission up in the snapshot within `guard`
fn resolve<'s>(snapshot: &'s Snapshot, key: &PermissionKey, guard: &str) -> Option<&'s Permission> {
    match key {
        PermissionKey::Name(name) => snapshot.find_permission(name, guard),
        PermissionKey::Id(id) => snapshot.permission(*id).filter(|p| p.guard == guard),
    }
}

fn split_roles(expression: &str) -> Vec<&str> {
    expression
        .split(ROLE_SEPARATOR)
        .map(str::trim)
        .filter(|role| !role.is_empty())
        .collect()
}
