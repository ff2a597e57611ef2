//! Core permission model types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique permission identifier
pub type PermissionId = u64;

/// Unique role identifier
pub type RoleId = u64;

/// Team (tenant) identifier
pub type TeamId = u64;

/// Guard used when neither the caller nor the subject names one
pub const DEFAULT_GUARD: &str = "web";

/// A named permission within a guard
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub name: String,
    pub guard: String,
}

impl Permission {
    pub fn new(id: PermissionId, name: impl Into<String>, guard: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            guard: guard.into(),
        }
    }
}

/// A named role, unique per guard and team
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub guard: String,

    /// Owning team, `None` for a global role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<TeamId>,
}

impl Role {
    pub fn new(
        id: RoleId,
        name: impl Into<String>,
        guard: impl Into<String>,
        team_id: Option<TeamId>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            guard: guard.into(),
            team_id,
        }
    }
}

/// Tagged reference to any entity that can hold roles and permissions
///
/// The entity type is free-form (e.g. `"user"`, `"api_client"`) so one
/// store can link roles to any number of subject kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectRef {
    pub entity_type: String,
    pub entity_id: String,
}

impl SubjectRef {
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_type, self.entity_id)
    }
}

/// A permission named either by name or by id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PermissionKey {
    Name(String),
    Id(PermissionId),
}

impl From<&str> for PermissionKey {
    fn from(name: &str) -> Self {
        PermissionKey::Name(name.to_string())
    }
}

impl From<String> for PermissionKey {
    fn from(name: String) -> Self {
        PermissionKey::Name(name)
    }
}

impl From<&String> for PermissionKey {
    fn from(name: &String) -> Self {
        PermissionKey::Name(name.clone())
    }
}

impl From<PermissionId> for PermissionKey {
    fn from(id: PermissionId) -> Self {
        PermissionKey::Id(id)
    }
}

impl From<&Permission> for PermissionKey {
    fn from(permission: &Permission) -> Self {
        PermissionKey::Id(permission.id)
    }
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionKey::Name(name) => write!(f, "{}", name),
            PermissionKey::Id(id) => write!(f, "#{}", id),
        }
    }
}

/// A role named either by name or by id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoleKey {
    Name(String),
    Id(RoleId),
}

impl From<&str> for RoleKey {
    fn from(name: &str) -> Self {
        RoleKey::Name(name.to_string())
    }
}

impl From<String> for RoleKey {
    fn from(name: String) -> Self {
        RoleKey::Name(name)
    }
}

impl From<&String> for RoleKey {
    fn from(name: &String) -> Self {
        RoleKey::Name(name.clone())
    }
}

impl From<RoleId> for RoleKey {
    fn from(id: RoleId) -> Self {
        RoleKey::Id(id)
    }
}

impl From<&Role> for RoleKey {
    fn from(role: &Role) -> Self {
        RoleKey::Id(role.id)
    }
}

impl fmt::Display for RoleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleKey::Name(name) => write!(f, "{}", name),
            RoleKey::Id(id) => write!(f, "#{}", id),
        }
    }
}

/// Capability implemented by every entity that can be granted roles and permissions
pub trait HasRoles: Send + Sync {
    /// Reference used to link this entity in the store
    fn subject_ref(&self) -> SubjectRef;

    /// Guard this entity authenticates under, if it is fixed
    fn guard_name(&self) -> Option<&str> {
        None
    }
}

impl HasRoles for SubjectRef {
    fn subject_ref(&self) -> SubjectRef {
        self.clone()
    }
}

impl<T: HasRoles + ?Sized> HasRoles for &T {
    fn subject_ref(&self) -> SubjectRef {
        (**self).subject_ref()
    }

    fn guard_name(&self) -> Option<&str> {
        (**self).guard_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ApiClient {
        id: u32,
    }

    impl HasRoles for ApiClient {
        fn subject_ref(&self) -> SubjectRef {
            SubjectRef::new("api_client", self.id.to_string())
        }

        fn guard_name(&self) -> Option<&str> {
            Some("api")
        }
    }

    #[test]
    fn test_subject_ref_display() {
        let subject = SubjectRef::new("user", "42");
        assert_eq!(subject.to_string(), "user#42");
        assert_eq!(subject.subject_ref(), subject);
        assert!(subject.guard_name().is_none());
    }

    #[test]
    fn test_custom_subject_guard() {
        let client = ApiClient { id: 7 };
        assert_eq!(client.subject_ref(), SubjectRef::new("api_client", "7"));
        assert_eq!((&client).guard_name(), Some("api"));
    }

    #[test]
    fn test_keys_from_names_and_values() {
        let permission = Permission::new(4, "edit", "web");
        assert_eq!(PermissionKey::from("edit"), PermissionKey::Name("edit".into()));
        assert_eq!(PermissionKey::from(&permission), PermissionKey::Id(4));
        assert_eq!(PermissionKey::from(4u64).to_string(), "#4");

        let role = Role::new(2, "admin", "web", None);
        assert_eq!(RoleKey::from(&role), RoleKey::Id(2));
        assert_eq!(RoleKey::from("admin").to_string(), "admin");
    }

    #[test]
    fn test_role_serialization_skips_missing_team() {
        let role = Role::new(1, "admin", "web", None);
        let json = serde_json::to_string(&role).unwrap();
        assert!(!json.contains("team_id"));

        let teamed: Role = serde_json::from_str(
            r#"{"id":2,"name":"admin","guard":"web","team_id":5}"#,
        )
        .unwrap();
        assert_eq!(teamed.team_id, Some(5));
    }
}
