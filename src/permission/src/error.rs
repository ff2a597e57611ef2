//! Error types for the permission registrar and authorizer

use thiserror::Error;

/// Permission engine errors
#[derive(Debug, Error)]
pub enum PermissionError {
    /// Lookup by name or id found no permission
    #[error("There is no permission {0}")]
    PermissionNotFound(String),

    /// Lookup by name or id found no role
    #[error("There is no role {0}")]
    RoleNotFound(String),

    /// Creation would violate the name + guard (+ team) uniqueness invariant
    #[error("A {kind} `{name}` already exists for guard `{guard}`")]
    Duplicate {
        kind: &'static str,
        name: String,
        guard: String,
    },

    /// Wildcard syntax or matcher implementation does not satisfy the matching contract
    #[error("Invalid wildcard configuration: {0}")]
    InvalidWildcardConfiguration(String),

    /// Backing store could not be reached
    #[error("Permission store unavailable: {0}")]
    StoreUnavailable(String),

    /// External cache backend could not be reached
    #[error("Cache backend error: {0}")]
    CacheBackend(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Snapshot or store (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PermissionError {
    /// Whether the error means the answer could not be determined, as opposed
    /// to a definite "no"
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::CacheBackend(_))
    }

    /// Whether the error is a failed lookup
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::PermissionNotFound(_) | Self::RoleNotFound(_))
    }

    /// Copy of this error for another caller of the same failed operation
    ///
    /// I/O errors keep their kind; decode errors become `StoreUnavailable`.
    pub fn replicate(&self) -> Self {
        match self {
            Self::PermissionNotFound(msg) => Self::PermissionNotFound(msg.clone()),
            Self::RoleNotFound(msg) => Self::RoleNotFound(msg.clone()),
            Self::Duplicate { kind, name, guard } => Self::Duplicate {
                kind: *kind,
                name: name.clone(),
                guard: guard.clone(),
            },
            Self::InvalidWildcardConfiguration(msg) => Self::InvalidWildcardConfiguration(msg.clone()),
            Self::StoreUnavailable(msg) => Self::StoreUnavailable(msg.clone()),
            Self::CacheBackend(msg) => Self::CacheBackend(msg.clone()),
            Self::InvalidInput(msg) => Self::InvalidInput(msg.clone()),
            Self::Config(msg) => Self::Config(msg.clone()),
            Self::Serialization(e) => Self::StoreUnavailable(format!("undecodable data: {}", e)),
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
        }
    }

    pub fn permission_named(name: &str, guard: &str) -> Self {
        Self::PermissionNotFound(format!("named `{}` for guard `{}`", name, guard))
    }

    pub fn permission_id(id: u64) -> Self {
        Self::PermissionNotFound(format!("with id `{}`", id))
    }

    pub fn role_named(name: &str, guard: &str) -> Self {
        Self::RoleNotFound(format!("named `{}` for guard `{}`", name, guard))
    }

    pub fn role_id(id: u64) -> Self {
        Self::RoleNotFound(format!("with id `{}`", id))
    }
}

/// Result type for permission operations
pub type Result<T> = std::result::Result<T, PermissionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_classification() {
        assert!(PermissionError::StoreUnavailable("down".into()).is_unavailable());
        assert!(PermissionError::CacheBackend("down".into()).is_unavailable());
        assert!(!PermissionError::permission_named("edit", "web").is_unavailable());
        assert!(PermissionError::role_named("admin", "web").is_not_found());
        assert!(PermissionError::role_id(3).is_not_found());
    }

    #[test]
    fn test_replicate_keeps_kind_and_message() {
        let err = PermissionError::StoreUnavailable("connection refused".into());
        let copy = err.replicate();
        assert!(copy.is_unavailable());
        assert_eq!(copy.to_string(), err.to_string());

        let io = PermissionError::Io(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"));
        assert!(matches!(io.replicate(), PermissionError::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied));
    }

    #[test]
    fn test_display() {
        let err = PermissionError::permission_named("posts:edit", "api");
        assert_eq!(
            err.to_string(),
            "There is no permission named `posts:edit` for guard `api`"
        );
    }
}
