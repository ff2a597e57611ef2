//! # Gatehouse Permission Engine
//!
//! Role- and permission-based access control for any kind of subject.
//!
//! ## Features
//!
//! - **Snapshot cache** of the whole permission graph, loaded once per miss
//!   and shared through a pluggable cache backend
//! - **Wildcard permissions** (`posts:*`, `posts:create,edit`) with a
//!   configurable token and delimiters
//! - **Guards and teams** to partition roles by authentication context and tenant
//! - **Attach/detach events** delivered to registered listeners
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use gatehouse_permission::{Authorizer, InMemoryPermissionStore, PermissionConfig, SubjectRef};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(InMemoryPermissionStore::new());
//!     let authz = Authorizer::from_config(store, PermissionConfig::default())?;
//!
//!     let writer = authz.create_role("writer", None).await?;
//!     authz.create_permission("edit articles", None).await?;
//!     authz.give_permission_to_role(&writer, ["edit articles"]).await?;
//!
//!     let alice = SubjectRef::new("user", "alice");
//!     authz.assign_role(&alice, ["writer"]).await?;
//!
//!     assert!(authz.has_permission_to(&alice, "edit articles", None).await?);
//!     assert!(authz.has_role(&alice, "admin|writer", None).await?);
//!
//!     Ok(())
//! }
//! ```

pub mod authorizer;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod registrar;
pub mod store;
pub mod team;
pub mod types;
pub mod wildcard;

// Re-export commonly used types
pub use authorizer::Authorizer;
pub use cache::{CacheBackend, FileCacheBackend, InMemoryCacheBackend};
pub use config::PermissionConfig;
pub use error::{PermissionError, Result};
pub use events::{EventDispatcher, EventListener, EventTarget, PermissionEvent};
pub use registrar::{JoinRow, PermissionRegistrar, RegistrarConfig, RegistrarStats, Snapshot, Visibility};
pub use store::{InMemoryPermissionStore, PermissionStore};
pub use team::with_team;
pub use types::{
    HasRoles, Permission, PermissionId, PermissionKey, Role, RoleId, RoleKey, SubjectRef, TeamId,
};
pub use wildcard::{WildcardMatcher, WildcardResolver, WildcardSyntax};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
