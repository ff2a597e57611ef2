//! Configuration loading and validation

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheBackend, FileCacheBackend, InMemoryCacheBackend};
use crate::error::{PermissionError, Result};
use crate::types::DEFAULT_GUARD;
use crate::wildcard::WildcardSyntax;

/// Complete permission engine configuration
///
/// Every field has a default, so an empty TOML file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PermissionConfig {
    #[serde(default = "default_guard")]
    pub default_guard: String,

    /// Scope roles and direct permissions by team
    #[serde(default)]
    pub teams: bool,

    /// Match held permissions as wildcard patterns
    #[serde(default)]
    pub enable_wildcard_permission: bool,

    /// Dispatch attach/detach events to registered listeners
    #[serde(default)]
    pub events_enabled: bool,

    /// Drop the process-local collection on worker reset
    #[serde(default = "default_true")]
    pub reset_on_worker_reuse: bool,

    #[serde(default)]
    pub wildcard: WildcardSyntax,

    #[serde(default)]
    pub cache: CacheSection,

    #[serde(default)]
    pub store: StoreSection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    Memory,
    File,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CacheSection {
    #[serde(default = "default_cache_key")]
    pub key: String,

    /// Snapshot lifetime; 0 never expires
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_backend")]
    pub backend: CacheBackendKind,

    /// Directory for the file backend
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StoreSection {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_true() -> bool {
    true
}

fn default_guard() -> String {
    DEFAULT_GUARD.to_string()
}

fn default_cache_key() -> String {
    "gatehouse.permission.cache".to_string()
}

fn default_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_backend() -> CacheBackendKind {
    CacheBackendKind::Memory
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("./data/cache")
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./data/permissions.json")
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            default_guard: default_guard(),
            teams: false,
            enable_wildcard_permission: false,
            events_enabled: false,
            reset_on_worker_reuse: true,
            wildcard: WildcardSyntax::default(),
            cache: CacheSection::default(),
            store: StoreSection::default(),
        }
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            key: default_cache_key(),
            ttl_secs: default_ttl_secs(),
            backend: default_backend(),
            path: default_cache_path(),
        }
    }
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl PermissionConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| PermissionError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        self.wildcard.validate()?;

        if self.default_guard.trim().is_empty() {
            return Err(PermissionError::Config("default_guard must not be empty".into()));
        }

        if self.cache.key.trim().is_empty() {
            return Err(PermissionError::Config("cache.key must not be empty".into()));
        }

        Ok(())
    }

    pub fn wildcard_syntax(&self) -> &WildcardSyntax {
        &self.wildcard
    }
}

impl CacheSection {
    /// Snapshot TTL, `None` when entries never expire
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_secs > 0).then(|| Duration::from_secs(self.ttl_secs))
    }

    /// Build the configured cache backend
    pub fn build_backend(&self) -> Arc<dyn CacheBackend> {
        match self.backend {
            CacheBackendKind::Memory => Arc::new(InMemoryCacheBackend::new()),
            CacheBackendKind::File => Arc::new(FileCacheBackend::new(self.path.clone())),
        }
    }
}
