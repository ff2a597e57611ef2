//! Command implementations

use anyhow::{Context, Result};
use gatehouse_permission::{Authorizer, InMemoryPermissionStore, PermissionConfig, Visibility};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// CLI state: the file-backed store and an authorizer over it
pub struct App {
    authz: Authorizer,
    store: Arc<InMemoryPermissionStore>,
    store_path: PathBuf,
}

impl App {
    pub async fn open(config: PermissionConfig) -> Result<Self> {
        let store_path = config.store.path.clone();
        let store = Arc::new(
            InMemoryPermissionStore::load(&store_path)
                .await
                .with_context(|| format!("Failed to open permission store {:?}", store_path))?,
        );
        let authz = Authorizer::from_config(store.clone(), config)?;

        Ok(Self {
            authz,
            store,
            store_path,
        })
    }

    async fn save(&self) -> Result<()> {
        self.store
            .save(&self.store_path)
            .await
            .with_context(|| format!("Failed to save permission store {:?}", self.store_path))?;
        info!("Saved permission store to {:?}", self.store_path);
        Ok(())
    }

    pub async fn cache_reset(&self, out: &mut impl Write) -> Result<bool> {
        match self.authz.registrar().try_forget_cached_permissions().await {
            Ok(true) => {
                writeln!(out, "Permission cache flushed.")?;
                Ok(true)
            }
            Ok(false) => {
                writeln!(out, "Permission cache already empty.")?;
                Ok(true)
            }
            Err(e) => {
                warn!("Cache reset failed: {}", e);
                writeln!(out, "Unable to flush cache.")?;
                Ok(false)
            }
        }
    }

    pub async fn create_permission(&self, out: &mut impl Write, name: &str, guard: Option<&str>) -> Result<bool> {
        let (permission, created) = self.authz.find_or_create_permission(name, guard).await?;

        if created {
            self.save().await?;
            writeln!(out, "Permission `{}` created", permission.name)?;
        } else {
            writeln!(
                out,
                "Permission `{}` already exists for guard `{}`",
                permission.name, permission.guard
            )?;
        }
        Ok(true)
    }

    pub async fn create_role(
        &self,
        out: &mut impl Write,
        name: &str,
        guard: Option<&str>,
        team_id: Option<u64>,
        permissions: Option<&str>,
    ) -> Result<bool> {
        if team_id.is_some() && !self.authz.config().teams {
            writeln!(out, "Teams feature disabled")?;
            return Ok(false);
        }

        self.authz.registrar().set_permissions_team_id(team_id);
        let (role, created) = self.authz.find_or_create_role(name, guard).await?;

        let names: Vec<&str> = permissions
            .unwrap_or_default()
            .split('|')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .collect();

        for permission in &names {
            self.authz
                .find_or_create_permission(permission, Some(&role.guard))
                .await?;
        }
        self.authz
            .give_permission_to_role(&role, names.iter().copied())
            .await?;

        self.save().await?;

        if created {
            writeln!(out, "Role `{}` created", role.name)?;
        } else {
            writeln!(out, "Role `{}` already exists", role.name)?;
        }
        if !names.is_empty() {
            writeln!(out, "Permissions given: {}", names.join(", "))?;
        }
        Ok(true)
    }

    pub async fn show(&self, out: &mut impl Write, guard: Option<&str>) -> Result<bool> {
        let snapshot = self.authz.registrar().load_permissions().await?;
        let everything = Visibility::all();

        let guards: BTreeSet<String> = match guard {
            Some(guard) => BTreeSet::from([guard.to_string()]),
            None => snapshot
                .permissions(&everything)
                .into_iter()
                .map(|p| p.guard)
                .chain(snapshot.roles(&everything).into_iter().map(|r| r.guard))
                .collect(),
        };

        for guard in &guards {
            let visibility = Visibility::all().guard(guard);
            let permissions = snapshot.permissions(&visibility);
            let roles = snapshot.roles(&visibility);

            let columns: Vec<String> = roles
                .iter()
                .map(|role| match role.team_id {
                    Some(team) => format!("{} (team {})", role.name, team),
                    None => role.name.clone(),
                })
                .collect();
            let granted: Vec<BTreeSet<u64>> = roles
                .iter()
                .map(|role| snapshot.role_permissions(role.id).iter().map(|p| p.id).collect())
                .collect();

            let first = permissions
                .iter()
                .map(|p| p.name.chars().count())
                .max()
                .unwrap_or(0);

            writeln!(out, "Guard: {}", guard)?;
            write!(out, "{:first$}", "")?;
            for column in &columns {
                write!(out, "  {}", column)?;
            }
            writeln!(out)?;

            for permission in &permissions {
                write!(out, "{:first$}", permission.name)?;
                for (column, ids) in columns.iter().zip(&granted) {
                    let mark = if ids.contains(&permission.id) { "✓" } else { "·" };
                    write!(out, "  {:width$}", mark, width = column.chars().count())?;
                }
                writeln!(out)?;
            }
            writeln!(out)?;
        }

        Ok(true)
    }
}
