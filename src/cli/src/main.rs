//! Gatehouse - permission management commands
//!
//! - `cache-reset`: flush the shared permission cache
//! - `create-permission`: create a permission if it does not exist
//! - `create-role`: create a role, optionally in a team and with permissions
//! - `show`: print the role × permission matrix per guard

use anyhow::{Context, Result};
use clap::Parser;
use gatehouse_permission::PermissionConfig;
use std::path::PathBuf;
use tracing::info;

mod commands;

use commands::App;

/// Gatehouse permission CLI
#[derive(Parser)]
#[command(name = "gatehouse")]
#[command(about = "Manage Gatehouse roles, permissions, and the permission cache")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "GATEHOUSE_CONFIG")]
    config: Option<PathBuf>,

    /// Permission store file (overrides config)
    #[arg(long, env = "GATEHOUSE_STORE")]
    store: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Flush the permission cache
    CacheReset,

    /// Create a permission
    CreatePermission {
        name: String,
        guard: Option<String>,
    },

    /// Create a role
    CreateRole {
        name: String,
        guard: Option<String>,

        /// Team the role belongs to (requires teams to be enabled)
        #[arg(long)]
        team_id: Option<u64>,

        /// Permissions to give the role, separated by `|`
        #[arg(long)]
        permissions: Option<String>,
    },

    /// Show roles and permissions per guard
    Show {
        guard: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},gatehouse_permission={}", log_level, log_level).into()),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => {
            let config = PermissionConfig::load(path)
                .with_context(|| format!("Failed to load configuration from {:?}", path))?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => PermissionConfig::default(),
    };

    if let Some(store) = cli.store {
        config.store.path = store;
    }

    config.validate().context("Invalid configuration")?;

    let app = App::open(config).await?;
    let mut out = std::io::stdout().lock();

    let ok = match cli.command {
        Command::CacheReset => app.cache_reset(&mut out).await?,
        Command::CreatePermission { name, guard } => {
            app.create_permission(&mut out, &name, guard.as_deref()).await?
        }
        Command::CreateRole {
            name,
            guard,
            team_id,
            permissions,
        } => {
            app.create_role(&mut out, &name, guard.as_deref(), team_id, permissions.as_deref())
                .await?
        }
        Command::Show { guard } => app.show(&mut out, guard.as_deref()).await?,
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
