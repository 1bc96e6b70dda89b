//! Command implementations

pub mod migrate;
pub mod new;

use anyhow::{Context, Result};
use examina_migrate::database::redact_url;
use examina_migrate::{ChangeLoader, ChangeRegistry, MigratorConfig};
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "migrate.toml";

/// Flags shared by every command
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub config: Option<PathBuf>,
    pub database_url: Option<String>,
    pub dir: Option<PathBuf>,
}

impl GlobalOptions {
    /// Config file, then environment, then command-line flags
    pub fn load_config(&self) -> Result<MigratorConfig> {
        let mut config = match &self.config {
            Some(path) => {
                log::debug!("Using config file {}", path.display());
                MigratorConfig::from_file(path)?
            }
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                log::debug!("Using config file ./{}", DEFAULT_CONFIG_FILE);
                MigratorConfig::from_file(DEFAULT_CONFIG_FILE)?
            }
            None => {
                log::debug!("No config file found, starting from defaults");
                MigratorConfig::default()
            }
        };
        config.apply_env_overrides()?;

        if let Some(url) = &self.database_url {
            config.database_url = url.clone();
        }
        if let Some(dir) = &self.dir {
            config.migrations_dir = dir.clone();
        }

        log::debug!(
            "Database {}, changes in {}",
            redact_url(&config.database_url),
            config.migrations_dir.display()
        );
        Ok(config)
    }
}

/// Load every change file from the configured directory
pub fn load_registry(config: &MigratorConfig) -> Result<ChangeRegistry> {
    let registry = ChangeLoader::new(&config.migrations_dir)
        .load_changes()
        .with_context(|| {
            format!(
                "Failed to load changes from {}",
                config.migrations_dir.display()
            )
        })?;
    log::info!("Loaded {} change(s)", registry.len());
    Ok(registry)
}
