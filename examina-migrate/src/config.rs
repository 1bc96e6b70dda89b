//! Migration runner configuration
//!
//! Loaded from a TOML file (usually `migrate.toml`) and then overridden by
//! environment variables:
//!
//! - `EXAMINA_DATABASE_URL` (falls back to `DATABASE_URL`)
//! - `EXAMINA_MIGRATIONS_DIR`
//! - `EXAMINA_LOCK_TIMEOUT` (seconds)

use crate::database::DatabaseBackend;
use crate::error::{Error, Result, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigratorConfig {
    /// Database connection URL
    pub database_url: String,

    /// Directory holding `{id}_{name}.toml` change files
    pub migrations_dir: PathBuf,

    /// Ledger table name
    pub ledger_table: String,

    /// Lock table name
    pub lock_table: String,

    /// How long to wait for another runner's lock, in seconds
    pub lock_timeout_secs: u64,

    /// Lock polling interval in milliseconds
    pub lock_poll_interval_ms: u64,

    /// Maximum number of pooled connections
    pub max_connections: u32,

    /// Connection acquire timeout in seconds
    pub connect_timeout_secs: u64,

    /// Startup retry settings
    pub retry: RetryConfig,
}

/// Startup retry settings (connection failures and lock contention only)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            migrations_dir: PathBuf::from("migrations"),
            ledger_table: "__examina_migrations".to_string(),
            lock_table: "__examina_migration_lock".to_string(),
            lock_timeout_secs: 30,
            lock_poll_interval_ms: 250,
            max_connections: 5,
            connect_timeout_secs: 30,
            retry: RetryConfig::default(),
        }
    }
}

impl MigratorConfig {
    /// Configuration for a URL with all other settings at their defaults
    pub fn for_url(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Self::default()
        }
    }

    /// Load configuration from TOML file
    ///
    /// A relative `migrations_dir` is resolved against the file's directory.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let content = fs::read_to_string(path_ref).map_err(|e| {
            Error::config(format!(
                "Failed to read config file '{}': {}",
                path_ref.display(),
                e
            ))
        })?;

        let mut config: MigratorConfig = toml::from_str(&content).map_err(|e| {
            Error::config(format!(
                "Failed to parse config file '{}': {}. Check TOML syntax.",
                path_ref.display(),
                e
            ))
        })?;

        if config.migrations_dir.is_relative() {
            if let Some(parent_dir) = path_ref.parent() {
                config.migrations_dir = parent_dir.join(&config.migrations_dir);
            }
        }

        log::debug!(
            "Successfully loaded configuration from: {}",
            path_ref.display()
        );
        Ok(config)
    }

    /// Create configuration from defaults plus environment variable overrides
    pub fn from_env() -> Result<Self> {
        let mut config = MigratorConfig::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(db_url) = env::var("DATABASE_URL") {
            self.database_url = db_url;
        }
        if let Ok(db_url) = env::var("EXAMINA_DATABASE_URL") {
            self.database_url = db_url;
        }
        if let Ok(dir) = env::var("EXAMINA_MIGRATIONS_DIR") {
            self.migrations_dir = PathBuf::from(dir);
        }
        if let Ok(timeout) = env::var("EXAMINA_LOCK_TIMEOUT") {
            self.lock_timeout_secs = timeout.parse().map_err(|_| {
                Error::config(format!(
                    "EXAMINA_LOCK_TIMEOUT must be a number of seconds, got '{}'",
                    timeout
                ))
            })?;
        }
        Ok(())
    }

    /// Check the configuration before connecting
    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            return Err(Error::config(
                "database_url is not set (use the config file or EXAMINA_DATABASE_URL)",
            ));
        }
        DatabaseBackend::from_url(&self.database_url)?;

        for (key, table) in [
            ("ledger_table", &self.ledger_table),
            ("lock_table", &self.lock_table),
        ] {
            if !is_safe_identifier(table) {
                return Err(Error::config(format!(
                    "{} '{}' may only contain letters, numbers and underscores",
                    key, table
                )));
            }
        }

        if self.ledger_table == self.lock_table {
            return Err(Error::config("ledger_table and lock_table must differ"));
        }
        if self.lock_poll_interval_ms == 0 {
            return Err(Error::config("lock_poll_interval_ms must be greater than 0"));
        }
        if self.max_connections == 0 {
            return Err(Error::config("max_connections must be greater than 0"));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }
}

fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
