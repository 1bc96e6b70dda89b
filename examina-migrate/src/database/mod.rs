//! Database access for the migration engine
//!
//! Connections go through the sqlx `Any` driver so one engine serves MySQL,
//! PostgreSQL and SQLite. Dialect differences live in [`dialects`].

pub mod dialects;
pub mod value;

pub use dialects::{redact_url, DatabaseBackend, SqlDialect};
pub use value::SqlValue;

use crate::config::MigratorConfig;
use crate::error::Result;
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use std::time::Duration;

/// Open a connection pool for the configured database
pub async fn connect(config: &MigratorConfig) -> Result<AnyPool> {
    sqlx::any::install_default_drivers();

    log::debug!(
        "Connecting to {} database at {}",
        DatabaseBackend::from_url(&config.database_url)?.name(),
        redact_url(&config.database_url)
    );

    let pool = AnyPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(&config.database_url)
        .await?;

    Ok(pool)
}
