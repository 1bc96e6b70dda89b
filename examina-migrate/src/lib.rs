//! examina-migrate - reversible schema migrations for the Examina database
//!
//! examina-migrate provides:
//! - Change descriptors made of typed schema operations with their inverses
//! - An append-only ledger stored next to the migrated schema
//! - Forward and backward runs under an exclusive database lock
//! - MySQL, PostgreSQL and SQLite through sqlx
//!
//! ```no_run
//! use examina_migrate::{ChangeLoader, MigratorConfig, Migrator};
//!
//! # async fn run() -> examina_migrate::Result<()> {
//! let config = MigratorConfig::from_file("migrate.toml")?;
//! let registry = ChangeLoader::new(&config.migrations_dir).load_changes()?;
//! let migrator = Migrator::connect(&config, registry).await?;
//! let applied = migrator.migrate_to_latest().await?;
//! # Ok(())
//! # }
//! ```

// Enforce error handling best practices
#![cfg_attr(
    not(test),
    warn(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
    )
)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used,))]

pub mod config;
pub mod database;
pub mod error;
pub mod migrations;
pub mod startup;

pub use config::{MigratorConfig, RetryConfig};
pub use database::{DatabaseBackend, SqlDialect, SqlValue};
pub use error::{Error, Result};
pub use migrations::{
    ChangeDescriptor, ChangeLoader, ChangeRegistry, ChangeStatus, ColumnDef, ConsistencyReport,
    Discrepancy, ForeignKeyDef, LedgerStore, MigrationLock, MigrationOutcome, Migrator,
    MigratorOptions, ReferentialAction, SchemaExecutor, SchemaOperation,
};
pub use startup::run_startup;
