//! Schema migration system
//!
//! This module provides:
//! - Change descriptors built from schema operations
//! - An append-only ledger of applied and rolled-back changes
//! - An exclusive lock so only one runner mutates the schema
//! - The engine that applies and reverts changes
//! - File-based change loading and creation

pub mod consistency;
pub mod descriptor;
pub mod engine;
pub mod executor;
pub mod ledger;
pub mod loader;
pub mod lock;
pub mod operation;

pub use consistency::{ConsistencyReport, Discrepancy, ExpectedShape};
pub use descriptor::{derive_down, generate_id, parse_change_id, ChangeDescriptor, ChangeRegistry};
pub use engine::{ChangeStatus, MigrationOutcome, Migrator, MigratorOptions};
pub use executor::{ExecutionOutcome, SchemaExecutor};
pub use ledger::{LedgerEntry, LedgerStatus, LedgerStore};
pub use loader::{load_change_file, ChangeFileInfo, ChangeLoader, ValidationResult};
pub use lock::{LockGuard, LockHolder, MigrationLock};
pub use operation::{ColumnDef, ForeignKeyDef, ReferentialAction, SchemaOperation};
