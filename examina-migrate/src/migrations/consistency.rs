//! Advisory comparison of the live schema against the ledger
//!
//! The expected shape is replayed from the `up` operations of every applied
//! change in apply order. Findings are reported, never repaired.

use super::descriptor::ChangeDescriptor;
use super::executor::SchemaExecutor;
use super::operation::SchemaOperation;
use crate::error::Result;
use sqlx::AnyConnection;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// One difference between the live schema and the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discrepancy {
    MissingTable { table: String },
    UnexpectedTable { table: String },
    MissingColumn { table: String, column: String },
    UnexpectedColumn { table: String, column: String },
    MissingIndex { table: String, index: String },
    UnexpectedIndex { table: String, index: String },
    MissingForeignKey { table: String, name: String },
    UnexpectedForeignKey { table: String, name: String },
    /// The ledger lists a change that is not registered
    UnregisteredChange { change_id: String },
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discrepancy::MissingTable { table } => write!(f, "table {} is missing", table),
            Discrepancy::UnexpectedTable { table } => {
                write!(f, "table {} exists but was dropped", table)
            }
            Discrepancy::MissingColumn { table, column } => {
                write!(f, "column {}.{} is missing", table, column)
            }
            Discrepancy::UnexpectedColumn { table, column } => {
                write!(f, "column {}.{} exists but was dropped", table, column)
            }
            Discrepancy::MissingIndex { table, index } => {
                write!(f, "index {} on {} is missing", index, table)
            }
            Discrepancy::UnexpectedIndex { table, index } => {
                write!(f, "index {} on {} exists but was dropped", index, table)
            }
            Discrepancy::MissingForeignKey { table, name } => {
                write!(f, "foreign key {} on {} is missing", name, table)
            }
            Discrepancy::UnexpectedForeignKey { table, name } => {
                write!(f, "foreign key {} on {} exists but was dropped", name, table)
            }
            Discrepancy::UnregisteredChange { change_id } => {
                write!(f, "change {} is applied but not registered", change_id)
            }
        }
    }
}

/// Result of a consistency check
#[derive(Debug, Clone, Default)]
pub struct ConsistencyReport {
    pub discrepancies: Vec<Discrepancy>,
    pub checked_tables: usize,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.discrepancies.is_empty()
    }

    /// Emit every finding as a warning
    pub fn log(&self) {
        if self.is_consistent() {
            log::info!(
                "Schema matches the ledger ({} tables checked)",
                self.checked_tables
            );
            return;
        }
        for discrepancy in &self.discrepancies {
            log::warn!("Schema drift: {}", discrepancy);
        }
    }
}

/// Names compared case-insensitively, keeping the spelling first seen
#[derive(Debug, Default)]
struct Expectations {
    entries: BTreeMap<String, (String, bool)>,
}

impl Expectations {
    fn set(&mut self, name: &str, present: bool) {
        self.entries
            .insert(name.to_lowercase(), (name.to_string(), present));
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn iter(&self) -> impl Iterator<Item = (&str, &str, bool)> {
        self.entries
            .iter()
            .map(|(key, (name, present))| (key.as_str(), name.as_str(), *present))
    }
}

#[derive(Debug, Default)]
struct TableShape {
    name: String,
    exists: Option<bool>,
    columns: Expectations,
    indexes: Expectations,
    foreign_keys: Expectations,
}

/// Schema implied by a sequence of applied changes
#[derive(Debug, Default)]
pub struct ExpectedShape {
    tables: BTreeMap<String, TableShape>,
}

impl ExpectedShape {
    /// Replay the `up` operations of `applied`, in the given order
    pub fn from_changes<'a>(applied: impl IntoIterator<Item = &'a ChangeDescriptor>) -> Self {
        let mut shape = Self::default();
        for change in applied {
            for op in change.up() {
                shape.apply(op);
            }
        }
        shape
    }

    fn table(&mut self, table: &str) -> &mut TableShape {
        self.tables
            .entry(table.to_lowercase())
            .or_insert_with(|| TableShape {
                name: table.to_string(),
                ..TableShape::default()
            })
    }

    fn apply(&mut self, op: &SchemaOperation) {
        match op {
            SchemaOperation::AddColumn { table, column, .. }
            | SchemaOperation::AlterColumn { table, column, .. } => {
                self.table(table).columns.set(column, true)
            }
            SchemaOperation::DropColumn { table, column } => {
                self.table(table).columns.set(column, false)
            }
            SchemaOperation::CreateIndex {
                table, index_name, ..
            } => self.table(table).indexes.set(index_name, true),
            SchemaOperation::DropIndex { table, index_name } => {
                self.table(table).indexes.set(index_name, false)
            }
            SchemaOperation::CreateTable {
                table,
                columns,
                foreign_keys,
                ..
            } => {
                let shape = self.table(table);
                shape.exists = Some(true);
                shape.columns.clear();
                shape.indexes.clear();
                shape.foreign_keys.clear();
                for column in columns {
                    shape.columns.set(&column.name, true);
                }
                for foreign_key in foreign_keys {
                    shape.foreign_keys.set(&foreign_key.name, true);
                }
            }
            SchemaOperation::DropTable { table } => {
                let shape = self.table(table);
                shape.exists = Some(false);
                shape.columns.clear();
                shape.indexes.clear();
                shape.foreign_keys.clear();
            }
            SchemaOperation::AddForeignKey { table, foreign_key } => {
                self.table(table).foreign_keys.set(&foreign_key.name, true)
            }
            SchemaOperation::DropForeignKey { table, name } => {
                self.table(table).foreign_keys.set(name, false)
            }
            SchemaOperation::InsertRow { .. }
            | SchemaOperation::DeleteRow { .. }
            | SchemaOperation::UpdateRow { .. } => {}
            SchemaOperation::Sql { .. } => {
                log::debug!("Raw SQL operations are not part of the expected shape");
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Compare against the live schema reachable through `conn`
    pub async fn verify(
        &self,
        conn: &mut AnyConnection,
        executor: &SchemaExecutor,
    ) -> Result<ConsistencyReport> {
        let mut report = ConsistencyReport::default();

        for shape in self.tables.values() {
            report.checked_tables += 1;
            let table = shape.name.as_str();
            let live = executor.table_exists(conn, table).await?;

            if shape.exists == Some(false) {
                if live {
                    report.discrepancies.push(Discrepancy::UnexpectedTable {
                        table: table.to_string(),
                    });
                }
                continue;
            }
            if !live {
                report.discrepancies.push(Discrepancy::MissingTable {
                    table: table.to_string(),
                });
                continue;
            }

            let columns = lowercase_set(executor.columns(conn, table).await?);
            for (key, column, expected) in shape.columns.iter() {
                match (expected, columns.contains(key)) {
                    (true, false) => report.discrepancies.push(Discrepancy::MissingColumn {
                        table: table.to_string(),
                        column: column.to_string(),
                    }),
                    (false, true) => report.discrepancies.push(Discrepancy::UnexpectedColumn {
                        table: table.to_string(),
                        column: column.to_string(),
                    }),
                    _ => {}
                }
            }

            let indexes = lowercase_set(executor.indexes(conn, table).await?);
            for (key, index, expected) in shape.indexes.iter() {
                match (expected, indexes.contains(key)) {
                    (true, false) => report.discrepancies.push(Discrepancy::MissingIndex {
                        table: table.to_string(),
                        index: index.to_string(),
                    }),
                    (false, true) => report.discrepancies.push(Discrepancy::UnexpectedIndex {
                        table: table.to_string(),
                        index: index.to_string(),
                    }),
                    _ => {}
                }
            }

            // SQLite does not expose constraint names
            let Some(foreign_keys) = executor.foreign_keys(conn, table).await? else {
                continue;
            };
            let foreign_keys = lowercase_set(foreign_keys);
            for (key, name, expected) in shape.foreign_keys.iter() {
                match (expected, foreign_keys.contains(key)) {
                    (true, false) => report.discrepancies.push(Discrepancy::MissingForeignKey {
                        table: table.to_string(),
                        name: name.to_string(),
                    }),
                    (false, true) => report.discrepancies.push(Discrepancy::UnexpectedForeignKey {
                        table: table.to_string(),
                        name: name.to_string(),
                    }),
                    _ => {}
                }
            }
        }

        Ok(report)
    }
}

fn lowercase_set(names: Vec<String>) -> HashSet<String> {
    names.into_iter().map(|n| n.to_lowercase()).collect()
}
