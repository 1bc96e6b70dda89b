//! SQLite dialect
//!
//! SQLite has no `ALTER COLUMN` and cannot add or drop constraints on an
//! existing table; both need a table rebuild, which is left to a hand-written
//! `sql` operation. Foreign keys declared in `create_table` work.

use super::{DatabaseBackend, SqlDialect};
use crate::database::SqlValue;
use crate::error::{Error, Result};
use crate::migrations::ForeignKeyDef;

/// SQLite dialect
pub struct SQLiteDialect;

impl SqlDialect for SQLiteDialect {
    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::SQLite
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }

    fn placeholder(&self, _position: usize) -> String {
        "?".to_string()
    }

    fn true_literal(&self) -> &'static str {
        "1"
    }

    fn false_literal(&self) -> &'static str {
        "0"
    }

    fn alter_column_sql(
        &self,
        table: &str,
        column: &str,
        _column_type: &str,
        _nullable: bool,
        _default: Option<&SqlValue>,
    ) -> Result<Vec<String>> {
        Err(Error::execution(
            format!("alter column {}.{}", table, column),
            "SQLite does not support ALTER COLUMN; rebuild the table with a sql operation",
        ))
    }

    fn add_foreign_key_sql(&self, table: &str, foreign_key: &ForeignKeyDef) -> Result<String> {
        Err(Error::execution(
            format!("add foreign key {} on {}", foreign_key.name, table),
            "SQLite cannot add constraints to an existing table; declare it in create_table",
        ))
    }

    fn drop_foreign_key_sql(&self, table: &str, name: &str) -> Result<String> {
        Err(Error::execution(
            format!("drop foreign key {} on {}", name, table),
            "SQLite cannot drop constraints; rebuild the table with a sql operation",
        ))
    }

    fn drop_index_sql(&self, _table: &str, index: &str) -> String {
        format!("DROP INDEX {}", self.quote_identifier(index))
    }

    fn table_exists_sql(&self) -> String {
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?".to_string()
    }

    fn column_exists_sql(&self) -> String {
        "SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?".to_string()
    }

    fn index_exists_sql(&self) -> String {
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND tbl_name = ? AND name = ?"
            .to_string()
    }

    fn list_columns_sql(&self) -> String {
        "SELECT name FROM pragma_table_info(?) ORDER BY cid".to_string()
    }

    fn list_indexes_sql(&self) -> String {
        // Automatic indexes backing constraints have no SQL text
        "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = ? AND sql IS NOT NULL ORDER BY name"
            .to_string()
    }

    // Constraint names only survive in the CREATE TABLE text
    fn foreign_key_exists_sql(&self) -> String {
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ? \
         AND instr(sql, 'CONSTRAINT \"' || ? || '\" FOREIGN KEY') > 0"
            .to_string()
    }

    fn list_foreign_keys_sql(&self) -> Option<String> {
        None
    }
}
