//! MySQL/MariaDB dialect
//!
//! MySQL commits implicitly around every DDL statement, so schema changes and
//! the ledger write cannot share one atomic transaction here.

use super::{DatabaseBackend, SqlDialect};
use crate::database::SqlValue;
use crate::error::Result;

/// MySQL/MariaDB dialect
pub struct MySQLDialect;

impl SqlDialect for MySQLDialect {
    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::MySQL
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        format!("`{}`", identifier.replace('`', "``"))
    }

    fn placeholder(&self, _position: usize) -> String {
        "?".to_string()
    }

    fn supports_transactional_ddl(&self) -> bool {
        false
    }

    fn alter_column_sql(
        &self,
        table: &str,
        column: &str,
        column_type: &str,
        nullable: bool,
        default: Option<&SqlValue>,
    ) -> Result<Vec<String>> {
        Ok(vec![format!(
            "ALTER TABLE {} MODIFY COLUMN {}",
            self.quote_identifier(table),
            self.column_definition(column, column_type, nullable, default)
        )])
    }

    fn drop_index_sql(&self, table: &str, index: &str) -> String {
        format!(
            "DROP INDEX {} ON {}",
            self.quote_identifier(index),
            self.quote_identifier(table)
        )
    }

    fn drop_foreign_key_sql(&self, table: &str, name: &str) -> Result<String> {
        Ok(format!(
            "ALTER TABLE {} DROP FOREIGN KEY {}",
            self.quote_identifier(table),
            self.quote_identifier(name)
        ))
    }

    fn table_exists_sql(&self) -> String {
        "SELECT COUNT(*) FROM information_schema.tables \
         WHERE table_schema = DATABASE() AND table_name = ?"
            .to_string()
    }

    fn column_exists_sql(&self) -> String {
        "SELECT COUNT(*) FROM information_schema.columns \
         WHERE table_schema = DATABASE() AND table_name = ? AND column_name = ?"
            .to_string()
    }

    fn index_exists_sql(&self) -> String {
        "SELECT COUNT(*) FROM information_schema.statistics \
         WHERE table_schema = DATABASE() AND table_name = ? AND index_name = ?"
            .to_string()
    }

    fn list_columns_sql(&self) -> String {
        "SELECT column_name AS name FROM information_schema.columns \
         WHERE table_schema = DATABASE() AND table_name = ? ORDER BY ordinal_position"
            .to_string()
    }

    fn list_indexes_sql(&self) -> String {
        "SELECT DISTINCT index_name AS name FROM information_schema.statistics \
         WHERE table_schema = DATABASE() AND table_name = ? AND index_name <> 'PRIMARY' \
         ORDER BY index_name"
            .to_string()
    }

    fn foreign_key_exists_sql(&self) -> String {
        "SELECT COUNT(*) FROM information_schema.table_constraints \
         WHERE table_schema = DATABASE() AND table_name = ? AND constraint_name = ? \
         AND constraint_type = 'FOREIGN KEY'"
            .to_string()
    }

    fn list_foreign_keys_sql(&self) -> Option<String> {
        Some(
            "SELECT constraint_name AS name FROM information_schema.table_constraints \
             WHERE table_schema = DATABASE() AND table_name = ? \
             AND constraint_type = 'FOREIGN KEY' ORDER BY constraint_name"
                .to_string(),
        )
    }
}
