//! PostgreSQL dialect

use super::{DatabaseBackend, SqlDialect};
use crate::database::SqlValue;
use crate::error::Result;

/// PostgreSQL dialect
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::Postgres
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }

    fn placeholder(&self, position: usize) -> String {
        format!("${}", position)
    }

    fn alter_column_sql(
        &self,
        table: &str,
        column: &str,
        column_type: &str,
        nullable: bool,
        default: Option<&SqlValue>,
    ) -> Result<Vec<String>> {
        let prefix = format!(
            "ALTER TABLE {} ALTER COLUMN {}",
            self.quote_identifier(table),
            self.quote_identifier(column)
        );
        let column_ref = self.quote_identifier(column);

        Ok(vec![
            format!(
                "{} TYPE {} USING {}::{}",
                prefix, column_type, column_ref, column_type
            ),
            format!(
                "{} {} NOT NULL",
                prefix,
                if nullable { "DROP" } else { "SET" }
            ),
            match default {
                Some(value) => format!("{} SET DEFAULT {}", prefix, self.literal(value)),
                None => format!("{} DROP DEFAULT", prefix),
            },
        ])
    }

    fn drop_index_sql(&self, _table: &str, index: &str) -> String {
        format!("DROP INDEX {}", self.quote_identifier(index))
    }

    fn drop_foreign_key_sql(&self, table: &str, name: &str) -> Result<String> {
        Ok(format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            self.quote_identifier(table),
            self.quote_identifier(name)
        ))
    }

    fn table_exists_sql(&self) -> String {
        "SELECT COUNT(*) FROM information_schema.tables \
         WHERE table_schema = current_schema() AND table_name = $1"
            .to_string()
    }

    fn column_exists_sql(&self) -> String {
        "SELECT COUNT(*) FROM information_schema.columns \
         WHERE table_schema = current_schema() AND table_name = $1 AND column_name = $2"
            .to_string()
    }

    fn index_exists_sql(&self) -> String {
        "SELECT COUNT(*) FROM pg_indexes \
         WHERE schemaname = current_schema() AND tablename = $1 AND indexname = $2"
            .to_string()
    }

    fn list_columns_sql(&self) -> String {
        "SELECT column_name::text AS name FROM information_schema.columns \
         WHERE table_schema = current_schema() AND table_name = $1 ORDER BY ordinal_position"
            .to_string()
    }

    fn list_indexes_sql(&self) -> String {
        "SELECT indexname::text AS name FROM pg_indexes \
         WHERE schemaname = current_schema() AND tablename = $1 ORDER BY indexname"
            .to_string()
    }

    fn foreign_key_exists_sql(&self) -> String {
        "SELECT COUNT(*) FROM information_schema.table_constraints \
         WHERE table_schema = current_schema() AND table_name = $1 AND constraint_name = $2 \
         AND constraint_type = 'FOREIGN KEY'"
            .to_string()
    }

    fn list_foreign_keys_sql(&self) -> Option<String> {
        Some(
            "SELECT constraint_name::text AS name FROM information_schema.table_constraints \
             WHERE table_schema = current_schema() AND table_name = $1 \
             AND constraint_type = 'FOREIGN KEY' ORDER BY constraint_name"
                .to_string(),
        )
    }
}
