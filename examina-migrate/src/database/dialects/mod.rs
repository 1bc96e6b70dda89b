//! Database dialect implementations for schema changes
//!
//! Each dialect renders DDL for the schema operations and provides the
//! catalog queries used for pre-execution state checks. Introspection queries
//! take their parameters in a fixed order documented on each method.

use crate::database::SqlValue;
use crate::error::{Error, Result};
use crate::migrations::{ColumnDef, ForeignKeyDef};

pub mod mysql;
pub mod postgres;
pub mod sqlite;

pub use mysql::MySQLDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SQLiteDialect;

/// Database backend types supported by the migration engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseBackend {
    Postgres,
    MySQL,
    SQLite,
}

static POSTGRES: PostgresDialect = PostgresDialect;
static MYSQL: MySQLDialect = MySQLDialect;
static SQLITE: SQLiteDialect = SQLiteDialect;

impl DatabaseBackend {
    /// Pick the backend from a connection URL
    pub fn from_url(database_url: &str) -> Result<Self> {
        if database_url.starts_with("mysql://") || database_url.starts_with("mariadb://") {
            Ok(DatabaseBackend::MySQL)
        } else if database_url.starts_with("postgresql://")
            || database_url.starts_with("postgres://")
        {
            Ok(DatabaseBackend::Postgres)
        } else if database_url.starts_with("sqlite:") {
            Ok(DatabaseBackend::SQLite)
        } else {
            Err(Error::config(format!(
                "Unsupported database URL '{}'. Supported: MySQL, PostgreSQL, SQLite",
                redact_url(database_url)
            )))
        }
    }

    /// SQL dialect for this backend
    pub fn dialect(self) -> &'static dyn SqlDialect {
        match self {
            DatabaseBackend::Postgres => &POSTGRES,
            DatabaseBackend::MySQL => &MYSQL,
            DatabaseBackend::SQLite => &SQLITE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DatabaseBackend::Postgres => "PostgreSQL",
            DatabaseBackend::MySQL => "MySQL",
            DatabaseBackend::SQLite => "SQLite",
        }
    }
}

/// Hide the password part of a connection URL for logging
pub fn redact_url(database_url: &str) -> String {
    let Some((scheme, rest)) = database_url.split_once("://") else {
        return database_url.to_string();
    };
    let Some((credentials, host)) = rest.split_once('@') else {
        return database_url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _)) => format!("{}://{}:***@{}", scheme, user, host),
        None => database_url.to_string(),
    }
}

/// Trait for database-specific schema SQL
pub trait SqlDialect: Send + Sync {
    fn backend(&self) -> DatabaseBackend;

    /// Quote an identifier (table, column or index name)
    fn quote_identifier(&self, identifier: &str) -> String;

    /// Parameter placeholder for the given 1-based position
    fn placeholder(&self, position: usize) -> String;

    /// Whether DDL participates in the surrounding transaction
    fn supports_transactional_ddl(&self) -> bool {
        true
    }

    fn true_literal(&self) -> &'static str {
        "TRUE"
    }

    fn false_literal(&self) -> &'static str {
        "FALSE"
    }

    fn literal(&self, value: &SqlValue) -> String {
        value.to_literal(self.true_literal(), self.false_literal())
    }

    /// `name type [NOT NULL] [DEFAULT literal]`
    fn column_definition(
        &self,
        column: &str,
        column_type: &str,
        nullable: bool,
        default: Option<&SqlValue>,
    ) -> String {
        let mut definition = format!("{} {}", self.quote_identifier(column), column_type);
        if !nullable {
            definition.push_str(" NOT NULL");
        }
        if let Some(value) = default {
            definition.push_str(" DEFAULT ");
            definition.push_str(&self.literal(value));
        }
        definition
    }

    fn add_column_sql(
        &self,
        table: &str,
        column: &str,
        column_type: &str,
        nullable: bool,
        default: Option<&SqlValue>,
    ) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote_identifier(table),
            self.column_definition(column, column_type, nullable, default)
        )
    }

    fn drop_column_sql(&self, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote_identifier(table),
            self.quote_identifier(column)
        )
    }

    /// Statements that change type, nullability and default of a column
    fn alter_column_sql(
        &self,
        table: &str,
        column: &str,
        column_type: &str,
        nullable: bool,
        default: Option<&SqlValue>,
    ) -> Result<Vec<String>>;

    fn create_index_sql(&self, table: &str, index: &str, columns: &[String], unique: bool) -> String {
        let columns = columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if unique { "UNIQUE " } else { "" },
            self.quote_identifier(index),
            self.quote_identifier(table),
            columns
        )
    }

    fn drop_index_sql(&self, table: &str, index: &str) -> String;

    fn identifier_list(&self, identifiers: &[String]) -> String {
        identifiers
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `CONSTRAINT name FOREIGN KEY (...) REFERENCES table (...) [ON DELETE action]`
    fn foreign_key_clause(&self, foreign_key: &ForeignKeyDef) -> String {
        let mut clause = format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            self.quote_identifier(&foreign_key.name),
            self.identifier_list(&foreign_key.columns),
            self.quote_identifier(&foreign_key.references_table),
            self.identifier_list(&foreign_key.references_columns)
        );
        if let Some(action) = foreign_key.on_delete {
            clause.push_str(" ON DELETE ");
            clause.push_str(action.as_sql());
        }
        clause
    }

    fn create_table_sql(
        &self,
        table: &str,
        columns: &[ColumnDef],
        primary_key: &[String],
        foreign_keys: &[ForeignKeyDef],
    ) -> String {
        let mut parts: Vec<String> = columns
            .iter()
            .map(|c| {
                self.column_definition(&c.name, &c.column_type, c.nullable, c.default.as_ref())
            })
            .collect();
        if !primary_key.is_empty() {
            parts.push(format!("PRIMARY KEY ({})", self.identifier_list(primary_key)));
        }
        parts.extend(foreign_keys.iter().map(|fk| self.foreign_key_clause(fk)));
        format!(
            "CREATE TABLE {} ({})",
            self.quote_identifier(table),
            parts.join(", ")
        )
    }

    fn drop_table_sql(&self, table: &str) -> String {
        format!("DROP TABLE {}", self.quote_identifier(table))
    }

    fn add_foreign_key_sql(&self, table: &str, foreign_key: &ForeignKeyDef) -> Result<String> {
        Ok(format!(
            "ALTER TABLE {} ADD {}",
            self.quote_identifier(table),
            self.foreign_key_clause(foreign_key)
        ))
    }

    fn drop_foreign_key_sql(&self, table: &str, name: &str) -> Result<String>;

    /// `INSERT` binding one value per column, in the given order
    fn insert_row_sql(&self, table: &str, columns: &[String]) -> String {
        let placeholders = (1..=columns.len())
            .map(|i| self.placeholder(i))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quote_identifier(table),
            self.identifier_list(columns),
            placeholders
        )
    }

    /// `DELETE` binding the key value
    fn delete_row_sql(&self, table: &str, key_column: &str) -> String {
        format!(
            "DELETE FROM {} WHERE {} = {}",
            self.quote_identifier(table),
            self.quote_identifier(key_column),
            self.placeholder(1)
        )
    }

    /// `UPDATE` binding the new value first and the key value second
    fn update_row_sql(&self, table: &str, key_column: &str, column: &str) -> String {
        format!(
            "UPDATE {} SET {} = {} WHERE {} = {}",
            self.quote_identifier(table),
            self.quote_identifier(column),
            self.placeholder(1),
            self.quote_identifier(key_column),
            self.placeholder(2)
        )
    }

    /// Count query binding the key value
    fn row_exists_sql(&self, table: &str, key_column: &str) -> String {
        format!(
            "SELECT COUNT(*) FROM {} WHERE {} = {}",
            self.quote_identifier(table),
            self.quote_identifier(key_column),
            self.placeholder(1)
        )
    }

    /// Count query binding `(table)`
    fn table_exists_sql(&self) -> String;

    /// Count query binding `(table, column)`
    fn column_exists_sql(&self) -> String;

    /// Count query binding `(table, index)`
    fn index_exists_sql(&self) -> String;

    /// Name listing binding `(table)`, one `name` column per row
    fn list_columns_sql(&self) -> String;

    /// Name listing binding `(table)`, one `name` column per row
    fn list_indexes_sql(&self) -> String;

    /// Count query binding `(table, constraint name)`
    fn foreign_key_exists_sql(&self) -> String;

    /// Name listing binding `(table)`, or `None` when the catalog does not
    /// expose constraint names
    fn list_foreign_keys_sql(&self) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_from_url() {
        assert_eq!(
            DatabaseBackend::from_url("mysql://root:pw@localhost/examina").unwrap(),
            DatabaseBackend::MySQL
        );
        assert_eq!(
            DatabaseBackend::from_url("postgres://localhost/examina").unwrap(),
            DatabaseBackend::Postgres
        );
        assert_eq!(
            DatabaseBackend::from_url("sqlite://examina.db?mode=rwc").unwrap(),
            DatabaseBackend::SQLite
        );
        assert_eq!(
            DatabaseBackend::from_url("sqlite::memory:").unwrap(),
            DatabaseBackend::SQLite
        );
        assert!(matches!(
            DatabaseBackend::from_url("mssql://localhost"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn redacts_password() {
        assert_eq!(
            redact_url("mysql://examina:secret@db:3306/examina"),
            "mysql://examina:***@db:3306/examina"
        );
        assert_eq!(redact_url("sqlite://local.db"), "sqlite://local.db");
    }

    #[test]
    fn create_table_with_foreign_key() {
        let dialect = DatabaseBackend::Postgres.dialect();
        let sql = dialect.create_table_sql(
            "ImportedExams",
            &[
                ColumnDef::new("Id", "integer").not_null(),
                ColumnDef::new("ImportedBy", "integer").not_null(),
            ],
            &["Id".to_string()],
            &[ForeignKeyDef::new("FK_ImportedExams_Users_ImportedBy", &["ImportedBy"], "Users", &["Id"])
                .on_delete(crate::migrations::ReferentialAction::Restrict)],
        );
        assert_eq!(
            sql,
            "CREATE TABLE \"ImportedExams\" (\"Id\" integer NOT NULL, \"ImportedBy\" integer NOT NULL, \
             PRIMARY KEY (\"Id\"), CONSTRAINT \"FK_ImportedExams_Users_ImportedBy\" FOREIGN KEY (\"ImportedBy\") \
             REFERENCES \"Users\" (\"Id\") ON DELETE RESTRICT)"
        );
    }

    #[test]
    fn insert_row_numbers_placeholders() {
        let columns = vec!["Id".to_string(), "Name".to_string()];
        assert_eq!(
            DatabaseBackend::Postgres
                .dialect()
                .insert_row_sql("SpecialPractices", &columns),
            "INSERT INTO \"SpecialPractices\" (\"Id\", \"Name\") VALUES ($1, $2)"
        );
        assert_eq!(
            DatabaseBackend::MySQL
                .dialect()
                .insert_row_sql("SpecialPractices", &columns),
            "INSERT INTO `SpecialPractices` (`Id`, `Name`) VALUES (?, ?)"
        );
    }

    #[test]
    fn column_definition_with_default() {
        let dialect = DatabaseBackend::MySQL.dialect();
        let sql = dialect.column_definition(
            "EnableTrial",
            "tinyint(1)",
            false,
            Some(&SqlValue::Bool(true)),
        );
        assert_eq!(sql, "`EnableTrial` tinyint(1) NOT NULL DEFAULT TRUE");
    }
}
