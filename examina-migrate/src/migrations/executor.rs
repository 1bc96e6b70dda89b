//! Runs schema operations against a live connection
//!
//! Every operation is checked against the catalog first. Adding something
//! that already exists or dropping something that is absent is skipped with a
//! warning instead of failing, so a change survives partial manual fixes.
//! Seed rows are matched by their key column.

use super::operation::SchemaOperation;
use crate::database::{DatabaseBackend, SqlValue};
use crate::error::{Error, Result};
use sqlx::{AnyConnection, Row};

/// What happened to one operation
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Applied { rows_affected: u64 },
    Skipped(String),
}

impl ExecutionOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, ExecutionOutcome::Skipped(_))
    }
}

/// Executes operations on a connection (normally a transaction opened by the
/// engine)
#[derive(Debug, Clone, Copy)]
pub struct SchemaExecutor {
    backend: DatabaseBackend,
}

impl SchemaExecutor {
    pub fn new(backend: DatabaseBackend) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> DatabaseBackend {
        self.backend
    }

    /// Run one operation, skipping it when the target state already holds
    pub async fn execute(
        &self,
        conn: &mut AnyConnection,
        op: &SchemaOperation,
    ) -> Result<ExecutionOutcome> {
        let dialect = self.backend.dialect();

        let skip = match op {
            SchemaOperation::AddColumn { table, column, .. } => self
                .column_exists(conn, table, column)
                .await?
                .then(|| format!("column {}.{} already exists", table, column)),
            SchemaOperation::DropColumn { table, column } => (!self
                .column_exists(conn, table, column)
                .await?)
                .then(|| format!("column {}.{} does not exist", table, column)),
            SchemaOperation::CreateIndex {
                table, index_name, ..
            } => self
                .index_exists(conn, table, index_name)
                .await?
                .then(|| format!("index {} on {} already exists", index_name, table)),
            SchemaOperation::DropIndex { table, index_name } => (!self
                .index_exists(conn, table, index_name)
                .await?)
                .then(|| format!("index {} on {} does not exist", index_name, table)),
            SchemaOperation::CreateTable { table, .. } => self
                .table_exists(conn, table)
                .await?
                .then(|| format!("table {} already exists", table)),
            SchemaOperation::DropTable { table } => (!self.table_exists(conn, table).await?)
                .then(|| format!("table {} does not exist", table)),
            SchemaOperation::AddForeignKey { table, foreign_key } => self
                .foreign_key_exists(conn, table, &foreign_key.name)
                .await?
                .then(|| format!("foreign key {} on {} already exists", foreign_key.name, table)),
            SchemaOperation::DropForeignKey { table, name } => (!self
                .foreign_key_exists(conn, table, name)
                .await?)
                .then(|| format!("foreign key {} on {} does not exist", name, table)),
            // A missing table is left to fail on the insert itself
            SchemaOperation::InsertRow {
                table,
                key_column,
                values,
            } => {
                let exists = match values.get(key_column) {
                    Some(key_value) => {
                        self.table_exists(conn, table).await?
                            && self.row_exists(conn, table, key_column, key_value).await?
                    }
                    None => false,
                };
                exists.then(|| format!("row keyed by {} in {} already exists", key_column, table))
            }
            SchemaOperation::DeleteRow {
                table,
                key_column,
                key_value,
            } => {
                if !self.table_exists(conn, table).await? {
                    Some(format!("table {} does not exist", table))
                } else {
                    (!self.row_exists(conn, table, key_column, key_value).await?)
                        .then(|| format!("row {} = {} in {} does not exist", key_column, key_value, table))
                }
            }
            SchemaOperation::UpdateRow { .. }
            | SchemaOperation::AlterColumn { .. }
            | SchemaOperation::Sql { .. } => None,
        };

        if let Some(reason) = skip {
            log::warn!("Skipping {}: {}", op, reason);
            return Ok(ExecutionOutcome::Skipped(reason));
        }

        let rows_affected = match op {
            SchemaOperation::AddColumn {
                table,
                column,
                column_type,
                nullable,
                default,
            } => {
                let sql =
                    dialect.add_column_sql(table, column, column_type, *nullable, default.as_ref());
                self.run(conn, op, &sql).await?
            }
            SchemaOperation::DropColumn { table, column } => {
                self.run(conn, op, &dialect.drop_column_sql(table, column))
                    .await?
            }
            SchemaOperation::CreateIndex {
                table,
                index_name,
                columns,
                unique,
            } => {
                let sql = dialect.create_index_sql(table, index_name, columns, *unique);
                self.run(conn, op, &sql).await?
            }
            SchemaOperation::DropIndex { table, index_name } => {
                self.run(conn, op, &dialect.drop_index_sql(table, index_name))
                    .await?
            }
            SchemaOperation::CreateTable {
                table,
                columns,
                primary_key,
                foreign_keys,
            } => {
                let sql = dialect.create_table_sql(table, columns, primary_key, foreign_keys);
                self.run(conn, op, &sql).await?
            }
            SchemaOperation::DropTable { table } => {
                self.run(conn, op, &dialect.drop_table_sql(table)).await?
            }
            SchemaOperation::AlterColumn {
                table,
                column,
                column_type,
                nullable,
                default,
            } => {
                let statements = dialect.alter_column_sql(
                    table,
                    column,
                    column_type,
                    *nullable,
                    default.as_ref(),
                )?;
                let mut total = 0;
                for sql in &statements {
                    total += self.run(conn, op, sql).await?;
                }
                total
            }
            SchemaOperation::UpdateRow {
                table,
                key_column,
                key_value,
                column,
                value,
            } => {
                let sql = dialect.update_row_sql(table, key_column, column);
                let value = value.as_ref().unwrap_or(&SqlValue::Null);
                let rows = self.run_bound(conn, op, &sql, &[value, key_value]).await?;
                if rows == 0 {
                    log::debug!("{} matched no rows", op);
                }
                rows
            }
            SchemaOperation::InsertRow { table, values, .. } => {
                let columns: Vec<String> = values.keys().cloned().collect();
                let params: Vec<&SqlValue> = values.values().collect();
                let sql = dialect.insert_row_sql(table, &columns);
                self.run_bound(conn, op, &sql, &params).await?
            }
            SchemaOperation::DeleteRow {
                table,
                key_column,
                key_value,
            } => {
                let sql = dialect.delete_row_sql(table, key_column);
                self.run_bound(conn, op, &sql, &[key_value]).await?
            }
            SchemaOperation::AddForeignKey { table, foreign_key } => {
                let sql = dialect.add_foreign_key_sql(table, foreign_key)?;
                self.run(conn, op, &sql).await?
            }
            SchemaOperation::DropForeignKey { table, name } => {
                let sql = dialect.drop_foreign_key_sql(table, name)?;
                self.run(conn, op, &sql).await?
            }
            SchemaOperation::Sql { statement } => self.run(conn, op, statement).await?,
        };

        log::debug!("Executed {}", op);
        Ok(ExecutionOutcome::Applied { rows_affected })
    }

    async fn run(&self, conn: &mut AnyConnection, op: &SchemaOperation, sql: &str) -> Result<u64> {
        log::trace!("{}", sql);
        let result = sqlx::query(sql)
            .execute(&mut *conn)
            .await
            .map_err(|e| Error::execution(op.to_string(), e))?;
        Ok(result.rows_affected())
    }

    async fn run_bound(
        &self,
        conn: &mut AnyConnection,
        op: &SchemaOperation,
        sql: &str,
        params: &[&SqlValue],
    ) -> Result<u64> {
        log::trace!("{}", sql);
        let mut query = sqlx::query(sql);
        for param in params {
            query = param.bind(query);
        }
        let result = query
            .execute(&mut *conn)
            .await
            .map_err(|e| Error::execution(op.to_string(), e))?;
        Ok(result.rows_affected())
    }

    async fn count(&self, conn: &mut AnyConnection, sql: &str, params: &[&str]) -> Result<bool> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = query.bind(param.to_string());
        }
        let count: i64 = query.fetch_one(&mut *conn).await?.try_get(0)?;
        Ok(count > 0)
    }

    async fn names(&self, conn: &mut AnyConnection, sql: &str, table: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(sql)
            .bind(table.to_string())
            .fetch_all(&mut *conn)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(Error::from))
            .collect()
    }

    pub async fn table_exists(&self, conn: &mut AnyConnection, table: &str) -> Result<bool> {
        let sql = self.backend.dialect().table_exists_sql();
        self.count(conn, &sql, &[table]).await
    }

    pub async fn column_exists(
        &self,
        conn: &mut AnyConnection,
        table: &str,
        column: &str,
    ) -> Result<bool> {
        let sql = self.backend.dialect().column_exists_sql();
        self.count(conn, &sql, &[table, column]).await
    }

    pub async fn index_exists(
        &self,
        conn: &mut AnyConnection,
        table: &str,
        index: &str,
    ) -> Result<bool> {
        let sql = self.backend.dialect().index_exists_sql();
        self.count(conn, &sql, &[table, index]).await
    }

    pub async fn foreign_key_exists(
        &self,
        conn: &mut AnyConnection,
        table: &str,
        name: &str,
    ) -> Result<bool> {
        let sql = self.backend.dialect().foreign_key_exists_sql();
        self.count(conn, &sql, &[table, name]).await
    }

    /// Whether `table` has a row whose `key_column` equals `key_value`
    pub async fn row_exists(
        &self,
        conn: &mut AnyConnection,
        table: &str,
        key_column: &str,
        key_value: &SqlValue,
    ) -> Result<bool> {
        let sql = self.backend.dialect().row_exists_sql(table, key_column);
        let count: i64 = key_value
            .bind(sqlx::query(&sql))
            .fetch_one(&mut *conn)
            .await?
            .try_get(0)?;
        Ok(count > 0)
    }

    /// Names of foreign key constraints on `table`, when the backend exposes them
    pub async fn foreign_keys(
        &self,
        conn: &mut AnyConnection,
        table: &str,
    ) -> Result<Option<Vec<String>>> {
        match self.backend.dialect().list_foreign_keys_sql() {
            Some(sql) => Ok(Some(self.names(conn, &sql, table).await?)),
            None => Ok(None),
        }
    }

    /// Column names of `table` in catalog order
    pub async fn columns(&self, conn: &mut AnyConnection, table: &str) -> Result<Vec<String>> {
        let sql = self.backend.dialect().list_columns_sql();
        self.names(conn, &sql, table).await
    }

    /// Names of explicitly created indexes on `table`
    pub async fn indexes(&self, conn: &mut AnyConnection, table: &str) -> Result<Vec<String>> {
        let sql = self.backend.dialect().list_indexes_sql();
        self.names(conn, &sql, table).await
    }
}
