//! Schema operations
//!
//! The unit of work inside a change. Operations are plain data; the
//! [`SchemaExecutor`](super::SchemaExecutor) turns them into SQL.
//!
//! In change files an operation is a table tagged by `op`:
//!
//! ```toml
//! [[up]]
//! op = "add_column"
//! table = "ImportedComprehensiveTrainingQuestions"
//! column = "CodeFilePath"
//! type = "varchar(500)"
//! ```

use crate::database::SqlValue;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

fn default_nullable() -> bool {
    true
}

/// Column definition used by `create_table`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<SqlValue>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            nullable: true,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default_value(mut self, value: impl Into<SqlValue>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// What happens to referencing rows when the referenced row is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    Cascade,
    Restrict,
    SetNull,
    NoAction,
}

impl ReferentialAction {
    pub fn as_sql(self) -> &'static str {
        match self {
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::NoAction => "NO ACTION",
        }
    }
}

/// Named foreign key constraint
///
/// ```toml
/// [[up.foreign_keys]]
/// name = "FK_ImportedExams_Users_ImportedBy"
/// columns = ["ImportedBy"]
/// references_table = "Users"
/// references_columns = ["Id"]
/// on_delete = "restrict"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyDef {
    pub name: String,
    pub columns: Vec<String>,
    pub references_table: String,
    pub references_columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<ReferentialAction>,
}

impl ForeignKeyDef {
    pub fn new(
        name: impl Into<String>,
        columns: &[&str],
        references_table: impl Into<String>,
        references_columns: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            references_table: references_table.into(),
            references_columns: references_columns.iter().map(|c| c.to_string()).collect(),
            on_delete: None,
        }
    }

    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = Some(action);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.columns.is_empty() || self.columns.len() != self.references_columns.len() {
            return Err(Error::validation(format!(
                "Foreign key {} needs the same non-zero number of columns on both sides",
                self.name
            )));
        }
        Ok(())
    }
}

/// One DDL/DML primitive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SchemaOperation {
    AddColumn {
        table: String,
        column: String,
        #[serde(rename = "type")]
        column_type: String,
        #[serde(default = "default_nullable")]
        nullable: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<SqlValue>,
    },
    /// Row data in the column is lost
    DropColumn { table: String, column: String },
    CreateIndex {
        table: String,
        index_name: String,
        columns: Vec<String>,
        #[serde(default)]
        unique: bool,
    },
    DropIndex { table: String, index_name: String },
    /// Seed row; `values` must contain `key_column`
    InsertRow {
        table: String,
        key_column: String,
        values: BTreeMap<String, SqlValue>,
    },
    /// Removes the row whose `key_column` equals `key_value`
    DeleteRow {
        table: String,
        key_column: String,
        key_value: SqlValue,
    },
    /// Data backfill; a missing `value` writes NULL
    UpdateRow {
        table: String,
        key_column: String,
        key_value: SqlValue,
        column: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<SqlValue>,
    },
    CreateTable {
        table: String,
        columns: Vec<ColumnDef>,
        #[serde(default)]
        primary_key: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        foreign_keys: Vec<ForeignKeyDef>,
    },
    /// All rows are lost
    DropTable { table: String },
    /// Narrowing conversions may truncate or reject data
    AlterColumn {
        table: String,
        column: String,
        #[serde(rename = "type")]
        column_type: String,
        #[serde(default = "default_nullable")]
        nullable: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<SqlValue>,
    },
    AddForeignKey {
        table: String,
        #[serde(flatten)]
        foreign_key: ForeignKeyDef,
    },
    DropForeignKey { table: String, name: String },
    /// Raw statement, executed as-is without a state check
    Sql { statement: String },
}

impl SchemaOperation {
    pub fn add_column(
        table: impl Into<String>,
        column: impl Into<String>,
        column_type: impl Into<String>,
    ) -> Self {
        SchemaOperation::AddColumn {
            table: table.into(),
            column: column.into(),
            column_type: column_type.into(),
            nullable: true,
            default: None,
        }
    }

    pub fn drop_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        SchemaOperation::DropColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    pub fn create_index(
        table: impl Into<String>,
        index_name: impl Into<String>,
        columns: &[&str],
    ) -> Self {
        SchemaOperation::CreateIndex {
            table: table.into(),
            index_name: index_name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
        }
    }

    pub fn drop_index(table: impl Into<String>, index_name: impl Into<String>) -> Self {
        SchemaOperation::DropIndex {
            table: table.into(),
            index_name: index_name.into(),
        }
    }

    pub fn update_row(
        table: impl Into<String>,
        key_column: impl Into<String>,
        key_value: impl Into<SqlValue>,
        column: impl Into<String>,
        value: Option<SqlValue>,
    ) -> Self {
        SchemaOperation::UpdateRow {
            table: table.into(),
            key_column: key_column.into(),
            key_value: key_value.into(),
            column: column.into(),
            value,
        }
    }

    pub fn create_table(table: impl Into<String>, columns: Vec<ColumnDef>, primary_key: &[&str]) -> Self {
        SchemaOperation::CreateTable {
            table: table.into(),
            columns,
            primary_key: primary_key.iter().map(|c| c.to_string()).collect(),
            foreign_keys: Vec::new(),
        }
    }

    /// Attach foreign keys to a `create_table`; other operations are returned unchanged
    pub fn with_foreign_keys(mut self, keys: Vec<ForeignKeyDef>) -> Self {
        if let SchemaOperation::CreateTable { foreign_keys, .. } = &mut self {
            foreign_keys.extend(keys);
        }
        self
    }

    pub fn insert_row<K, V>(
        table: impl Into<String>,
        key_column: impl Into<String>,
        values: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<SqlValue>,
    {
        SchemaOperation::InsertRow {
            table: table.into(),
            key_column: key_column.into(),
            values: values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn delete_row(
        table: impl Into<String>,
        key_column: impl Into<String>,
        key_value: impl Into<SqlValue>,
    ) -> Self {
        SchemaOperation::DeleteRow {
            table: table.into(),
            key_column: key_column.into(),
            key_value: key_value.into(),
        }
    }

    pub fn add_foreign_key(table: impl Into<String>, foreign_key: ForeignKeyDef) -> Self {
        SchemaOperation::AddForeignKey {
            table: table.into(),
            foreign_key,
        }
    }

    pub fn drop_foreign_key(table: impl Into<String>, name: impl Into<String>) -> Self {
        SchemaOperation::DropForeignKey {
            table: table.into(),
            name: name.into(),
        }
    }

    pub fn drop_table(table: impl Into<String>) -> Self {
        SchemaOperation::DropTable {
            table: table.into(),
        }
    }

    pub fn sql(statement: impl Into<String>) -> Self {
        SchemaOperation::Sql {
            statement: statement.into(),
        }
    }

    /// Table the operation targets, if it targets exactly one
    pub fn table(&self) -> Option<&str> {
        match self {
            SchemaOperation::AddColumn { table, .. }
            | SchemaOperation::DropColumn { table, .. }
            | SchemaOperation::CreateIndex { table, .. }
            | SchemaOperation::DropIndex { table, .. }
            | SchemaOperation::InsertRow { table, .. }
            | SchemaOperation::DeleteRow { table, .. }
            | SchemaOperation::UpdateRow { table, .. }
            | SchemaOperation::CreateTable { table, .. }
            | SchemaOperation::DropTable { table }
            | SchemaOperation::AlterColumn { table, .. }
            | SchemaOperation::AddForeignKey { table, .. }
            | SchemaOperation::DropForeignKey { table, .. } => Some(table),
            SchemaOperation::Sql { .. } => None,
        }
    }

    /// Structural checks that need no database
    pub fn validate(&self) -> Result<()> {
        match self {
            SchemaOperation::InsertRow {
                table,
                key_column,
                values,
            } => {
                if !values.contains_key(key_column) {
                    return Err(Error::validation(format!(
                        "insert into {} has no value for key column {}",
                        table, key_column
                    )));
                }
                Ok(())
            }
            SchemaOperation::CreateIndex {
                index_name, columns, ..
            } if columns.is_empty() => Err(Error::validation(format!(
                "index {} has no columns",
                index_name
            ))),
            SchemaOperation::CreateTable {
                table,
                columns,
                foreign_keys,
                ..
            } => {
                if columns.is_empty() {
                    return Err(Error::validation(format!("table {} has no columns", table)));
                }
                foreign_keys.iter().try_for_each(ForeignKeyDef::validate)
            }
            SchemaOperation::AddForeignKey { foreign_key, .. } => foreign_key.validate(),
            _ => Ok(()),
        }
    }

    /// Inverse derivable from the operation alone
    ///
    /// Drops, deletes, column alterations, backfills and raw SQL do not carry
    /// the previous state and return `None`; their inverse has to be written by
    /// hand. An inserted row inverts to a delete by its key.
    pub fn inverse(&self) -> Option<SchemaOperation> {
        match self {
            SchemaOperation::AddColumn { table, column, .. } => Some(SchemaOperation::DropColumn {
                table: table.clone(),
                column: column.clone(),
            }),
            SchemaOperation::CreateIndex {
                table, index_name, ..
            } => Some(SchemaOperation::DropIndex {
                table: table.clone(),
                index_name: index_name.clone(),
            }),
            SchemaOperation::CreateTable { table, .. } => Some(SchemaOperation::DropTable {
                table: table.clone(),
            }),
            SchemaOperation::InsertRow {
                table,
                key_column,
                values,
            } => values
                .get(key_column)
                .map(|key_value| SchemaOperation::DeleteRow {
                    table: table.clone(),
                    key_column: key_column.clone(),
                    key_value: key_value.clone(),
                }),
            SchemaOperation::AddForeignKey { table, foreign_key } => {
                Some(SchemaOperation::DropForeignKey {
                    table: table.clone(),
                    name: foreign_key.name.clone(),
                })
            }
            SchemaOperation::DropColumn { .. }
            | SchemaOperation::DropIndex { .. }
            | SchemaOperation::DeleteRow { .. }
            | SchemaOperation::UpdateRow { .. }
            | SchemaOperation::DropTable { .. }
            | SchemaOperation::AlterColumn { .. }
            | SchemaOperation::DropForeignKey { .. }
            | SchemaOperation::Sql { .. } => None,
        }
    }

    /// Whether running the operation can discard stored data
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            SchemaOperation::DropColumn { .. }
                | SchemaOperation::DropTable { .. }
                | SchemaOperation::DeleteRow { .. }
                | SchemaOperation::AlterColumn { .. }
                | SchemaOperation::Sql { .. }
        )
    }

    /// Operator-facing note on what data the operation can discard
    pub fn data_loss_note(&self) -> Option<String> {
        match self {
            SchemaOperation::DropColumn { table, column } => Some(format!(
                "dropping {}.{} discards its data; reversing this cannot restore it",
                table, column
            )),
            SchemaOperation::DropTable { table } => Some(format!(
                "dropping table {} discards all of its rows",
                table
            )),
            SchemaOperation::DeleteRow {
                table,
                key_column,
                key_value,
            } => Some(format!(
                "deleting the {} row with {} = {} discards it",
                table, key_column, key_value
            )),
            SchemaOperation::AlterColumn {
                table,
                column,
                column_type,
                ..
            } => Some(format!(
                "converting {}.{} to {} may truncate or reject existing values",
                table, column, column_type
            )),
            SchemaOperation::Sql { .. } => {
                Some("raw SQL statement; effects on data are not checked".to_string())
            }
            _ => None,
        }
    }
}

impl fmt::Display for SchemaOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaOperation::AddColumn {
                table,
                column,
                column_type,
                ..
            } => write!(f, "add column {}.{} ({})", table, column, column_type),
            SchemaOperation::DropColumn { table, column } => {
                write!(f, "drop column {}.{}", table, column)
            }
            SchemaOperation::CreateIndex {
                table, index_name, ..
            } => write!(f, "create index {} on {}", index_name, table),
            SchemaOperation::DropIndex { table, index_name } => {
                write!(f, "drop index {} on {}", index_name, table)
            }
            SchemaOperation::InsertRow {
                table,
                key_column,
                values,
            } => match values.get(key_column) {
                Some(key_value) => {
                    write!(f, "insert into {} where {} = {}", table, key_column, key_value)
                }
                None => write!(f, "insert into {}", table),
            },
            SchemaOperation::DeleteRow {
                table,
                key_column,
                key_value,
            } => write!(f, "delete from {} where {} = {}", table, key_column, key_value),
            SchemaOperation::UpdateRow {
                table,
                key_column,
                key_value,
                column,
                ..
            } => write!(
                f,
                "update {}.{} where {} = {}",
                table, column, key_column, key_value
            ),
            SchemaOperation::CreateTable { table, .. } => write!(f, "create table {}", table),
            SchemaOperation::DropTable { table } => write!(f, "drop table {}", table),
            SchemaOperation::AlterColumn {
                table,
                column,
                column_type,
                ..
            } => write!(f, "alter column {}.{} ({})", table, column, column_type),
            SchemaOperation::AddForeignKey { table, foreign_key } => write!(
                f,
                "add foreign key {} on {} -> {}",
                foreign_key.name, table, foreign_key.references_table
            ),
            SchemaOperation::DropForeignKey { table, name } => {
                write!(f, "drop foreign key {} on {}", name, table)
            }
            SchemaOperation::Sql { statement } => {
                let preview: String = statement.chars().take(60).collect();
                write!(f, "sql `{}`", preview)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverses() {
        let add = SchemaOperation::add_column("Users", "PhoneNumber", "varchar(20)");
        assert_eq!(
            add.inverse(),
            Some(SchemaOperation::drop_column("Users", "PhoneNumber"))
        );

        let index = SchemaOperation::create_index("Users", "IX_Users_PhoneNumber", &["PhoneNumber"]);
        assert_eq!(
            index.inverse(),
            Some(SchemaOperation::drop_index("Users", "IX_Users_PhoneNumber"))
        );

        assert!(SchemaOperation::drop_column("Users", "PhoneNumber")
            .inverse()
            .is_none());
        assert!(SchemaOperation::sql("DELETE FROM Users").inverse().is_none());
    }

    #[test]
    fn destructive_operations_have_notes() {
        let drop = SchemaOperation::drop_column("ExamSubjects", "MinScore");
        assert!(drop.is_destructive());
        assert!(drop.data_loss_note().unwrap().contains("ExamSubjects.MinScore"));

        let add = SchemaOperation::add_column("ExamSubjects", "Weight", "int");
        assert!(!add.is_destructive());
        assert!(add.data_loss_note().is_none());
    }

    #[test]
    fn deserializes_tagged_operations() {
        let op: SchemaOperation = serde_json::from_str(
            r#"{"op":"add_column","table":"Organizations","column":"IsActive","type":"tinyint(1)","nullable":false,"default":true}"#,
        )
        .unwrap();

        assert_eq!(
            op,
            SchemaOperation::AddColumn {
                table: "Organizations".to_string(),
                column: "IsActive".to_string(),
                column_type: "tinyint(1)".to_string(),
                nullable: false,
                default: Some(SqlValue::Bool(true)),
            }
        );

        let op: SchemaOperation = serde_json::from_str(
            r#"{"op":"update_row","table":"Users","key_column":"Id","key_value":1,"column":"Role"}"#,
        )
        .unwrap();
        assert!(matches!(
            op,
            SchemaOperation::UpdateRow {
                key_value: SqlValue::Int(1),
                value: None,
                ..
            }
        ));
    }

    #[test]
    fn seed_rows_invert_to_deletes_by_key() {
        let seed = SchemaOperation::insert_row(
            "SpecialPractices",
            "Id",
            [("Id", SqlValue::Int(1)), ("Name", SqlValue::from("Windows"))],
        );
        assert!(seed.validate().is_ok());
        assert_eq!(
            seed.inverse(),
            Some(SchemaOperation::delete_row("SpecialPractices", "Id", 1))
        );

        let keyless = SchemaOperation::insert_row("SpecialPractices", "Id", [("Name", "Windows")]);
        assert!(matches!(keyless.validate(), Err(Error::Validation(_))));
        assert!(keyless.inverse().is_none());

        let delete = SchemaOperation::delete_row("SpecialPractices", "Id", 1);
        assert!(delete.is_destructive());
        assert!(delete.inverse().is_none());
    }

    #[test]
    fn foreign_keys_invert_and_validate() {
        let fk = ForeignKeyDef::new("FK_ImportedExams_Users_ImportedBy", &["ImportedBy"], "Users", &["Id"])
            .on_delete(ReferentialAction::Restrict);
        let add = SchemaOperation::add_foreign_key("ImportedExams", fk);
        assert!(add.validate().is_ok());
        assert_eq!(
            add.inverse(),
            Some(SchemaOperation::drop_foreign_key(
                "ImportedExams",
                "FK_ImportedExams_Users_ImportedBy"
            ))
        );

        let mismatched = ForeignKeyDef::new("FK_Bad", &["A", "B"], "Users", &["Id"]);
        let table = SchemaOperation::create_table("Bad", vec![ColumnDef::new("A", "int")], &[])
            .with_foreign_keys(vec![mismatched]);
        assert!(matches!(table.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn deserializes_flattened_foreign_key() {
        let op: SchemaOperation = toml::from_str(
            r#"
op = "add_foreign_key"
table = "ImportedExams"
name = "FK_ImportedExams_Users_ImportedBy"
columns = ["ImportedBy"]
references_table = "Users"
references_columns = ["Id"]
on_delete = "cascade"
"#,
        )
        .unwrap();
        match op {
            SchemaOperation::AddForeignKey { table, foreign_key } => {
                assert_eq!(table, "ImportedExams");
                assert_eq!(foreign_key.on_delete, Some(ReferentialAction::Cascade));
            }
            other => panic!("unexpected operation {:?}", other),
        }
    }

    #[test]
    fn display_is_readable() {
        let op = SchemaOperation::drop_index("ImportedExams", "IX_ImportedExams_ImportedBy");
        assert_eq!(
            op.to_string(),
            "drop index IX_ImportedExams_ImportedBy on ImportedExams"
        );
    }
}
