#![allow(dead_code)]

use examina_migrate::database;
use examina_migrate::migrations::{ChangeDescriptor, ChangeRegistry, SchemaExecutor};
use examina_migrate::{ColumnDef, DatabaseBackend, Migrator, MigratorConfig, MigratorOptions, SchemaOperation};
use sqlx::AnyPool;
use std::time::Duration;
use tempfile::TempDir;

pub const CREATE_USERS: &str = "20250801100313";
pub const ADD_PHONE: &str = "20250817221825";
pub const ADD_EMAIL: &str = "20250826045159";

/// SQLite database in a temporary directory
pub struct TestDb {
    pub dir: TempDir,
    pub url: String,
    pub pool: AnyPool,
}

impl TestDb {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("examina.db").display());
        let pool = Self::open(&url).await;
        Self { dir, url, pool }
    }

    pub async fn open(url: &str) -> AnyPool {
        database::connect(&MigratorConfig::for_url(url)).await.unwrap()
    }

    pub fn migrator(&self, registry: ChangeRegistry) -> Migrator {
        self.migrator_with(self.pool.clone(), registry, options())
    }

    pub fn migrator_with(
        &self,
        pool: AnyPool,
        registry: ChangeRegistry,
        options: MigratorOptions,
    ) -> Migrator {
        Migrator::new(pool, DatabaseBackend::SQLite, registry, options)
    }

    pub async fn columns(&self, table: &str) -> Vec<String> {
        let mut conn = self.pool.acquire().await.unwrap();
        SchemaExecutor::new(DatabaseBackend::SQLite)
            .columns(&mut conn, table)
            .await
            .unwrap()
    }

    pub async fn indexes(&self, table: &str) -> Vec<String> {
        let mut conn = self.pool.acquire().await.unwrap();
        SchemaExecutor::new(DatabaseBackend::SQLite)
            .indexes(&mut conn, table)
            .await
            .unwrap()
    }

    pub async fn table_exists(&self, table: &str) -> bool {
        let mut conn = self.pool.acquire().await.unwrap();
        SchemaExecutor::new(DatabaseBackend::SQLite)
            .table_exists(&mut conn, table)
            .await
            .unwrap()
    }

    pub async fn execute(&self, sql: &str) {
        sqlx::query(sql).execute(&self.pool).await.unwrap();
    }
}

/// Short lock timeouts so contention tests finish quickly
pub fn options() -> MigratorOptions {
    MigratorOptions {
        lock_timeout: Duration::from_secs(5),
        lock_poll_interval: Duration::from_millis(20),
        ..MigratorOptions::default()
    }
}

pub fn create_users() -> ChangeDescriptor {
    ChangeDescriptor::reversible(
        CREATE_USERS,
        "InitialMigration",
        vec![SchemaOperation::create_table(
            "Users",
            vec![
                ColumnDef::new("Id", "INTEGER").not_null(),
                ColumnDef::new("Username", "varchar(50)").not_null(),
            ],
            &["Id"],
        )],
    )
    .unwrap()
}

pub fn add_phone() -> ChangeDescriptor {
    ChangeDescriptor::reversible(
        ADD_PHONE,
        "AddUserPermissionSystem",
        vec![
            SchemaOperation::add_column("Users", "PhoneNumber", "varchar(20)"),
            SchemaOperation::create_index("Users", "IX_Users_PhoneNumber", &["PhoneNumber"]),
        ],
    )
    .unwrap()
}

pub fn add_email() -> ChangeDescriptor {
    ChangeDescriptor::reversible(
        ADD_EMAIL,
        "Migration_20250826_125154",
        vec![SchemaOperation::add_column("Users", "Email", "varchar(100)")],
    )
    .unwrap()
}

pub fn registry(changes: Vec<ChangeDescriptor>) -> ChangeRegistry {
    ChangeRegistry::from_changes(changes).unwrap()
}
