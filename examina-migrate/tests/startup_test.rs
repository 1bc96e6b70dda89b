mod common;

use common::*;
use examina_migrate::migrations::{ChangeDescriptor, MigrationLock};
use examina_migrate::{run_startup, DatabaseBackend, Error, MigratorConfig, SchemaOperation};
use std::time::{Duration, Instant};

fn config(db: &TestDb, max_attempts: u32, base_delay_ms: u64) -> MigratorConfig {
    let mut config = MigratorConfig::for_url(&db.url);
    config.lock_timeout_secs = 0;
    config.lock_poll_interval_ms = 20;
    config.retry.max_attempts = max_attempts;
    config.retry.base_delay_ms = base_delay_ms;
    config
}

#[tokio::test]
async fn test_startup_waits_out_a_held_lock() {
    let db = TestDb::new().await;
    let config = config(&db, 20, 25);

    let lock = MigrationLock::new(
        DatabaseBackend::SQLite,
        config.lock_table.clone(),
        Duration::ZERO,
        Duration::from_millis(20),
    );
    let guard = lock.acquire(&db.pool, "pid-4242-other-runner").await.unwrap();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        guard.release().await.unwrap();
    });

    let started = Instant::now();
    let applied = run_startup(&config, registry(vec![create_users(), add_phone()]))
        .await
        .unwrap();

    assert_eq!(applied, vec![CREATE_USERS, ADD_PHONE]);
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert!(db.table_exists("Users").await);
}

#[tokio::test]
async fn test_startup_returns_failing_change_without_retry() {
    let db = TestDb::new().await;
    // A retry would sleep far longer than the timeout below
    let config = config(&db, 5, 10_000);

    let broken = ChangeDescriptor::new(
        ADD_PHONE,
        "AddUserPermissionSystem",
        vec![SchemaOperation::sql("INSERT INTO MissingTable (Id) VALUES (1)")],
        vec![SchemaOperation::sql("DELETE FROM MissingTable")],
    )
    .unwrap();

    let result = tokio::time::timeout(
        Duration::from_secs(3),
        run_startup(&config, registry(vec![create_users(), broken])),
    )
    .await
    .expect("execution failures must not be retried");

    let err = result.unwrap_err();
    assert!(matches!(err, Error::Migration { .. }));
    assert_eq!(err.change_id(), Some(ADD_PHONE));
    assert!(!err.is_retryable());
    assert!(db.table_exists("Users").await, "earlier change stays applied");
}

#[tokio::test]
async fn test_startup_tolerates_schema_drift() {
    let db = TestDb::new().await;
    let config = config(&db, 3, 10);

    run_startup(&config, registry(vec![create_users(), add_phone()]))
        .await
        .unwrap();
    db.execute("DROP INDEX IX_Users_PhoneNumber").await;

    let applied = run_startup(&config, registry(vec![create_users(), add_phone()]))
        .await
        .unwrap();
    assert!(applied.is_empty());
}
