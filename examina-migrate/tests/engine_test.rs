mod common;

use common::*;
use examina_migrate::migrations::{ChangeDescriptor, LedgerStatus};
use examina_migrate::{Error, SchemaOperation};

#[tokio::test]
async fn test_migrate_to_latest_is_idempotent() {
    let db = TestDb::new().await;
    let migrator = db.migrator(registry(vec![create_users(), add_phone()]));

    let applied = migrator.migrate_to_latest().await.unwrap();
    assert_eq!(applied, vec![CREATE_USERS, ADD_PHONE]);

    let applied = migrator.migrate_to_latest().await.unwrap();
    assert!(applied.is_empty(), "second run should apply nothing");

    assert_eq!(
        db.columns("Users").await,
        vec!["Id", "Username", "PhoneNumber"]
    );
}

#[tokio::test]
async fn test_changes_apply_in_id_order_and_roll_back_newest_first() {
    let db = TestDb::new().await;
    // Registration order does not matter
    let migrator = db.migrator(registry(vec![add_email(), create_users(), add_phone()]));

    let applied = migrator.migrate_to_latest().await.unwrap();
    assert_eq!(applied, vec![CREATE_USERS, ADD_PHONE, ADD_EMAIL]);

    let rolled_back = migrator.rollback(2).await.unwrap();
    assert_eq!(rolled_back, vec![ADD_EMAIL, ADD_PHONE]);

    let status: Vec<_> = migrator.status().await.unwrap().collect();
    let applied: Vec<_> = status
        .iter()
        .filter(|s| s.applied)
        .map(|s| s.change_id.as_str())
        .collect();
    assert_eq!(applied, vec![CREATE_USERS]);
    assert_eq!(db.columns("Users").await, vec!["Id", "Username"]);

    let entries = migrator.ledger_entries().await.unwrap();
    let history: Vec<_> = entries
        .iter()
        .map(|e| (e.change_id.as_str(), e.status))
        .collect();
    assert_eq!(
        history,
        vec![
            (CREATE_USERS, LedgerStatus::Applied),
            (ADD_PHONE, LedgerStatus::Applied),
            (ADD_EMAIL, LedgerStatus::Applied),
            (ADD_EMAIL, LedgerStatus::RolledBack),
            (ADD_PHONE, LedgerStatus::RolledBack),
        ]
    );
}

#[tokio::test]
async fn test_up_then_down_restores_shape() {
    let db = TestDb::new().await;
    let migrator = db.migrator(registry(vec![create_users(), add_phone()]));

    migrator.migrate_to(CREATE_USERS).await.unwrap();
    let columns = db.columns("Users").await;
    let indexes = db.indexes("Users").await;

    migrator.migrate_to_latest().await.unwrap();
    assert!(db.indexes("Users").await.contains(&"IX_Users_PhoneNumber".to_string()));

    migrator.rollback(1).await.unwrap();
    assert_eq!(db.columns("Users").await, columns);
    assert_eq!(db.indexes("Users").await, indexes);

    // A rolled-back change can be applied again
    assert_eq!(migrator.migrate_to_latest().await.unwrap(), vec![ADD_PHONE]);
}

#[tokio::test]
async fn test_existing_column_and_absent_drop_are_skipped() {
    let db = TestDb::new().await;
    let migrator = db.migrator(registry(vec![create_users()]));
    migrator.migrate_to_latest().await.unwrap();

    // Added by hand before the change that adds it
    db.execute("ALTER TABLE Users ADD COLUMN PhoneNumber varchar(20)")
        .await;

    let drop_min_score = ChangeDescriptor::new(
        "20250806122506",
        "FixDecimalScoreTypes",
        vec![SchemaOperation::drop_column("Users", "MinScore")],
        vec![SchemaOperation::add_column("Users", "MinScore", "int")],
    )
    .unwrap();
    let migrator = db.migrator(registry(vec![create_users(), drop_min_score, add_phone()]));

    let applied = migrator.migrate_to_latest().await.unwrap();
    assert_eq!(applied, vec!["20250806122506", ADD_PHONE]);
    assert_eq!(
        db.columns("Users").await,
        vec!["Id", "Username", "PhoneNumber"]
    );
    assert_eq!(db.indexes("Users").await, vec!["IX_Users_PhoneNumber"]);
}

#[tokio::test]
async fn test_failed_change_leaves_earlier_changes_applied() {
    let db = TestDb::new().await;
    let broken = ChangeDescriptor::new(
        ADD_PHONE,
        "AddUserPermissionSystem",
        vec![
            SchemaOperation::add_column("Users", "PhoneNumber", "varchar(20)"),
            SchemaOperation::sql("INSERT INTO MissingTable (Id) VALUES (1)"),
        ],
        vec![SchemaOperation::drop_column("Users", "PhoneNumber")],
    )
    .unwrap();
    let migrator = db.migrator(registry(vec![create_users(), broken, add_email()]));

    let err = migrator.migrate_to_latest().await.unwrap_err();
    assert_eq!(err.change_id(), Some(ADD_PHONE));
    assert_eq!(err.error_code(), "E_EXECUTION");
    assert!(matches!(err, Error::Migration { .. }));

    let status: Vec<_> = migrator.status().await.unwrap().collect();
    let applied: Vec<_> = status
        .iter()
        .map(|s| (s.change_id.as_str(), s.applied))
        .collect();
    assert_eq!(
        applied,
        vec![(CREATE_USERS, true), (ADD_PHONE, false), (ADD_EMAIL, false)]
    );

    // The failing change's first operation was rolled back with it
    assert_eq!(db.columns("Users").await, vec!["Id", "Username"]);
    assert_eq!(migrator.ledger_entries().await.unwrap().len(), 1);

    // The lock was released despite the failure
    let fixed = db.migrator(registry(vec![create_users(), add_phone(), add_email()]));
    assert_eq!(
        fixed.migrate_to_latest().await.unwrap(),
        vec![ADD_PHONE, ADD_EMAIL]
    );
}

#[tokio::test]
async fn test_rollback_argument_checks() {
    let db = TestDb::new().await;
    let migrator = db.migrator(registry(vec![create_users(), add_phone()]));
    migrator.migrate_to_latest().await.unwrap();

    assert!(matches!(
        migrator.rollback(0).await,
        Err(Error::Validation(_))
    ));
    assert!(matches!(migrator.rollback(3).await, Err(Error::Rollback(_))));

    // Nothing was touched by the rejected calls
    assert_eq!(
        migrator.status().await.unwrap().filter(|s| s.applied).count(),
        2
    );
}

#[tokio::test]
async fn test_migrate_to_target() {
    let db = TestDb::new().await;
    let migrator = db.migrator(registry(vec![create_users(), add_phone(), add_email()]));

    let outcome = migrator.migrate_to(ADD_PHONE).await.unwrap();
    assert_eq!(outcome.applied, vec![CREATE_USERS, ADD_PHONE]);
    assert!(outcome.rolled_back.is_empty());

    migrator.migrate_to_latest().await.unwrap();
    let outcome = migrator.migrate_to(CREATE_USERS).await.unwrap();
    assert_eq!(outcome.rolled_back, vec![ADD_EMAIL, ADD_PHONE]);
    assert!(outcome.applied.is_empty());

    assert!(migrator.migrate_to(CREATE_USERS).await.unwrap().is_empty());
    assert!(matches!(
        migrator.migrate_to("20990101000000").await,
        Err(Error::NotFound(_))
    ));
    assert_eq!(
        migrator.current_version().await.unwrap().as_deref(),
        Some(CREATE_USERS)
    );
}

#[tokio::test]
async fn test_out_of_order_change_is_still_applied() {
    let db = TestDb::new().await;
    let migrator = db.migrator(registry(vec![create_users(), add_email()]));
    migrator.migrate_to_latest().await.unwrap();

    // A change merged late with an older id
    let migrator = db.migrator(registry(vec![create_users(), add_phone(), add_email()]));
    assert_eq!(migrator.migrate_to_latest().await.unwrap(), vec![ADD_PHONE]);

    // Rollback follows apply order, not id order
    assert_eq!(migrator.rollback(1).await.unwrap(), vec![ADD_PHONE]);
}

#[tokio::test]
async fn test_unregistered_applied_change_blocks_rollback() {
    let db = TestDb::new().await;
    db.migrator(registry(vec![create_users(), add_phone()]))
        .migrate_to_latest()
        .await
        .unwrap();

    let migrator = db.migrator(registry(vec![create_users()]));
    assert_eq!(migrator.unknown_applied().await.unwrap(), vec![ADD_PHONE]);
    assert!(matches!(migrator.rollback(1).await, Err(Error::Rollback(_))));

    // Status lists registered changes only
    assert_eq!(migrator.status().await.unwrap().count(), 1);
}

#[tokio::test]
async fn test_noop_change_is_recorded() {
    let db = TestDb::new().await;
    let placeholder = ChangeDescriptor::noop("20250806000000", "UpdateScoreToDecimal").unwrap();
    let migrator = db.migrator(registry(vec![create_users(), placeholder]));

    assert_eq!(
        migrator.migrate_to_latest().await.unwrap(),
        vec![CREATE_USERS, "20250806000000"]
    );
    assert_eq!(migrator.rollback(1).await.unwrap(), vec!["20250806000000"]);
    assert!(db.table_exists("Users").await);
}
