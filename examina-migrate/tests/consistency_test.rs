mod common;

use common::*;
use examina_migrate::Discrepancy;

#[tokio::test]
async fn test_matching_schema_is_consistent() {
    let db = TestDb::new().await;
    let migrator = db.migrator(registry(vec![create_users(), add_phone(), add_email()]));

    // Nothing applied yet: nothing expected
    let report = migrator.check_consistency().await.unwrap();
    assert!(report.is_consistent());
    assert_eq!(report.checked_tables, 0);

    migrator.migrate_to_latest().await.unwrap();
    let report = migrator.check_consistency().await.unwrap();
    assert!(report.is_consistent(), "{:?}", report.discrepancies);
    assert_eq!(report.checked_tables, 1);

    migrator.rollback(2).await.unwrap();
    assert!(migrator.check_consistency().await.unwrap().is_consistent());
}

#[tokio::test]
async fn test_drift_is_reported_not_repaired() {
    let db = TestDb::new().await;
    let migrator = db.migrator(registry(vec![create_users(), add_phone(), add_email()]));
    migrator.migrate_to_latest().await.unwrap();

    db.execute("DROP INDEX IX_Users_PhoneNumber").await;
    db.execute("ALTER TABLE Users DROP COLUMN Email").await;

    let report = migrator.check_consistency().await.unwrap();
    assert_eq!(
        report.discrepancies,
        vec![
            Discrepancy::MissingColumn {
                table: "Users".to_string(),
                column: "Email".to_string(),
            },
            Discrepancy::MissingIndex {
                table: "Users".to_string(),
                index: "IX_Users_PhoneNumber".to_string(),
            },
        ]
    );

    // Advisory only: the schema is left as it was
    assert!(!db.columns("Users").await.contains(&"Email".to_string()));
    assert!(db.indexes("Users").await.is_empty());
}

#[tokio::test]
async fn test_column_names_compare_case_insensitively() {
    let db = TestDb::new().await;
    let migrator = db.migrator(registry(vec![create_users()]));
    migrator.migrate_to_latest().await.unwrap();

    // A later manual fix re-creates the table with different casing
    db.execute("DROP TABLE Users").await;
    db.execute("CREATE TABLE Users (id INTEGER PRIMARY KEY, USERNAME varchar(50) NOT NULL)")
        .await;

    assert!(migrator.check_consistency().await.unwrap().is_consistent());
}

#[tokio::test]
async fn test_unregistered_and_dropped_tables_are_reported() {
    let db = TestDb::new().await;
    db.migrator(registry(vec![create_users(), add_phone()]))
        .migrate_to_latest()
        .await
        .unwrap();

    db.execute("DROP TABLE Users").await;

    let migrator = db.migrator(registry(vec![create_users()]));
    let report = migrator.check_consistency().await.unwrap();
    assert_eq!(
        report.discrepancies,
        vec![
            Discrepancy::UnregisteredChange {
                change_id: ADD_PHONE.to_string(),
            },
            Discrepancy::MissingTable {
                table: "Users".to_string(),
            },
        ]
    );
}
