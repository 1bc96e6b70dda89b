use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn bundled_migrations() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("migrations")
}

fn cli(workdir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("examina-migrate").unwrap();
    cmd.current_dir(workdir.path())
        .env_remove("DATABASE_URL")
        .env_remove("EXAMINA_DATABASE_URL")
        .env_remove("EXAMINA_MIGRATIONS_DIR")
        .env_remove("EXAMINA_LOCK_TIMEOUT");
    cmd
}

fn database_url(workdir: &TempDir) -> String {
    format!(
        "sqlite://{}?mode=rwc",
        workdir.path().join("examina.db").display()
    )
}

#[test]
fn test_validate_bundled_changes() {
    let workdir = TempDir::new().unwrap();
    cli(&workdir)
        .arg("validate")
        .arg("--dir")
        .arg(bundled_migrations())
        .assert()
        .success()
        .stdout(predicate::str::contains("4 of 4 change file(s) valid"));
}

#[test]
fn test_new_creates_template_that_fails_validation() {
    let workdir = TempDir::new().unwrap();
    let dir = workdir.path().join("migrations");

    cli(&workdir)
        .args(["new", "add phone number", "--dir"])
        .arg(&dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("Created change file"));

    let files: Vec<_> = fs::read_dir(&dir).unwrap().collect();
    assert_eq!(files.len(), 1);

    cli(&workdir)
        .args(["validate", "--dir"])
        .arg(&dir)
        .assert()
        .failure()
        .stdout(predicate::str::contains("has no up operations"));
}

#[test]
fn test_up_status_down() {
    let workdir = TempDir::new().unwrap();
    let url = database_url(&workdir);

    cli(&workdir)
        .args(["up", "--database-url", &url, "--dir"])
        .arg(bundled_migrations())
        .assert()
        .success()
        .stdout(predicate::str::contains("Applied 4 change(s)"));

    cli(&workdir)
        .args(["up", "--database-url", &url, "--dir"])
        .arg(bundled_migrations())
        .assert()
        .success()
        .stdout(predicate::str::contains("Schema is up to date"));

    cli(&workdir)
        .args(["down", "--steps", "2", "--database-url", &url, "--dir"])
        .arg(bundled_migrations())
        .assert()
        .success()
        .stdout(predicate::str::contains("Rolled back 2 change(s)"));

    let output = cli(&workdir)
        .args(["status", "--format", "json", "--database-url", &url, "--dir"])
        .arg(bundled_migrations())
        .output()
        .unwrap();
    assert!(output.status.success());

    let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let applied: Vec<bool> = status["changes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["applied"].as_bool().unwrap())
        .collect();
    assert_eq!(applied, vec![true, true, false, false]);

    cli(&workdir)
        .args(["check", "--database-url", &url, "--dir"])
        .arg(bundled_migrations())
        .assert()
        .success();
}

#[test]
fn test_missing_database_url_fails() {
    let workdir = TempDir::new().unwrap();
    cli(&workdir)
        .arg("status")
        .arg("--dir")
        .arg(bundled_migrations())
        .assert()
        .failure()
        .stderr(predicate::str::contains("database_url is not set"));
}

#[test]
fn test_config_file_is_picked_up() {
    let workdir = TempDir::new().unwrap();
    fs::write(
        workdir.path().join("migrate.toml"),
        format!(
            "database_url = \"{}\"\nmigrations_dir = \"{}\"\n",
            database_url(&workdir),
            bundled_migrations().display()
        ),
    )
    .unwrap();

    cli(&workdir)
        .arg("up")
        .assert()
        .success()
        .stdout(predicate::str::contains("Applied 4 change(s)"));

    cli(&workdir)
        .arg("unlock")
        .assert()
        .success()
        .stdout(predicate::str::contains("Lock was not held"));
}

#[test]
fn test_verbose_logs_config_without_password() {
    let workdir = TempDir::new().unwrap();
    fs::write(
        workdir.path().join("migrate.toml"),
        format!(
            "database_url = \"postgres://examina:secret@db:5432/examina\"\nmigrations_dir = \"{}\"\n",
            bundled_migrations().display()
        ),
    )
    .unwrap();

    cli(&workdir)
        .env_remove("RUST_LOG")
        .args(["validate", "--verbose"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Using config file ./migrate.toml"))
        .stderr(predicate::str::contains("postgres://examina:***@db:5432/examina"))
        .stderr(predicate::str::contains("secret").not());
}
