//! Commands that talk to the database

use super::{load_registry, GlobalOptions};
use crate::OutputFormat;
use anyhow::Result;
use examina_migrate::Migrator;

async fn connect(options: &GlobalOptions) -> Result<Migrator> {
    let config = options.load_config()?;
    let registry = load_registry(&config)?;
    Ok(Migrator::connect(&config, registry).await?)
}

/// Apply pending changes, or move to an explicit change id
pub async fn up(options: &GlobalOptions, to: Option<String>) -> Result<()> {
    let migrator = connect(options).await?;

    match to {
        Some(target) => {
            let outcome = migrator.migrate_to(&target).await?;
            if outcome.is_empty() {
                println!("✅ Already at {}", target);
                return Ok(());
            }
            for id in &outcome.rolled_back {
                println!("↩️  Rolled back {}", id);
            }
            for id in &outcome.applied {
                println!("✅ Applied {}", id);
            }
            println!("🎯 Schema is at {}", target);
        }
        None => {
            let applied = migrator.migrate_to_latest().await?;
            if applied.is_empty() {
                println!("✅ Schema is up to date");
                return Ok(());
            }
            for id in &applied {
                println!("✅ Applied {}", id);
            }
            println!("🎉 Applied {} change(s)", applied.len());
        }
    }
    Ok(())
}

/// Roll back the most recent `steps` changes
pub async fn down(options: &GlobalOptions, steps: usize) -> Result<()> {
    let migrator = connect(options).await?;
    let rolled_back = migrator.rollback(steps).await?;
    for id in &rolled_back {
        println!("↩️  Rolled back {}", id);
    }
    println!("🎉 Rolled back {} change(s)", rolled_back.len());
    Ok(())
}

/// Print every registered change with its applied flag
pub async fn status(options: &GlobalOptions, format: OutputFormat) -> Result<()> {
    let migrator = connect(options).await?;
    let unknown = migrator.unknown_applied().await?;
    let status: Vec<_> = migrator.status().await?.collect();

    match format {
        OutputFormat::Json => {
            let changes: Vec<serde_json::Value> = status
                .iter()
                .map(|s| {
                    serde_json::json!({
                        "id": s.change_id,
                        "name": s.name,
                        "applied": s.applied,
                    })
                })
                .collect();
            let output = serde_json::json!({
                "changes": changes,
                "unknown_applied": unknown,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            println!("📋 Changes ({})", status.len());
            println!("=====================");
            for s in &status {
                let marker = if s.applied { "✅" } else { "⏳" };
                println!("{} {}  {}", marker, s.change_id, s.name);
            }
            let pending = status.iter().filter(|s| !s.applied).count();
            println!("\n{} applied, {} pending", status.len() - pending, pending);

            if !unknown.is_empty() {
                println!("\n⚠️  Applied but not registered ({}):", unknown.len());
                for id in &unknown {
                    println!("   {}", id);
                }
            }
        }
    }
    Ok(())
}

/// Report schema drift; exits non-zero when any is found
pub async fn check(options: &GlobalOptions) -> Result<()> {
    let migrator = connect(options).await?;
    let report = migrator.check_consistency().await?;

    if report.is_consistent() {
        println!(
            "✅ Schema matches the ledger ({} tables checked)",
            report.checked_tables
        );
        return Ok(());
    }

    println!("⚠️  Schema drift ({}):", report.discrepancies.len());
    for discrepancy in &report.discrepancies {
        println!("   {}", discrepancy);
    }
    println!("\nNothing was changed. Fix the schema by hand or with a new change.");
    anyhow::bail!("schema does not match the ledger")
}

/// Remove a stale migration lock
pub async fn unlock(options: &GlobalOptions) -> Result<()> {
    let migrator = connect(options).await?;
    match migrator.force_unlock().await? {
        Some(holder) => println!(
            "🔓 Released lock held by {} since {}",
            holder.holder, holder.acquired_at
        ),
        None => println!("✅ Lock was not held"),
    }
    Ok(())
}
