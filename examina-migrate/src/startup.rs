//! Startup entry point for hosting applications
//!
//! A host calls [`run_startup`] before serving traffic and treats an error as
//! fatal: serving against an unknown schema state is worse than not starting.

use crate::config::MigratorConfig;
use crate::error::{with_retry, Result};
use crate::migrations::{ChangeRegistry, ChangeStatus, Migrator};

/// Connect and migrate to the latest change
///
/// Connection failures and lock contention are retried with the configured
/// exponential backoff. A failing change is returned immediately. After
/// migrating, the live schema is compared with the ledger; drift is logged
/// and never fails startup.
pub async fn run_startup(config: &MigratorConfig, registry: ChangeRegistry) -> Result<Vec<String>> {
    config.validate()?;
    let policy = config.retry.policy();

    let migrator = with_retry(policy.clone(), || {
        Migrator::connect(config, registry.clone())
    })
    .await?;

    log_pending(&migrator).await?;

    let applied = with_retry(policy, || migrator.migrate_to_latest()).await?;

    match migrator.current_version().await? {
        Some(version) => log::info!(
            "Database schema at {} ({} change(s) applied this run)",
            version,
            applied.len()
        ),
        None => log::info!("No changes registered; database schema untouched"),
    }

    match migrator.check_consistency().await {
        Ok(report) if !report.is_consistent() => log::warn!(
            "Schema differs from the ledger in {} place(s); run `check` for details",
            report.discrepancies.len()
        ),
        Ok(_) => {}
        Err(e) => log::warn!("Post-migration schema check failed: {}", e),
    }

    Ok(applied)
}

async fn log_pending(migrator: &Migrator) -> Result<()> {
    let status: Vec<ChangeStatus> = migrator.status().await?.collect();
    let pending: Vec<&ChangeStatus> = status.iter().filter(|s| !s.applied).collect();

    log::info!(
        "{} change(s) registered: {} applied, {} pending",
        status.len(),
        status.len() - pending.len(),
        pending.len()
    );
    for change in &pending {
        log::info!("  pending {} {}", change.change_id, change.name);
    }
    Ok(())
}
