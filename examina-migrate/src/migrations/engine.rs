//! Migration engine
//!
//! Applies registered changes in ascending id order and reverts them in
//! reverse apply order. Every change runs in its own transaction together
//! with its ledger write, and a whole run holds the exclusive lock.

use super::consistency::{ConsistencyReport, Discrepancy, ExpectedShape};
use super::descriptor::{ChangeDescriptor, ChangeRegistry};
use super::executor::SchemaExecutor;
use super::ledger::{LedgerEntry, LedgerStore};
use super::lock::{LockGuard, LockHolder, MigrationLock};
use crate::config::MigratorConfig;
use crate::database::{self, DatabaseBackend};
use crate::error::{Error, Result};
use chrono::Utc;
use sqlx::AnyPool;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Engine settings that are not part of the connection
#[derive(Debug, Clone)]
pub struct MigratorOptions {
    pub ledger_table: String,
    pub lock_table: String,
    pub lock_timeout: Duration,
    pub lock_poll_interval: Duration,
}

impl Default for MigratorOptions {
    fn default() -> Self {
        Self::from(&MigratorConfig::default())
    }
}

impl From<&MigratorConfig> for MigratorOptions {
    fn from(config: &MigratorConfig) -> Self {
        Self {
            ledger_table: config.ledger_table.clone(),
            lock_table: config.lock_table.clone(),
            lock_timeout: config.lock_timeout(),
            lock_poll_interval: config.lock_poll_interval(),
        }
    }
}

/// One line of `status()`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeStatus {
    pub change_id: String,
    pub name: String,
    pub applied: bool,
}

/// Changes touched by `migrate_to`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationOutcome {
    pub rolled_back: Vec<String>,
    pub applied: Vec<String>,
}

impl MigrationOutcome {
    pub fn is_empty(&self) -> bool {
        self.rolled_back.is_empty() && self.applied.is_empty()
    }
}

/// Forward/backward migration runner
pub struct Migrator {
    pool: AnyPool,
    backend: DatabaseBackend,
    registry: ChangeRegistry,
    ledger: LedgerStore,
    lock: MigrationLock,
    executor: SchemaExecutor,
    holder_id: String,
}

impl Migrator {
    pub fn new(
        pool: AnyPool,
        backend: DatabaseBackend,
        registry: ChangeRegistry,
        options: MigratorOptions,
    ) -> Self {
        Self {
            pool,
            backend,
            registry,
            ledger: LedgerStore::new(backend, options.ledger_table),
            lock: MigrationLock::new(
                backend,
                options.lock_table,
                options.lock_timeout,
                options.lock_poll_interval,
            ),
            executor: SchemaExecutor::new(backend),
            holder_id: format!("pid-{}-{}", std::process::id(), Uuid::new_v4()),
        }
    }

    /// Validate `config`, open a pool and build the engine
    pub async fn connect(config: &MigratorConfig, registry: ChangeRegistry) -> Result<Self> {
        config.validate()?;
        let backend = DatabaseBackend::from_url(&config.database_url)?;
        let pool = database::connect(config).await?;
        Ok(Self::new(pool, backend, registry, MigratorOptions::from(config)))
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn backend(&self) -> DatabaseBackend {
        self.backend
    }

    pub fn registry(&self) -> &ChangeRegistry {
        &self.registry
    }

    /// Identity written into the lock table while this engine runs
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Apply every pending change in ascending id order
    ///
    /// Returns the applied ids; empty when nothing is pending. On failure the
    /// error names the failing change and everything before it stays applied.
    pub async fn migrate_to_latest(&self) -> Result<Vec<String>> {
        let guard = self.acquire_lock().await?;
        let result = self.migrate_to_latest_locked().await;
        self.release_lock(guard).await;
        result
    }

    async fn migrate_to_latest_locked(&self) -> Result<Vec<String>> {
        self.prepare().await?;
        self.apply_pending(None).await
    }

    /// Move the schema to exactly `target`
    ///
    /// Applied changes with a higher id are rolled back first (newest first),
    /// then pending changes up to and including `target` are applied.
    pub async fn migrate_to(&self, target: &str) -> Result<MigrationOutcome> {
        if !self.registry.contains(target) {
            return Err(Error::not_found(format!(
                "Change {} is not registered",
                target
            )));
        }

        let guard = self.acquire_lock().await?;
        let result = self.migrate_to_locked(target).await;
        self.release_lock(guard).await;
        result
    }

    async fn migrate_to_locked(&self, target: &str) -> Result<MigrationOutcome> {
        self.prepare().await?;
        let applied = self.applied_ids().await?;
        let newer: Vec<String> = applied
            .into_iter()
            .rev()
            .filter(|id| id.as_str() > target)
            .collect();

        let rolled_back = self.revert(newer).await?;
        let applied = self.apply_pending(Some(target)).await?;
        Ok(MigrationOutcome {
            rolled_back,
            applied,
        })
    }

    /// Revert the `steps` most recently applied changes, newest first
    pub async fn rollback(&self, steps: usize) -> Result<Vec<String>> {
        if steps == 0 {
            return Err(Error::validation("Rollback steps must be at least 1"));
        }

        let guard = self.acquire_lock().await?;
        let result = self.rollback_locked(steps).await;
        self.release_lock(guard).await;
        result
    }

    async fn rollback_locked(&self, steps: usize) -> Result<Vec<String>> {
        self.prepare().await?;
        let applied = self.applied_ids().await?;
        if applied.len() < steps {
            return Err(Error::rollback(format!(
                "Cannot roll back {} changes: only {} applied",
                steps,
                applied.len()
            )));
        }

        let targets: Vec<String> = applied.into_iter().rev().take(steps).collect();
        self.revert(targets).await
    }

    /// Registered changes with their applied flag, in id order
    ///
    /// Reads the ledger once; the returned iterator does no further I/O.
    pub async fn status(&self) -> Result<impl Iterator<Item = ChangeStatus> + '_> {
        let applied: HashSet<String> = self.applied_ids().await?.into_iter().collect();
        Ok(self.registry.iter().map(move |change| ChangeStatus {
            change_id: change.id().to_string(),
            name: change.name().to_string(),
            applied: applied.contains(change.id()),
        }))
    }

    /// Applied ids the registry does not know about
    pub async fn unknown_applied(&self) -> Result<Vec<String>> {
        Ok(self
            .applied_ids()
            .await?
            .into_iter()
            .filter(|id| !self.registry.contains(id))
            .collect())
    }

    /// Latest applied change id, by apply order
    pub async fn current_version(&self) -> Result<Option<String>> {
        Ok(self.applied_ids().await?.pop())
    }

    /// Full ledger history
    pub async fn ledger_entries(&self) -> Result<Vec<LedgerEntry>> {
        let mut conn = self.pool.acquire().await?;
        self.ledger.entries(&mut conn).await
    }

    /// Compare the live schema with the shape implied by the ledger
    ///
    /// Advisory only: findings are logged as warnings and returned.
    pub async fn check_consistency(&self) -> Result<ConsistencyReport> {
        let applied = self.applied_ids().await?;

        let mut unregistered = Vec::new();
        let mut changes = Vec::new();
        for id in &applied {
            match self.registry.get(id) {
                Some(change) => changes.push(change),
                None => unregistered.push(Discrepancy::UnregisteredChange {
                    change_id: id.clone(),
                }),
            }
        }

        let shape = ExpectedShape::from_changes(changes);
        let mut conn = self.pool.acquire().await?;
        let mut report = shape.verify(&mut conn, &self.executor).await?;
        unregistered.append(&mut report.discrepancies);
        report.discrepancies = unregistered;

        report.log();
        Ok(report)
    }

    /// Remove a lock left behind by a crashed runner
    pub async fn force_unlock(&self) -> Result<Option<LockHolder>> {
        let released = self.lock.force_release(&self.pool).await?;
        match &released {
            Some(holder) => log::warn!(
                "Force-released migration lock held by {} since {}",
                holder.holder,
                holder.acquired_at
            ),
            None => log::info!("Migration lock was not held"),
        }
        Ok(released)
    }

    async fn acquire_lock(&self) -> Result<LockGuard> {
        self.lock.acquire(&self.pool, &self.holder_id).await
    }

    async fn release_lock(&self, guard: LockGuard) {
        if let Err(e) = guard.release().await {
            log::warn!("Failed to release migration lock: {}", e);
        }
    }

    /// Per-run setup: ledger table and dialect warnings
    async fn prepare(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        self.ledger.ensure_table(&mut conn).await?;

        if !self.backend.dialect().supports_transactional_ddl() {
            log::warn!(
                "{} commits DDL implicitly; a failed change can leave the schema ahead of the ledger. Run `check` after a failure.",
                self.backend.name()
            );
        }
        Ok(())
    }

    async fn applied_ids(&self) -> Result<Vec<String>> {
        let mut conn = self.pool.acquire().await?;
        self.ledger.list_applied(&mut conn).await
    }

    async fn apply_pending(&self, upto: Option<&str>) -> Result<Vec<String>> {
        let applied_ids = self.applied_ids().await?;
        let latest_applied = applied_ids.iter().max().cloned();
        let applied: HashSet<String> = applied_ids.into_iter().collect();

        let pending: Vec<&ChangeDescriptor> = self
            .registry
            .iter()
            .filter(|change| !applied.contains(change.id()))
            .filter(|change| upto.map_or(true, |target| change.id() <= target))
            .collect();

        if pending.is_empty() {
            log::info!("No pending changes");
            return Ok(Vec::new());
        }
        log::info!("Applying {} pending change(s)", pending.len());

        let mut done = Vec::with_capacity(pending.len());
        for change in pending {
            if let Some(latest) = latest_applied.as_deref() {
                if change.id() < latest {
                    log::warn!(
                        "Change {} is older than the latest applied change {}; applying out of order",
                        change.id(),
                        latest
                    );
                }
            }

            self.apply_change(change)
                .await
                .map_err(|e| Error::migration(change.id(), e))?;
            done.push(change.id().to_string());
        }
        Ok(done)
    }

    async fn apply_change(&self, change: &ChangeDescriptor) -> Result<()> {
        let started = Instant::now();
        let mut tx = self.pool.begin().await?;

        let mut skipped = 0;
        for op in change.up() {
            if self.executor.execute(&mut tx, op).await?.is_skipped() {
                skipped += 1;
            }
        }
        self.ledger
            .record_applied(&mut tx, change.id(), Utc::now())
            .await?;
        tx.commit().await?;

        if change.is_noop() {
            log::info!("Recorded {} {} (no-op)", change.id(), change.name());
        } else {
            log::info!(
                "Applied {} {} ({} operations, {} skipped) in {:?}",
                change.id(),
                change.name(),
                change.up().len(),
                skipped,
                started.elapsed()
            );
        }
        Ok(())
    }

    /// Revert `ids` in the given order; all must be registered
    async fn revert(&self, ids: Vec<String>) -> Result<Vec<String>> {
        let changes = ids
            .iter()
            .map(|id| {
                self.registry.get(id).ok_or_else(|| {
                    Error::rollback(format!(
                        "Change {} is applied but not registered; cannot roll it back",
                        id
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut done = Vec::with_capacity(changes.len());
        for change in changes {
            self.revert_change(change)
                .await
                .map_err(|e| Error::migration(change.id(), e))?;
            done.push(change.id().to_string());
        }
        Ok(done)
    }

    async fn revert_change(&self, change: &ChangeDescriptor) -> Result<()> {
        let started = Instant::now();
        let mut tx = self.pool.begin().await?;

        for op in change.down() {
            self.executor.execute(&mut tx, op).await?;
        }
        self.ledger.record_rolled_back(&mut tx, change.id()).await?;
        tx.commit().await?;

        for note in change.data_loss_notes() {
            log::debug!("{}: {}", change.id(), note);
        }
        log::info!(
            "Rolled back {} {} in {:?}",
            change.id(),
            change.name(),
            started.elapsed()
        );
        Ok(())
    }
}
