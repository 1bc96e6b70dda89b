//! Exclusive migration lock
//!
//! A single-row table (`id = 1`) marks the holder of the lock. Inserting the
//! row takes the lock; the primary key makes a second insert fail, which is
//! how contention is detected across processes and hosts. Waiting is bounded:
//! after the timeout the caller gets [`Error::LockContention`].

use crate::database::DatabaseBackend;
use crate::error::{Error, Result};
use chrono::Utc;
use sqlx::{AnyPool, Row};
use std::time::{Duration, Instant};

/// Lock settings and queries
#[derive(Debug, Clone)]
pub struct MigrationLock {
    backend: DatabaseBackend,
    table: String,
    timeout: Duration,
    poll_interval: Duration,
}

/// Current holder of the lock as stored in the lock table
#[derive(Debug, Clone, PartialEq)]
pub struct LockHolder {
    pub holder: String,
    pub acquired_at: String,
}

impl MigrationLock {
    pub fn new(
        backend: DatabaseBackend,
        table: impl Into<String>,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            backend,
            table: table.into(),
            timeout,
            poll_interval,
        }
    }

    async fn ensure_table(&self, pool: &AnyPool) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             id INTEGER NOT NULL PRIMARY KEY, \
             holder VARCHAR(128) NOT NULL, \
             acquired_at VARCHAR(40) NOT NULL)",
            self.backend.dialect().quote_identifier(&self.table)
        );
        sqlx::query(&sql).execute(pool).await?;
        Ok(())
    }

    async fn try_insert(&self, pool: &AnyPool, holder: &str) -> std::result::Result<(), sqlx::Error> {
        let dialect = self.backend.dialect();
        let sql = format!(
            "INSERT INTO {} (id, holder, acquired_at) VALUES (1, {}, {})",
            dialect.quote_identifier(&self.table),
            dialect.placeholder(1),
            dialect.placeholder(2)
        );
        sqlx::query(&sql)
            .bind(holder)
            .bind(Utc::now().to_rfc3339())
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Take the lock for `holder`, waiting up to the configured timeout
    pub async fn acquire(&self, pool: &AnyPool, holder: &str) -> Result<LockGuard> {
        self.ensure_table(pool).await?;
        let started = Instant::now();

        loop {
            let insert_error = match self.try_insert(pool, holder).await {
                Ok(()) => {
                    log::debug!("Migration lock acquired by {}", holder);
                    return Ok(LockGuard {
                        pool: pool.clone(),
                        lock: self.clone(),
                        holder: holder.to_string(),
                        released: false,
                    });
                }
                Err(e) => e,
            };

            let waited = started.elapsed();
            match self.current_holder(pool).await? {
                Some(current) => {
                    if waited >= self.timeout {
                        return Err(Error::lock_contention(current.holder, waited));
                    }
                    log::debug!(
                        "Migration lock held by {} since {}, waiting",
                        current.holder,
                        current.acquired_at
                    );
                }
                // The insert failed for a reason other than an existing row,
                // unless the holder released in between
                None if waited >= self.timeout => return Err(insert_error.into()),
                None => {}
            }

            let remaining = self.timeout.saturating_sub(waited);
            tokio::time::sleep(self.poll_interval.min(remaining)).await;
        }
    }

    /// Who holds the lock right now, if anyone
    pub async fn current_holder(&self, pool: &AnyPool) -> Result<Option<LockHolder>> {
        let sql = format!(
            "SELECT holder, acquired_at FROM {} WHERE id = 1",
            self.backend.dialect().quote_identifier(&self.table)
        );
        let row = match sqlx::query(&sql).fetch_optional(pool).await {
            Ok(row) => row,
            // No lock table yet means nobody ever held the lock
            Err(_) if !self.table_exists(pool).await? => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        row.map(|row| -> Result<LockHolder> {
            Ok(LockHolder {
                holder: row.try_get("holder")?,
                acquired_at: row.try_get("acquired_at")?,
            })
        })
        .transpose()
    }

    async fn table_exists(&self, pool: &AnyPool) -> Result<bool> {
        let sql = self.backend.dialect().table_exists_sql();
        let count: i64 = sqlx::query(&sql)
            .bind(self.table.as_str())
            .fetch_one(pool)
            .await?
            .try_get(0)?;
        Ok(count > 0)
    }

    async fn release_holder(&self, pool: &AnyPool, holder: &str) -> Result<bool> {
        let dialect = self.backend.dialect();
        let sql = format!(
            "DELETE FROM {} WHERE id = 1 AND holder = {}",
            dialect.quote_identifier(&self.table),
            dialect.placeholder(1)
        );
        let result = sqlx::query(&sql).bind(holder).execute(pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove the lock regardless of holder
    ///
    /// Operator recovery for a lock left behind by a crashed runner.
    pub async fn force_release(&self, pool: &AnyPool) -> Result<Option<LockHolder>> {
        let current = self.current_holder(pool).await?;
        if current.is_some() {
            let sql = format!(
                "DELETE FROM {} WHERE id = 1",
                self.backend.dialect().quote_identifier(&self.table)
            );
            sqlx::query(&sql).execute(pool).await?;
        }
        Ok(current)
    }
}

/// Held lock; release explicitly with [`LockGuard::release`]
///
/// Dropping an unreleased guard schedules the release on the current Tokio
/// runtime, so a cancelled run does not leave the lock behind.
pub struct LockGuard {
    pool: AnyPool,
    lock: MigrationLock,
    holder: String,
    released: bool,
}

impl LockGuard {
    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        if !self.lock.release_holder(&self.pool, &self.holder).await? {
            log::warn!(
                "Migration lock for {} was already gone at release",
                self.holder
            );
        } else {
            log::debug!("Migration lock released by {}", self.holder);
        }
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let pool = self.pool.clone();
        let lock = self.lock.clone();
        let holder = std::mem::take(&mut self.holder);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = lock.release_holder(&pool, &holder).await {
                        log::warn!("Failed to release migration lock for {}: {}", holder, e);
                    }
                });
            }
            Err(_) => log::warn!(
                "Migration lock for {} dropped outside a runtime; run `unlock` to clear it",
                holder
            ),
        }
    }
}
