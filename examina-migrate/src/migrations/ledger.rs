//! Ledger of applied and rolled-back changes
//!
//! The ledger is an append-only table in the migrated database:
//!
//! | column       | meaning                                   |
//! |--------------|-------------------------------------------|
//! | `seq`        | monotonic position, defines apply order   |
//! | `change_id`  | id of the change                          |
//! | `applied_at` | RFC 3339 time the entry was recorded      |
//! | `status`     | `applied` or `rolled_back`                |
//!
//! A change is currently applied when its latest entry says `applied`. Every
//! write takes the caller's connection so it commits together with the schema
//! change it records.

use crate::database::DatabaseBackend;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::{AnyConnection, Row};
use std::collections::HashMap;
use std::fmt;

/// Status recorded for a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerStatus {
    Applied,
    RolledBack,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Applied => "applied",
            LedgerStatus::RolledBack => "rolled_back",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "applied" => Ok(LedgerStatus::Applied),
            "rolled_back" => Ok(LedgerStatus::RolledBack),
            other => Err(Error::conflict(format!(
                "Unknown ledger status '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the ledger
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub seq: i64,
    pub change_id: String,
    pub applied_at: DateTime<Utc>,
    pub status: LedgerStatus,
}

/// Reads and appends ledger entries
#[derive(Debug, Clone)]
pub struct LedgerStore {
    backend: DatabaseBackend,
    table: String,
}

impl LedgerStore {
    pub fn new(backend: DatabaseBackend, table: impl Into<String>) -> Self {
        Self {
            backend,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the ledger table if it does not exist yet
    pub async fn ensure_table(&self, conn: &mut AnyConnection) -> Result<()> {
        let dialect = self.backend.dialect();
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             seq BIGINT NOT NULL PRIMARY KEY, \
             change_id VARCHAR(64) NOT NULL, \
             applied_at VARCHAR(40) NOT NULL, \
             status VARCHAR(16) NOT NULL)",
            dialect.quote_identifier(&self.table)
        );
        sqlx::query(&sql).execute(&mut *conn).await?;
        Ok(())
    }

    async fn table_exists(&self, conn: &mut AnyConnection) -> Result<bool> {
        let sql = self.backend.dialect().table_exists_sql();
        let count: i64 = sqlx::query(&sql)
            .bind(self.table.as_str())
            .fetch_one(&mut *conn)
            .await?
            .try_get(0)?;
        Ok(count > 0)
    }

    /// Full history in `seq` order; empty before the first run
    pub async fn entries(&self, conn: &mut AnyConnection) -> Result<Vec<LedgerEntry>> {
        if !self.table_exists(conn).await? {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT seq, change_id, applied_at, status FROM {} ORDER BY seq",
            self.backend.dialect().quote_identifier(&self.table)
        );
        let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;

        rows.iter()
            .map(|row| -> Result<LedgerEntry> {
                let applied_at: String = row.try_get("applied_at")?;
                let status: String = row.try_get("status")?;
                Ok(LedgerEntry {
                    seq: row.try_get("seq")?,
                    change_id: row.try_get("change_id")?,
                    applied_at: DateTime::parse_from_rfc3339(&applied_at)
                        .map_err(|e| {
                            Error::conflict(format!(
                                "Ledger entry has invalid timestamp '{}': {}",
                                applied_at, e
                            ))
                        })?
                        .with_timezone(&Utc),
                    status: LedgerStatus::parse(&status)?,
                })
            })
            .collect()
    }

    /// Ids of currently applied changes, in apply order
    pub async fn list_applied(&self, conn: &mut AnyConnection) -> Result<Vec<String>> {
        let entries = self.entries(conn).await?;
        Ok(applied_in_order(&entries))
    }

    /// Record that `change_id` was applied
    ///
    /// Fails with a conflict if it is already applied.
    pub async fn record_applied(
        &self,
        conn: &mut AnyConnection,
        change_id: &str,
        applied_at: DateTime<Utc>,
    ) -> Result<()> {
        let entries = self.entries(conn).await?;
        if current_status(&entries, change_id) == Some(LedgerStatus::Applied) {
            return Err(Error::conflict(format!(
                "Change {} is already recorded as applied",
                change_id
            )));
        }
        self.append(conn, &entries, change_id, applied_at, LedgerStatus::Applied)
            .await
    }

    /// Record that `change_id` was rolled back
    ///
    /// Fails with not-found if it is not currently applied.
    pub async fn record_rolled_back(&self, conn: &mut AnyConnection, change_id: &str) -> Result<()> {
        let entries = self.entries(conn).await?;
        if current_status(&entries, change_id) != Some(LedgerStatus::Applied) {
            return Err(Error::not_found(format!(
                "Change {} is not currently applied",
                change_id
            )));
        }
        self.append(conn, &entries, change_id, Utc::now(), LedgerStatus::RolledBack)
            .await
    }

    async fn append(
        &self,
        conn: &mut AnyConnection,
        entries: &[LedgerEntry],
        change_id: &str,
        at: DateTime<Utc>,
        status: LedgerStatus,
    ) -> Result<()> {
        let dialect = self.backend.dialect();
        let seq = entries.last().map(|e| e.seq).unwrap_or(0) + 1;
        let sql = format!(
            "INSERT INTO {} (seq, change_id, applied_at, status) VALUES ({}, {}, {}, {})",
            dialect.quote_identifier(&self.table),
            dialect.placeholder(1),
            dialect.placeholder(2),
            dialect.placeholder(3),
            dialect.placeholder(4)
        );

        sqlx::query(&sql)
            .bind(seq)
            .bind(change_id)
            .bind(at.to_rfc3339())
            .bind(status.as_str())
            .execute(&mut *conn)
            .await?;

        log::debug!("Ledger #{}: {} {}", seq, change_id, status);
        Ok(())
    }
}

/// Latest status of a change in the history
pub fn current_status(entries: &[LedgerEntry], change_id: &str) -> Option<LedgerStatus> {
    entries
        .iter()
        .rev()
        .find(|e| e.change_id == change_id)
        .map(|e| e.status)
}

/// Currently applied change ids ordered by the entry that applied them
pub fn applied_in_order(entries: &[LedgerEntry]) -> Vec<String> {
    let mut latest: HashMap<&str, &LedgerEntry> = HashMap::new();
    for entry in entries {
        latest.insert(entry.change_id.as_str(), entry);
    }

    let mut applied: Vec<&LedgerEntry> = latest
        .into_values()
        .filter(|e| e.status == LedgerStatus::Applied)
        .collect();
    applied.sort_by_key(|e| e.seq);
    applied.into_iter().map(|e| e.change_id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(seq: i64, change_id: &str, status: LedgerStatus) -> LedgerEntry {
        LedgerEntry {
            seq,
            change_id: change_id.to_string(),
            applied_at: Utc::now(),
            status,
        }
    }

    #[test]
    fn reapplied_change_moves_to_the_end() {
        let entries = vec![
            entry(1, "20250801100313", LedgerStatus::Applied),
            entry(2, "20250803120747", LedgerStatus::Applied),
            entry(3, "20250801100313", LedgerStatus::RolledBack),
            entry(4, "20250801100313", LedgerStatus::Applied),
        ];
        assert_eq!(
            applied_in_order(&entries),
            vec!["20250803120747", "20250801100313"]
        );
    }

    #[test]
    fn rolled_back_changes_are_not_applied() {
        let entries = vec![
            entry(1, "20250801100313", LedgerStatus::Applied),
            entry(2, "20250801100313", LedgerStatus::RolledBack),
        ];
        assert!(applied_in_order(&entries).is_empty());
        assert_eq!(
            current_status(&entries, "20250801100313"),
            Some(LedgerStatus::RolledBack)
        );
        assert_eq!(current_status(&entries, "20250803120747"), None);
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [LedgerStatus::Applied, LedgerStatus::RolledBack] {
            assert_eq!(LedgerStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(LedgerStatus::parse("pending").is_err());
    }
}
