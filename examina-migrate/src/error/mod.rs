use std::time::Duration;
use thiserror::Error;

pub mod retry;

pub type Result<T> = std::result::Result<T, Error>;

// Re-export retry logic
pub use retry::{with_retry, RetryPolicy, RetryableError};

/// Main error type for the migration engine
#[derive(Error, Debug)]
pub enum Error {
    /// A change descriptor was rejected at registration time
    #[error("Validation error: {0}")]
    Validation(String),

    /// A single schema operation failed against the live database
    #[error("Failed to execute {operation}: {source}")]
    Execution {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The ledger already records the change as applied
    #[error("Ledger conflict: {0}")]
    Conflict(String),

    /// The ledger (or registry) has no record of the requested change
    #[error("Not found: {0}")]
    NotFound(String),

    /// Another runner holds the migration lock
    #[error("Migration lock is held by {holder} (gave up after {waited:?})")]
    LockContention { holder: String, waited: Duration },

    /// A change failed while being applied or rolled back
    #[error("Migration {change_id} failed: {source}")]
    Migration {
        change_id: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Rollback error: {0}")]
    Rollback(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn execution(
        operation: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Execution {
            operation: operation.into(),
            source: source.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn lock_contention(holder: impl Into<String>, waited: Duration) -> Self {
        Self::LockContention {
            holder: holder.into(),
            waited,
        }
    }

    /// Attach the id of the change that was being processed
    pub fn migration(change_id: impl Into<String>, source: Error) -> Self {
        Self::Migration {
            change_id: change_id.into(),
            source: Box::new(source),
        }
    }

    pub fn rollback(msg: impl Into<String>) -> Self {
        Self::Rollback(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Id of the change that failed, if this error came out of a run
    pub fn change_id(&self) -> Option<&str> {
        match self {
            Error::Migration { change_id, .. } => Some(change_id),
            _ => None,
        }
    }

    /// Check if error is retryable
    ///
    /// Only lock contention and connection-level failures qualify. Schema
    /// operations are never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::LockContention { .. } => true,
            Error::Database(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }

    /// Stable error code for logs and exit reporting
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "E_VALIDATION",
            Error::Execution { .. } => "E_EXECUTION",
            Error::Conflict(_) => "E_LEDGER_CONFLICT",
            Error::NotFound(_) => "E_NOT_FOUND",
            Error::LockContention { .. } => "E_LOCK_CONTENTION",
            Error::Migration { source, .. } => source.error_code(),
            Error::Rollback(_) => "E_ROLLBACK",
            Error::Config(_) => "E_CONFIG",
            Error::Database(_) => "E_DATABASE",
            Error::Io(_) => "E_IO",
        }
    }
}
