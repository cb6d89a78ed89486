//! Error types for the log sink.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by repositories and the flush engine.
#[derive(Debug, Error)]
pub enum SinkError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Filesystem error (e.g. creating the database directory).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A write did not finish within its timeout.
    #[error("write timed out after {elapsed:?}")]
    Timeout {
        /// Time spent before giving up.
        elapsed: Duration,
    },

    /// The call was interrupted during shutdown.
    #[error("operation cancelled")]
    Cancelled,

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Describes which migration failed and why.
        message: String,
    },

    /// A repository call panicked on the flush worker.
    #[error("repository panicked: {0}")]
    WorkerPanicked(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SinkError {
    /// Whether this is a transient contention error worth retrying inside a
    /// single write call (`SQLITE_BUSY` / `SQLITE_LOCKED`).
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if matches!(
                    e.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                )
        )
    }

    /// Whether this error came from an interrupted call.
    pub fn is_interrupt(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => {
                e.code == rusqlite::ErrorCode::OperationInterrupted
            }
            _ => false,
        }
    }
}

/// Convenience type alias for sink results.
pub type Result<T> = std::result::Result<T, SinkError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
