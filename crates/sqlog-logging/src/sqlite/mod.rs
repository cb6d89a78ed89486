//! `SQLite` implementation of [`LogRepository`].
//!
//! The connection string is a database file path (parent directories are
//! created as needed), a `file:` URI, or `:memory:`. Each call to
//! [`LogRepository::write`] inserts one `log_batches` row and its
//! `log_entries` rows inside a single transaction.

pub mod migrations;
pub mod reader;
pub(crate) mod row;

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OpenFlags, params};
use sqlog_core::{SequencedEntry, truncate_chars};
use tracing::{debug, info, warn};

use crate::errors::{Result, SinkError};
use crate::repository::{Interrupter, LogRepository};

pub use reader::{LogQuery, LogReader, StoredEntry};
pub use row::{
    MAX_CATEGORY_CHARS, MAX_LOG_NAME_CHARS, MAX_MACHINE_NAME_CHARS, MAX_MESSAGE_CHARS,
    MAX_TRACE_ID_CHARS,
};

/// Connection string for a private in-memory database.
pub const IN_MEMORY: &str = ":memory:";

/// How many times a write retries `SQLITE_BUSY` / `SQLITE_LOCKED` before
/// giving up, as long as its deadline has not passed.
const MAX_WRITE_ATTEMPTS: u32 = 5;

/// Pause between contention retries.
const CONTENTION_PAUSE: Duration = Duration::from_millis(50);

/// Open a connection for `connection_string` with the sink's pragmas applied
/// and the schema migrated.
pub fn open_connection(connection_string: &str) -> Result<Connection> {
    let conn = if connection_string == IN_MEMORY {
        Connection::open_in_memory()?
    } else if connection_string.starts_with("file:") {
        Connection::open(connection_string)?
    } else {
        if let Some(parent) = Path::new(connection_string)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            std::fs::create_dir_all(parent)?;
        }
        Connection::open(connection_string)?
    };

    // journal_mode returns a row, so it cannot go through execute_batch.
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA synchronous = NORMAL;")?;
    let _ = migrations::run_migrations(&conn)?;
    Ok(conn)
}

/// Open an existing log database for reading only.
///
/// Nothing is created or migrated: a plain path that does not exist is an
/// error. `file:` URIs are passed through to `SQLite` as they are.
pub fn open_read_only(connection_string: &str) -> Result<Connection> {
    let is_uri = connection_string.starts_with("file:");
    if !is_uri && connection_string != IN_MEMORY && !Path::new(connection_string).exists() {
        return Err(SinkError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("log database not found: {connection_string}"),
        )));
    }
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    Ok(Connection::open_with_flags(connection_string, flags)?)
}

/// Writes batches to a `SQLite` database.
pub struct SqliteRepository {
    conn: Option<Connection>,
    connection_string: String,
    interrupter: Interrupter,
    machine_name: String,
    process_id: i64,
}

impl SqliteRepository {
    /// Create a repository with no open connection.
    pub fn new() -> Self {
        Self {
            conn: None,
            connection_string: String::new(),
            interrupter: Interrupter::new(),
            machine_name: row::machine_name(),
            process_id: i64::from(std::process::id()),
        }
    }

    /// Whether a connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Borrow the open connection, if any.
    pub fn connection(&self) -> Option<&Connection> {
        self.conn.as_ref()
    }

    fn is_live(conn: &Connection) -> bool {
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }

    fn close(&mut self) {
        self.interrupter.clear_hook();
        if let Some(conn) = self.conn.take() {
            if let Err((_, e)) = conn.close() {
                warn!(error = %e, "failed to close log database cleanly");
            }
        }
        self.connection_string.clear();
    }
}

impl Default for SqliteRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SqliteRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRepository")
            .field("connected", &self.conn.is_some())
            .field("connection_string", &self.connection_string)
            .field("machine_name", &self.machine_name)
            .field("process_id", &self.process_id)
            .finish_non_exhaustive()
    }
}

impl LogRepository for SqliteRepository {
    fn try_ensure_connection(&mut self, connection_string: &str) -> Result<bool> {
        if connection_string.is_empty() {
            if self.conn.is_some() {
                debug!("connection string cleared, closing log database");
                self.close();
            }
            return Ok(false);
        }

        if self.connection_string == connection_string
            && self.conn.as_ref().is_some_and(Self::is_live)
        {
            return Ok(true);
        }

        self.close();
        let conn = open_connection(connection_string)?;
        let handle = conn.get_interrupt_handle();
        self.interrupter.set_hook(move || handle.interrupt());
        self.conn = Some(conn);
        self.connection_string = connection_string.to_string();
        info!(connection = %connection_string, "opened log database");
        Ok(true)
    }

    fn write(
        &mut self,
        log_name: &str,
        entries: &[SequencedEntry],
        timeout: Duration,
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let Some(conn) = self.conn.as_ref() else {
            return Err(SinkError::Internal("no open log database".into()));
        };

        let started = Instant::now();
        let deadline = started + timeout;
        let mut attempt = 1;
        loop {
            if self.interrupter.is_interrupted() {
                return Err(SinkError::Cancelled);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SinkError::Timeout {
                    elapsed: started.elapsed(),
                });
            }
            conn.busy_timeout(remaining)?;

            let batch = BatchHeader {
                log_name: truncate_chars(log_name, MAX_LOG_NAME_CHARS),
                machine_name: &self.machine_name,
                process_id: self.process_id,
            };
            match write_batch(conn, &batch, entries) {
                Ok(()) => {
                    debug!(entries = entries.len(), attempt, "batch written");
                    return Ok(());
                }
                Err(e) if e.is_interrupt() => return Err(SinkError::Cancelled),
                Err(e) if e.is_contention() => {
                    if Instant::now() >= deadline {
                        return Err(SinkError::Timeout {
                            elapsed: started.elapsed(),
                        });
                    }
                    if attempt >= MAX_WRITE_ATTEMPTS {
                        return Err(e);
                    }
                    debug!(attempt, error = %e, "log database busy, retrying batch");
                    attempt += 1;
                    thread::sleep(CONTENTION_PAUSE.min(remaining));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn interrupter(&self) -> Interrupter {
        self.interrupter.clone()
    }

    fn dispose(&mut self) {
        self.close();
    }
}

impl Drop for SqliteRepository {
    fn drop(&mut self) {
        self.close();
    }
}

struct BatchHeader<'a> {
    log_name: &'a str,
    machine_name: &'a str,
    process_id: i64,
}

fn write_batch(conn: &Connection, batch: &BatchHeader<'_>, entries: &[SequencedEntry]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    let _ = tx.execute(
        "INSERT INTO log_batches (log_name, machine_name, process_id, written_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            batch.log_name,
            batch.machine_name,
            batch.process_id,
            Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        ],
    )?;
    let batch_id = tx.last_insert_rowid();

    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO log_entries
               (batch_id, timestamp, ordinal, trace_id, event_id, level, message, category)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for entry in entries {
            let row = row::LogRow::from_entry(entry);
            let _ = stmt.execute(params![
                batch_id,
                row.timestamp,
                row.ordinal,
                row.trace_id,
                row.event_id,
                row.level,
                row.message,
                row.category,
            ])?;
        }
    }

    tx.commit()?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
