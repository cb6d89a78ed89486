//! Read-side queries over a log database.

use std::fmt::Write;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};
use serde::Serialize;
use sqlog_core::LogLevel;

use crate::errors::Result;

/// Filters for [`LogReader::query`] and [`LogReader::count`].
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    /// Only entries written under this log name.
    pub log_name: Option<String>,
    /// Only entries carrying this trace id.
    pub trace_id: Option<String>,
    /// Only entries at or above this level.
    pub min_level: Option<LogLevel>,
    /// Maximum rows returned. `None` means unbounded.
    pub limit: Option<usize>,
}

/// One stored entry joined with its batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEntry {
    /// Row id in `log_entries`.
    pub id: i64,
    /// Batch the entry was written in.
    pub batch_id: i64,
    /// Log stream name of the batch.
    pub log_name: String,
    /// Machine that wrote the batch.
    pub machine_name: String,
    /// Process that wrote the batch.
    pub process_id: i64,
    /// When the entry was created.
    pub timestamp: DateTime<Utc>,
    /// Position within the flush that wrote it.
    pub ordinal: i64,
    /// Correlation id, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Event id, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<i32>,
    /// Severity.
    pub level: LogLevel,
    /// Message text.
    pub message: String,
    /// Logger category.
    pub category: String,
}

/// Queries stored entries. Newest first.
#[derive(Debug)]
pub struct LogReader<'c> {
    conn: &'c Connection,
}

impl<'c> LogReader<'c> {
    /// Read through an open (and migrated) connection.
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Entries matching `query`, newest first.
    pub fn query(&self, query: &LogQuery) -> Result<Vec<StoredEntry>> {
        let (mut sql, params) = Self::filtered(
            "SELECT e.id, e.batch_id, b.log_name, b.machine_name, b.process_id,
                    e.timestamp, e.ordinal, e.trace_id, e.event_id, e.level, e.message, e.category
             FROM log_entries e JOIN log_batches b ON b.id = e.batch_id",
            query,
        );
        sql.push_str(" ORDER BY e.timestamp DESC, e.id DESC");
        if let Some(limit) = query.limit {
            let _ = write!(sql, " LIMIT {limit}");
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(Box::as_ref).collect();
        let rows = stmt
            .query_map(params_refs.as_slice(), Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Number of entries matching `query`. The limit is ignored.
    pub fn count(&self, query: &LogQuery) -> Result<u64> {
        let (sql, params) = Self::filtered(
            "SELECT COUNT(*) FROM log_entries e JOIN log_batches b ON b.id = e.batch_id",
            query,
        );
        let params_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(Box::as_ref).collect();
        let n: i64 = self
            .conn
            .query_row(&sql, params_refs.as_slice(), |row| row.get(0))?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    /// Distinct log names, alphabetically.
    pub fn log_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT log_name FROM log_batches ORDER BY log_name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn filtered(
        select: &str,
        query: &LogQuery,
    ) -> (String, Vec<Box<dyn rusqlite::types::ToSql>>) {
        let mut sql = format!("{select} WHERE 1=1");
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(name) = &query.log_name {
            let _ = write!(sql, " AND b.log_name = ?{}", params.len() + 1);
            params.push(Box::new(name.clone()));
        }
        if let Some(trace_id) = &query.trace_id {
            let _ = write!(sql, " AND e.trace_id = ?{}", params.len() + 1);
            params.push(Box::new(trace_id.clone()));
        }
        if let Some(level) = query.min_level {
            let _ = write!(sql, " AND e.level >= ?{}", params.len() + 1);
            params.push(Box::new(level.as_num()));
        }
        (sql, params)
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<StoredEntry> {
        let timestamp: String = row.get(5)?;
        let timestamp = DateTime::parse_from_rfc3339(&timestamp)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
            })?;
        let level: u8 = row.get(9)?;
        Ok(StoredEntry {
            id: row.get(0)?,
            batch_id: row.get(1)?,
            log_name: row.get(2)?,
            machine_name: row.get(3)?,
            process_id: row.get(4)?,
            timestamp,
            ordinal: row.get(6)?,
            trace_id: row.get(7)?,
            event_id: row.get(8)?,
            level: LogLevel::from_num(level),
            message: row.get(10)?,
            category: row.get(11)?,
        })
    }
}
