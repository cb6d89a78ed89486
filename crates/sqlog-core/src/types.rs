//! Log entry types shared across the crates.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Log severity with the tinyint value stored in the `level` column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Detailed entry/exit points.
    Trace = 0,
    /// Intermediate values, decisions.
    Debug = 1,
    /// Outcomes, summaries.
    Info = 2,
    /// Non-fatal issues.
    Warn = 3,
    /// Errors.
    Error = 4,
    /// Failures that take down an operation or the process.
    Critical = 5,
}

impl LogLevel {
    /// Numeric severity for the database (0 = trace .. 5 = critical).
    #[must_use]
    pub const fn as_num(self) -> u8 {
        self as u8
    }

    /// Inverse of [`LogLevel::as_num`]. Out-of-range values clamp to critical.
    #[must_use]
    pub const fn from_num(n: u8) -> Self {
        match n {
            0 => Self::Trace,
            1 => Self::Debug,
            2 => Self::Info,
            3 => Self::Warn,
            4 => Self::Error,
            _ => Self::Critical,
        }
    }

    /// Convert from tracing level. `tracing` has no critical level.
    #[must_use]
    pub fn from_tracing(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => Self::Trace,
            tracing::Level::DEBUG => Self::Debug,
            tracing::Level::INFO => Self::Info,
            tracing::Level::WARN => Self::Warn,
            tracing::Level::ERROR => Self::Error,
        }
    }

    /// Convert from string (case-insensitive). Unknown names map to info.
    #[must_use]
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "warn" | "warning" => Self::Warn,
            "error" => Self::Error,
            "critical" | "fatal" => Self::Critical,
            _ => Self::Info,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A log entry as produced by a logger and held in the sink's queue.
///
/// Entries are immutable once created. The write ordinal is not part of the
/// entry: a flush snapshot pairs each entry with its ordinal in a
/// [`SequencedEntry`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// When the log call happened.
    pub timestamp: DateTime<Utc>,
    /// Correlation identifier of the surrounding distributed operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Caller-assigned event identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<i32>,
    /// Severity.
    pub level: LogLevel,
    /// Formatted message.
    pub message: String,
    /// Logger category (usually the module or component name).
    pub category: String,
}

impl LogEntry {
    /// Create an entry without trace or event identifiers.
    pub fn new(
        timestamp: DateTime<Utc>,
        level: LogLevel,
        category: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            trace_id: None,
            event_id: None,
            level,
            message: message.into(),
            category: category.into(),
        }
    }

    /// Attach a trace identifier.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: Option<String>) -> Self {
        self.trace_id = trace_id;
        self
    }

    /// Attach an event identifier.
    #[must_use]
    pub fn with_event_id(mut self, event_id: Option<i32>) -> Self {
        self.event_id = event_id;
        self
    }
}

/// A queued entry paired with its zero-based position in a flush snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SequencedEntry {
    /// Dense, zero-based write order within one flush cycle.
    pub ordinal: i64,
    /// The entry itself, shared with the queue.
    pub entry: Arc<LogEntry>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
