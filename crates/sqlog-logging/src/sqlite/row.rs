//! Fixed entry-to-row mapping for the `log_entries` table.
//!
//! Text columns are bounded; values longer than the column are truncated on
//! a char boundary rather than rejected.

use chrono::SecondsFormat;
use sqlog_core::{SequencedEntry, truncate_chars};

/// Maximum length of the log stream name.
pub const MAX_LOG_NAME_CHARS: usize = 128;
/// Maximum length of a trace identifier.
pub const MAX_TRACE_ID_CHARS: usize = 32;
/// Maximum length of a message.
pub const MAX_MESSAGE_CHARS: usize = 1024;
/// Maximum length of a category.
pub const MAX_CATEGORY_CHARS: usize = 128;
/// Maximum length of the machine name recorded per batch.
pub const MAX_MACHINE_NAME_CHARS: usize = 255;

/// One `log_entries` row, borrowing from the entry it came from.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct LogRow<'a> {
    pub timestamp: String,
    pub ordinal: i64,
    pub trace_id: Option<&'a str>,
    pub event_id: Option<i32>,
    pub level: u8,
    pub message: &'a str,
    pub category: &'a str,
}

impl<'a> LogRow<'a> {
    pub fn from_entry(sequenced: &'a SequencedEntry) -> Self {
        let entry = &*sequenced.entry;
        Self {
            timestamp: entry
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Micros, true),
            ordinal: sequenced.ordinal,
            trace_id: entry
                .trace_id
                .as_deref()
                .map(|t| truncate_chars(t, MAX_TRACE_ID_CHARS)),
            event_id: entry.event_id,
            level: entry.level.as_num(),
            message: truncate_chars(&entry.message, MAX_MESSAGE_CHARS),
            category: truncate_chars(&entry.category, MAX_CATEGORY_CHARS),
        }
    }
}

/// Host name of this machine, bounded for the `machine_name` column.
pub(crate) fn machine_name() -> String {
    let name = ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_else(|| "localhost".to_string());
    truncate_chars(&name, MAX_MACHINE_NAME_CHARS).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use sqlog_core::{LogEntry, LogLevel};

    fn sequenced(entry: LogEntry, ordinal: i64) -> SequencedEntry {
        SequencedEntry {
            ordinal,
            entry: Arc::new(entry),
        }
    }

    #[test]
    fn maps_all_columns() {
        let ts = "2025-01-15T12:00:00.123456Z".parse().unwrap();
        let s = sequenced(
            LogEntry::new(ts, LogLevel::Error, "db", "boom")
                .with_trace_id(Some("0123456789abcdef0123456789abcdef".into()))
                .with_event_id(Some(42)),
            7,
        );
        let row = LogRow::from_entry(&s);
        assert_eq!(
            row,
            LogRow {
                timestamp: "2025-01-15T12:00:00.123456Z".into(),
                ordinal: 7,
                trace_id: Some("0123456789abcdef0123456789abcdef"),
                event_id: Some(42),
                level: 4,
                message: "boom",
                category: "db",
            }
        );
    }

    #[test]
    fn truncates_long_text() {
        let s = sequenced(
            LogEntry::new(
                chrono::Utc::now(),
                LogLevel::Info,
                "c".repeat(300),
                "m".repeat(5000),
            )
            .with_trace_id(Some("t".repeat(64))),
            0,
        );
        let row = LogRow::from_entry(&s);
        assert_eq!(row.message.chars().count(), MAX_MESSAGE_CHARS);
        assert_eq!(row.category.chars().count(), MAX_CATEGORY_CHARS);
        assert_eq!(row.trace_id.unwrap().chars().count(), MAX_TRACE_ID_CHARS);
    }

    #[test]
    fn machine_name_is_bounded_and_present() {
        let name = machine_name();
        assert!(!name.is_empty());
        assert!(name.chars().count() <= MAX_MACHINE_NAME_CHARS);
    }
}
