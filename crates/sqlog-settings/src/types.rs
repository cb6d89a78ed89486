//! Sink option types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Default maximum number of queued entries before pruning.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 10_000_000;
/// Default maximum entries per write call.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;
/// Default per-batch write timeout (30 s).
pub const DEFAULT_BATCH_TIMEOUT_MS: u64 = 30_000;
/// Default time between automatic flushes (5 s).
pub const DEFAULT_AUTOFLUSH_WAIT_MS: u64 = 5_000;
/// Default backoff added per consecutive failure (30 s).
pub const DEFAULT_RETRY_WAIT_INCREMENT_MS: u64 = 30_000;
/// Default backoff ceiling (1 h).
pub const DEFAULT_RETRY_WAIT_MAX_MS: u64 = 3_600_000;
/// Default time disposal waits for the flush worker (1 min).
pub const DEFAULT_SHUTDOWN_WAIT_MS: u64 = 60_000;

/// Options for the SQL log sink.
///
/// Durations are stored in milliseconds so the JSON file stays flat;
/// use the accessor methods for [`Duration`] values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SinkOptions {
    /// Where to write. Empty disables writing (entries are only pruned).
    pub connection_string: String,
    /// Name of the log stream recorded with every batch.
    pub log_name: String,
    /// Queue length above which the oldest entries are discarded.
    pub max_queue_size: usize,
    /// Maximum number of entries per write call.
    pub batch_size: usize,
    /// Timeout for a single write call.
    pub batch_timeout_ms: u64,
    /// Time between automatic flushes.
    pub autoflush_wait_ms: u64,
    /// Backoff added for each consecutive failed flush.
    pub retry_wait_increment_ms: u64,
    /// Backoff ceiling.
    pub retry_wait_max_ms: u64,
    /// How long disposal waits for the worker before interrupting it.
    pub shutdown_wait_ms: u64,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            log_name: process_name(),
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_timeout_ms: DEFAULT_BATCH_TIMEOUT_MS,
            autoflush_wait_ms: DEFAULT_AUTOFLUSH_WAIT_MS,
            retry_wait_increment_ms: DEFAULT_RETRY_WAIT_INCREMENT_MS,
            retry_wait_max_ms: DEFAULT_RETRY_WAIT_MAX_MS,
            shutdown_wait_ms: DEFAULT_SHUTDOWN_WAIT_MS,
        }
    }
}

impl SinkOptions {
    /// Per-batch write timeout.
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    /// Time between automatic flushes.
    pub fn autoflush_wait(&self) -> Duration {
        Duration::from_millis(self.autoflush_wait_ms)
    }

    /// Backoff added per consecutive failure.
    pub fn retry_wait_increment(&self) -> Duration {
        Duration::from_millis(self.retry_wait_increment_ms)
    }

    /// Backoff ceiling.
    pub fn retry_wait_max(&self) -> Duration {
        Duration::from_millis(self.retry_wait_max_ms)
    }

    /// Disposal wait before interrupting the worker.
    pub fn shutdown_wait(&self) -> Duration {
        Duration::from_millis(self.shutdown_wait_ms)
    }

    /// Batch size, never zero.
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(SettingsError::InvalidValue(
                "batchSize must be at least 1".into(),
            ));
        }
        if self.retry_wait_max_ms < self.retry_wait_increment_ms {
            return Err(SettingsError::InvalidValue(format!(
                "retryWaitMaxMs ({}) is below retryWaitIncrementMs ({})",
                self.retry_wait_max_ms, self.retry_wait_increment_ms
            )));
        }
        Ok(())
    }
}

/// Name of the running executable, used as the default log name.
pub fn process_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "sqlog".to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
