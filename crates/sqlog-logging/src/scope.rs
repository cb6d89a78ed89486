//! RAII helpers for correlated, timed log output.
//!
//! - [`ActivityScope`] enters a span carrying a fresh `trace_id`, so every
//!   event logged inside it is correlated by [`SqlLogLayer`](crate::SqlLogLayer)
//! - [`OperationScope`] logs `"{name}: starting"` on creation and
//!   `"{name}: completed [1.234s]"` (or `failed`, at error level) on drop

use std::time::Instant;

use sqlog_core::LogLevel;
use tracing::span::EnteredSpan;
use tracing::{Span, error, info, info_span};
use uuid::Uuid;

use crate::logger::SqlLogger;

/// A fresh 32-hex-character trace id.
pub fn new_trace_id() -> String {
    Uuid::now_v7().simple().to_string()
}

/// An entered span with its own trace id. Leaving the scope exits the span.
#[derive(Debug)]
pub struct ActivityScope {
    trace_id: String,
    entered: EnteredSpan,
}

impl ActivityScope {
    /// Start an activity named `name` with a new trace id.
    pub fn start(name: &str) -> Self {
        Self::with_trace_id(name, new_trace_id())
    }

    /// Start an activity that continues an existing trace.
    pub fn with_trace_id(name: &str, trace_id: impl Into<String>) -> Self {
        let trace_id = trace_id.into();
        let span = info_span!("activity", activity = name, trace_id = trace_id.as_str());
        Self {
            trace_id,
            entered: span.entered(),
        }
    }

    /// The activity's trace id.
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// The underlying span.
    pub fn span(&self) -> &Span {
        &self.entered
    }
}

enum Output {
    Tracing,
    Logger(SqlLogger),
}

/// Logs the start and end of a named operation with its duration.
pub struct OperationScope {
    name: String,
    started: Instant,
    failed: bool,
    output: Output,
}

impl OperationScope {
    /// Start an operation that reports through `tracing`.
    pub fn start(name: impl Into<String>) -> Self {
        Self::begin(name.into(), Output::Tracing)
    }

    /// Start an operation that reports through `logger`.
    pub fn with_logger(logger: &SqlLogger, name: impl Into<String>) -> Self {
        Self::begin(name.into(), Output::Logger(logger.clone()))
    }

    fn begin(name: String, output: Output) -> Self {
        let scope = Self {
            name,
            started: Instant::now(),
            failed: false,
            output,
        };
        scope.emit(LogLevel::Info, &format!("{}: starting", scope.name));
        scope
    }

    /// Mark the operation failed; the closing message is logged at error level.
    pub fn fail(&mut self) {
        self.failed = true;
    }

    /// Whether [`OperationScope::fail`] was called.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Operation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn emit(&self, level: LogLevel, message: &str) {
        match &self.output {
            Output::Logger(logger) => logger.message(level, message),
            Output::Tracing if level >= LogLevel::Error => error!(operation = %self.name, "{message}"),
            Output::Tracing => info!(operation = %self.name, "{message}"),
        }
    }
}

impl std::fmt::Debug for OperationScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationScope")
            .field("name", &self.name)
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}

impl Drop for OperationScope {
    fn drop(&mut self) {
        let secs = self.started.elapsed().as_secs_f64();
        let (level, outcome) = if self.failed {
            (LogLevel::Error, "failed")
        } else {
            (LogLevel::Info, "completed")
        };
        self.emit(level, &format!("{}: {outcome} [{secs:.3}s]", self.name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use sqlog_core::ManualClock;
    use tracing::Level;
    use tracing_subscriber::layer::SubscriberExt;

    use crate::engine::SinkHandle;
    use crate::layer::SqlLogLayer;
    use crate::logger::NoTraceId;
    use crate::test_utils::capture_logs;

    fn is_duration_suffix(message: &str, prefix: &str) -> bool {
        message
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix(" ["))
            .and_then(|rest| rest.strip_suffix("s]"))
            .is_some_and(|secs| secs.parse::<f64>().is_ok() && secs.split('.').nth(1).map(str::len) == Some(3))
    }

    #[test]
    fn trace_ids_are_32_hex() {
        let id = new_trace_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_trace_id());
    }

    #[test]
    fn operation_logs_start_and_completion() {
        let (logs, _guard) = capture_logs();
        {
            let _op = OperationScope::start("import");
        }
        let events = logs.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "import: starting");
        assert!(is_duration_suffix(&events[1].message, "import: completed"), "{}", events[1].message);
        assert_eq!(events[1].level, Level::INFO);
        assert!(events[1].has_field("operation", "import"));
    }

    #[test]
    fn failed_operation_logs_error() {
        let (logs, _guard) = capture_logs();
        {
            let mut op = OperationScope::start("sync");
            op.fail();
            assert!(op.is_failed());
        }
        let last = logs.events().pop().unwrap();
        assert_eq!(last.level, Level::ERROR);
        assert!(is_duration_suffix(&last.message, "sync: failed"), "{}", last.message);
    }

    #[test]
    fn operation_through_logger() {
        let sink = SinkHandle::detached();
        let logger = SqlLogger::new("jobs", sink.clone(), Arc::new(ManualClock::new()), Arc::new(NoTraceId))
            .with_trace_id("t-9");
        {
            let mut op = OperationScope::with_logger(&logger, "rebuild");
            op.fail();
        }
        let entries = sink.queued_entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "rebuild: starting");
        assert_eq!(entries[1].level, LogLevel::Error);
        assert_eq!(entries[1].category, "jobs");
        assert_eq!(entries[1].trace_id.as_deref(), Some("t-9"));
    }

    #[test]
    fn activity_correlates_events() {
        let sink = SinkHandle::detached();
        let layer = SqlLogLayer::new(sink.clone(), Arc::new(ManualClock::new()), LogLevel::Trace);
        let subscriber = tracing_subscriber::registry().with(layer);

        let trace_id = tracing::subscriber::with_default(subscriber, || {
            let activity = ActivityScope::start("checkout");
            let _op = OperationScope::start("charge");
            tracing::info!("inside");
            activity.trace_id().to_string()
        });

        let entries = sink.queued_entries();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|e| e.trace_id.as_deref() == Some(trace_id.as_str())));
    }

    #[test]
    fn activity_continues_given_trace() {
        let activity = ActivityScope::with_trace_id("retry", "0123");
        assert_eq!(activity.trace_id(), "0123");
    }
}
