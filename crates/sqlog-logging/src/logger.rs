//! Direct logger front-end and the provider that owns the flush engine.
//!
//! [`SqlLogger`] formats on the caller's thread and enqueues; it never waits
//! on I/O. Trace correlation comes from an injected [`TraceIdSource`] rather
//! than ambient state.

use std::error::Error;
use std::fmt::Display;
use std::sync::Arc;

use sqlog_core::{Clock, LogEntry, LogLevel, SystemClock};
use sqlog_settings::OptionsReceiver;

use crate::engine::{FlushEngine, SinkHandle};
use crate::errors::Result;
use crate::repository::LogRepository;

/// Supplies the correlation id for entries logged right now.
pub trait TraceIdSource: Send + Sync {
    /// The current trace id, if any.
    fn current_trace_id(&self) -> Option<String>;
}

impl<F> TraceIdSource for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn current_trace_id(&self) -> Option<String> {
        self()
    }
}

/// A [`TraceIdSource`] that never has an id.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoTraceId;

impl TraceIdSource for NoTraceId {
    fn current_trace_id(&self) -> Option<String> {
        None
    }
}

/// Render an error and its `source()` chain as `outer: inner: root`.
pub fn render_error(error: &(dyn Error + '_)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !text.is_empty() && !rendered.ends_with(&text) {
            rendered.push_str(": ");
            rendered.push_str(&text);
        }
        source = cause.source();
    }
    rendered
}

/// Join message and error text with a space, skipping empty parts.
fn compose(message: String, error: Option<String>) -> String {
    match error.filter(|e| !e.is_empty()) {
        None => message,
        Some(error) if message.is_empty() => error,
        Some(error) => format!("{message} {error}"),
    }
}

/// Logger for one category.
#[derive(Clone)]
pub struct SqlLogger {
    category: Arc<str>,
    sink: SinkHandle,
    clock: Arc<dyn Clock>,
    trace_ids: Arc<dyn TraceIdSource>,
    min_level: LogLevel,
}

impl SqlLogger {
    /// Create a logger that enqueues into `sink`.
    pub fn new(
        category: impl Into<String>,
        sink: SinkHandle,
        clock: Arc<dyn Clock>,
        trace_ids: Arc<dyn TraceIdSource>,
    ) -> Self {
        Self {
            category: Arc::from(category.into()),
            sink,
            clock,
            trace_ids,
            min_level: LogLevel::Trace,
        }
    }

    /// Drop entries below `level`.
    #[must_use]
    pub fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// A copy of this logger whose entries all carry `trace_id`.
    #[must_use]
    pub fn with_trace_id(&self, trace_id: impl Into<String>) -> Self {
        let trace_id = trace_id.into();
        Self {
            trace_ids: Arc::new(move || Some(trace_id.clone())),
            ..self.clone()
        }
    }

    /// The category recorded with every entry.
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Whether entries at `level` are kept.
    pub fn is_enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }

    /// Format `state` (and `error`, if any) and enqueue the result.
    ///
    /// The error is rendered with its source chain and appended after the
    /// formatted message. If both are empty nothing is enqueued. A panic in
    /// `formatter` propagates to the caller.
    pub fn log<S, F>(
        &self,
        level: LogLevel,
        event_id: Option<i32>,
        state: &S,
        error: Option<&dyn Error>,
        formatter: F,
    ) where
        S: ?Sized,
        F: FnOnce(&S, Option<&dyn Error>) -> String,
    {
        if !self.is_enabled(level) {
            return;
        }
        let message = formatter(state, error);
        let error_text = error.map(render_error);
        let message = compose(message, error_text);
        if message.is_empty() {
            return;
        }

        let entry = LogEntry::new(self.clock.utc_now(), level, &*self.category, message)
            .with_trace_id(self.trace_ids.current_trace_id())
            .with_event_id(event_id);
        self.sink.enqueue(entry);
    }

    /// Log a plain message.
    pub fn message(&self, level: LogLevel, message: impl Display) {
        self.log(level, None, &message, None, |m, _| m.to_string());
    }

    /// Log a message followed by an error and its causes.
    pub fn error_with(&self, level: LogLevel, message: impl Display, error: &dyn Error) {
        self.log(level, None, &message, Some(error), |m, _| m.to_string());
    }

    /// Log at trace level.
    pub fn trace(&self, message: impl Display) {
        self.message(LogLevel::Trace, message);
    }

    /// Log at debug level.
    pub fn debug(&self, message: impl Display) {
        self.message(LogLevel::Debug, message);
    }

    /// Log at info level.
    pub fn info(&self, message: impl Display) {
        self.message(LogLevel::Info, message);
    }

    /// Log at warn level.
    pub fn warn(&self, message: impl Display) {
        self.message(LogLevel::Warn, message);
    }

    /// Log at error level.
    pub fn error(&self, message: impl Display) {
        self.message(LogLevel::Error, message);
    }

    /// Log at critical level.
    pub fn critical(&self, message: impl Display) {
        self.message(LogLevel::Critical, message);
    }
}

impl std::fmt::Debug for SqlLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlLogger")
            .field("category", &self.category)
            .field("min_level", &self.min_level)
            .finish_non_exhaustive()
    }
}

/// Owns the flush engine and hands out loggers.
///
/// Dropping the provider disposes the engine (final flush, bounded wait).
pub struct SqlLoggerProvider {
    engine: FlushEngine,
    clock: Arc<dyn Clock>,
    trace_ids: Arc<dyn TraceIdSource>,
    min_level: LogLevel,
}

impl SqlLoggerProvider {
    /// Start an engine over `repository`, following `options`.
    pub fn new(repository: impl LogRepository, options: OptionsReceiver) -> Result<Self> {
        Ok(Self::from_engine(FlushEngine::spawn(repository, options)?))
    }

    /// Wrap an already running engine.
    pub fn from_engine(engine: FlushEngine) -> Self {
        Self {
            engine,
            clock: Arc::new(SystemClock),
            trace_ids: Arc::new(NoTraceId),
            min_level: LogLevel::Trace,
        }
    }

    /// Clock used to stamp entries from loggers created afterwards.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Trace-id source for loggers created afterwards.
    #[must_use]
    pub fn with_trace_ids(mut self, source: impl TraceIdSource + 'static) -> Self {
        self.trace_ids = Arc::new(source);
        self
    }

    /// Minimum level for loggers created afterwards.
    #[must_use]
    pub fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// A logger for `category`.
    pub fn create_logger(&self, category: impl Into<String>) -> SqlLogger {
        SqlLogger::new(
            category,
            self.engine.handle(),
            Arc::clone(&self.clock),
            Arc::clone(&self.trace_ids),
        )
        .with_min_level(self.min_level)
    }

    /// Producer handle for other front-ends (e.g. the tracing layer).
    pub fn handle(&self) -> SinkHandle {
        self.engine.handle()
    }

    /// The clock loggers stamp entries with.
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Ask the worker to flush now. Returns immediately.
    pub fn flush(&self) {
        self.engine.flush();
    }

    /// Stop the engine. Idempotent.
    pub fn dispose(&self) {
        self.engine.dispose();
    }

    /// The underlying engine.
    pub fn engine(&self) -> &FlushEngine {
        &self.engine
    }
}

impl std::fmt::Debug for SqlLoggerProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlLoggerProvider")
            .field("engine", &self.engine)
            .field("min_level", &self.min_level)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use sqlog_core::ManualClock;
    use sqlog_settings::{OptionsMonitor, SinkOptions};
    use thiserror::Error;

    use crate::test_utils::ScriptedRepository;

    #[derive(Debug, Error)]
    #[error("connection reset")]
    struct Reset;

    #[derive(Debug, Error)]
    #[error("query failed")]
    struct QueryFailed(#[source] Reset);

    fn logger(sink: &SinkHandle) -> SqlLogger {
        SqlLogger::new(
            "orders",
            sink.clone(),
            Arc::new(ManualClock::new()),
            Arc::new(NoTraceId),
        )
    }

    fn only_message(sink: &SinkHandle) -> String {
        let entries = sink.queued_entries();
        assert_eq!(entries.len(), 1);
        entries[0].message.clone()
    }

    #[test]
    fn message_only() {
        let sink = SinkHandle::detached();
        logger(&sink).info("order placed");
        assert_eq!(only_message(&sink), "order placed");
        let entry = &sink.queued_entries()[0];
        assert_eq!(entry.category, "orders");
        assert_eq!(entry.level, LogLevel::Info);
        assert_eq!(entry.trace_id, None);
    }

    #[test]
    fn message_and_error_are_space_joined() {
        let sink = SinkHandle::detached();
        logger(&sink).error_with(LogLevel::Error, "save failed", &QueryFailed(Reset));
        assert_eq!(only_message(&sink), "save failed query failed: connection reset");
    }

    #[test]
    fn error_only() {
        let sink = SinkHandle::detached();
        logger(&sink).error_with(LogLevel::Error, "", &Reset);
        assert_eq!(only_message(&sink), "connection reset");
    }

    #[test]
    fn empty_message_produces_no_entry() {
        let sink = SinkHandle::detached();
        logger(&sink).info("");
        assert_eq!(sink.queued(), 0);
    }

    #[test]
    fn structured_state_with_event_id() {
        struct Order {
            id: u32,
        }
        let sink = SinkHandle::detached();
        logger(&sink).log(
            LogLevel::Warn,
            Some(17),
            &Order { id: 9 },
            None,
            |o, _| format!("order {} delayed", o.id),
        );
        let entry = &sink.queued_entries()[0];
        assert_eq!(entry.message, "order 9 delayed");
        assert_eq!(entry.event_id, Some(17));
    }

    #[test]
    fn trace_id_comes_from_source() {
        let sink = SinkHandle::detached();
        let logger = SqlLogger::new(
            "orders",
            sink.clone(),
            Arc::new(ManualClock::new()),
            Arc::new(|| Some("abc123".to_string())),
        );
        logger.info("x");
        logger.with_trace_id("fixed").info("y");

        let entries = sink.queued_entries();
        assert_eq!(entries[0].trace_id.as_deref(), Some("abc123"));
        assert_eq!(entries[1].trace_id.as_deref(), Some("fixed"));
    }

    #[test]
    fn timestamp_comes_from_clock() {
        let sink = SinkHandle::detached();
        let clock = Arc::new(ManualClock::new());
        let logger = SqlLogger::new(
            "c",
            sink.clone(),
            Arc::clone(&clock) as Arc<dyn Clock>,
            Arc::new(NoTraceId),
        );
        clock.advance(Duration::from_secs(90));
        logger.info("later");
        assert_eq!(sink.queued_entries()[0].timestamp, clock.utc_now());
    }

    #[test]
    fn below_min_level_is_dropped() {
        let sink = SinkHandle::detached();
        let logger = logger(&sink).with_min_level(LogLevel::Warn);
        logger.info("quiet");
        logger.debug("quieter");
        logger.critical("loud");
        assert_eq!(only_message(&sink), "loud");
    }

    #[test]
    #[should_panic(expected = "bad format")]
    fn formatter_panic_propagates() {
        let sink = SinkHandle::detached();
        logger(&sink).log(LogLevel::Info, None, &(), None, |(), _| {
            panic!("bad format")
        });
    }

    #[test]
    fn render_error_walks_sources() {
        assert_eq!(render_error(&QueryFailed(Reset)), "query failed: connection reset");
        assert_eq!(render_error(&Reset), "connection reset");
    }

    #[test]
    fn provider_loggers_reach_repository() {
        let (repo, probe) = ScriptedRepository::new();
        let monitor = OptionsMonitor::new(SinkOptions {
            connection_string: "db".into(),
            log_name: "svc".into(),
            autoflush_wait_ms: 60_000,
            ..Default::default()
        });
        let provider = SqlLoggerProvider::new(repo, monitor.subscribe())
            .unwrap()
            .with_trace_ids(|| Some("t-1".to_string()));

        let logger = provider.create_logger("billing");
        assert_eq!(logger.category(), "billing");
        logger.info("charged");
        provider.flush();

        assert!(probe.wait_until(Duration::from_secs(5), |p| !p.writes().is_empty()));
        let write = &probe.writes()[0];
        assert_eq!(write.log_name, "svc");
        assert_eq!(write.messages, ["charged"]);
        assert_eq!(write.entries[0].trace_id.as_deref(), Some("t-1"));
        assert_eq!(write.entries[0].category, "billing");

        provider.dispose();
        assert!(provider.engine().is_disposed());
    }
}
