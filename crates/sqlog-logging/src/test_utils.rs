//! Test utilities: tracing capture and a scripted [`LogRepository`].
//!
//! - [`capture_logs`] installs a thread-local subscriber that records events
//! - [`ScriptedRepository`] plays back connect/write outcomes and records
//!   every call; its [`RepositoryProbe`] stays with the test after the
//!   repository has moved onto the flush worker

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sqlog_core::{LogEntry, SequencedEntry};
use tracing::level_filters::LevelFilter;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

use crate::errors::{Result, SinkError};
use crate::repository::{Interrupter, LogRepository};

pub use sqlog_core::ManualClock;

// ─────────────────────────────────────────────────────────────────────────────
// Tracing capture
// ─────────────────────────────────────────────────────────────────────────────

/// A captured tracing event.
#[derive(Clone, Debug)]
pub struct CapturedEvent {
    /// The log level.
    pub level: Level,
    /// The target module.
    pub target: String,
    /// The formatted message.
    pub message: String,
    /// Field key-value pairs.
    pub fields: Vec<(String, String)>,
}

impl CapturedEvent {
    /// Value of the named field, if recorded.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Whether the named field was recorded with exactly `value`.
    pub fn has_field(&self, name: &str, value: &str) -> bool {
        self.field(name) == Some(value)
    }
}

/// Thread-safe store for captured events.
#[derive(Clone, Debug, Default)]
pub struct CapturedLogs {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl CapturedLogs {
    /// All captured events.
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().clone()
    }

    /// Whether any event contains the given message substring.
    pub fn has_message(&self, message_contains: &str) -> bool {
        self.events
            .lock()
            .iter()
            .any(|e| e.message.contains(message_contains))
    }

    /// Whether any event at `level` contains the message substring.
    pub fn has_event(&self, level: Level, message_contains: &str) -> bool {
        self.events
            .lock()
            .iter()
            .any(|e| e.level == level && e.message.contains(message_contains))
    }

    /// Count events at a specific level.
    pub fn count_at_level(&self, level: Level) -> usize {
        self.events.lock().iter().filter(|e| e.level == level).count()
    }

    /// Events whose target starts with `target_prefix`.
    pub fn events_for_target(&self, target_prefix: &str) -> Vec<CapturedEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.target.starts_with(target_prefix))
            .cloned()
            .collect()
    }

    /// Clear all captured events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

struct CaptureLayer {
    logs: CapturedLogs,
}

struct FieldVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        let val = format!("{value:?}");
        if field.name() == "message" {
            self.message = val;
        } else {
            self.fields.push((field.name().to_owned(), val));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            value.clone_into(&mut self.message);
        } else {
            self.fields.push((field.name().to_owned(), value.to_owned()));
        }
    }
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = FieldVisitor {
            message: String::new(),
            fields: Vec::new(),
        };
        event.record(&mut visitor);

        self.logs.events.lock().push(CapturedEvent {
            level: *metadata.level(),
            target: metadata.target().to_owned(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

/// Install a capturing subscriber for the current thread.
///
/// The returned guard must be kept alive for the duration of the test.
/// Events emitted on other threads (e.g. the flush worker) are not captured.
pub fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let layer = CaptureLayer { logs: logs.clone() };

    let subscriber = tracing_subscriber::registry()
        .with(layer)
        .with(LevelFilter::TRACE);

    let guard = subscriber.set_default();
    (logs, guard)
}

// ─────────────────────────────────────────────────────────────────────────────
// Scripted repository
// ─────────────────────────────────────────────────────────────────────────────

/// Scripted outcome of one `try_ensure_connection` call.
#[derive(Clone, Debug)]
pub enum ConnectScript {
    /// `Ok(true)`.
    Connected,
    /// `Ok(false)`.
    Unavailable,
    /// `Err(SinkError::Internal(..))`.
    Fail(String),
}

/// Scripted outcome of one `write` call.
#[derive(Clone, Debug)]
pub enum WriteScript {
    /// Record the batch and succeed.
    Succeed,
    /// `Err(SinkError::Internal(..))`.
    Fail(String),
    /// `Err(SinkError::Timeout { .. })` without waiting.
    Timeout,
    /// Panic inside the call.
    Panic,
    /// Block until the interrupter fires, then return `Cancelled`.
    BlockUntilInterrupted,
}

/// A batch the scripted repository accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedWrite {
    /// Log name passed to `write`.
    pub log_name: String,
    /// Ordinals in call order.
    pub ordinals: Vec<i64>,
    /// Messages in call order.
    pub messages: Vec<String>,
    /// The entries themselves.
    pub entries: Vec<Arc<LogEntry>>,
}

#[derive(Debug, Default)]
struct ProbeState {
    connect_script: Mutex<VecDeque<ConnectScript>>,
    write_script: Mutex<VecDeque<WriteScript>>,
    connects: Mutex<Vec<String>>,
    writes: Mutex<Vec<RecordedWrite>>,
    write_attempts: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    disposals: AtomicUsize,
}

/// Test-side view of a [`ScriptedRepository`].
#[derive(Clone, Debug)]
pub struct RepositoryProbe {
    state: Arc<ProbeState>,
}

impl RepositoryProbe {
    /// Queue an outcome for the next unscripted `try_ensure_connection`.
    pub fn push_connect(&self, script: ConnectScript) {
        self.state.connect_script.lock().push_back(script);
    }

    /// Queue an outcome for the next unscripted `write`.
    pub fn push_write(&self, script: WriteScript) {
        self.state.write_script.lock().push_back(script);
    }

    /// Connection strings passed to `try_ensure_connection`, in order.
    pub fn connects(&self) -> Vec<String> {
        self.state.connects.lock().clone()
    }

    /// Batches accepted so far.
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.state.writes.lock().clone()
    }

    /// All `write` calls, including failed ones.
    pub fn write_attempts(&self) -> usize {
        self.state.write_attempts.load(Ordering::SeqCst)
    }

    /// Writes currently executing.
    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of concurrently executing writes observed.
    pub fn max_concurrent_writes(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    /// How many times `dispose` was called.
    pub fn dispose_count(&self) -> usize {
        self.state.disposals.load(Ordering::SeqCst)
    }

    /// Poll until `predicate` holds or `timeout` passes. Returns the final
    /// value of the predicate.
    pub fn wait_until(&self, timeout: Duration, predicate: impl Fn(&Self) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while !predicate(self) {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        true
    }
}

/// A [`LogRepository`] that plays back scripted outcomes.
///
/// Without a script, connecting succeeds for any non-empty connection string
/// and writes succeed.
#[derive(Debug)]
pub struct ScriptedRepository {
    state: Arc<ProbeState>,
    interrupter: Interrupter,
}

/// Upper bound for [`WriteScript::BlockUntilInterrupted`], so a broken test
/// cannot hang forever.
const MAX_BLOCK: Duration = Duration::from_secs(30);

impl ScriptedRepository {
    /// Create a repository and the probe that observes it.
    pub fn new() -> (Self, RepositoryProbe) {
        let state = Arc::new(ProbeState::default());
        let repo = Self {
            state: Arc::clone(&state),
            interrupter: Interrupter::new(),
        };
        (repo, RepositoryProbe { state })
    }

    fn perform_write(&self, log_name: &str, entries: &[SequencedEntry], timeout: Duration) -> Result<()> {
        if self.interrupter.is_interrupted() {
            return Err(SinkError::Cancelled);
        }
        let script = self
            .state
            .write_script
            .lock()
            .pop_front()
            .unwrap_or(WriteScript::Succeed);
        match script {
            WriteScript::Succeed => {
                self.state.writes.lock().push(RecordedWrite {
                    log_name: log_name.to_string(),
                    ordinals: entries.iter().map(|e| e.ordinal).collect(),
                    messages: entries.iter().map(|e| e.entry.message.clone()).collect(),
                    entries: entries.iter().map(|e| Arc::clone(&e.entry)).collect(),
                });
                Ok(())
            }
            WriteScript::Fail(message) => Err(SinkError::Internal(message)),
            WriteScript::Timeout => Err(SinkError::Timeout { elapsed: timeout }),
            WriteScript::Panic => panic!("scripted write panic"),
            WriteScript::BlockUntilInterrupted => {
                let deadline = Instant::now() + MAX_BLOCK;
                while !self.interrupter.is_interrupted() && Instant::now() < deadline {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(SinkError::Cancelled)
            }
        }
    }
}

/// Decrements the in-flight counter even when a scripted write panics.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl LogRepository for ScriptedRepository {
    fn try_ensure_connection(&mut self, connection_string: &str) -> Result<bool> {
        self.state.connects.lock().push(connection_string.to_string());
        let script = self.state.connect_script.lock().pop_front();
        match script {
            Some(ConnectScript::Connected) => Ok(true),
            Some(ConnectScript::Unavailable) => Ok(false),
            Some(ConnectScript::Fail(message)) => Err(SinkError::Internal(message)),
            None => Ok(!connection_string.is_empty()),
        }
    }

    fn write(&mut self, log_name: &str, entries: &[SequencedEntry], timeout: Duration) -> Result<()> {
        let _ = self.state.write_attempts.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.state.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        let _guard = InFlight(&self.state.in_flight);
        self.perform_write(log_name, entries, timeout)
    }

    fn interrupter(&self) -> Interrupter {
        self.interrupter.clone()
    }

    fn dispose(&mut self) {
        let _ = self.state.disposals.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sqlog_core::LogLevel;

    fn entries(n: i64) -> Vec<SequencedEntry> {
        (0..n)
            .map(|ordinal| SequencedEntry {
                ordinal,
                entry: Arc::new(LogEntry::new(Utc::now(), LogLevel::Info, "t", format!("m{ordinal}"))),
            })
            .collect()
    }

    #[test]
    fn capture_records_fields() {
        let (logs, _guard) = capture_logs();
        tracing::info!(batch = "b1", "flushed");
        let events = logs.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].has_field("batch", "b1"));
        assert!(logs.has_event(Level::INFO, "flushed"));
    }

    #[test]
    fn capture_filters_by_target() {
        let (logs, _guard) = capture_logs();
        tracing::info!(target: "sqlog_logging::engine", "engine event");
        tracing::info!(target: "app", "app event");
        assert_eq!(logs.events_for_target("sqlog_logging").len(), 1);
        logs.clear();
        assert!(logs.events().is_empty());
    }

    #[test]
    fn scripted_defaults() {
        let (mut repo, probe) = ScriptedRepository::new();
        assert!(!repo.try_ensure_connection("").unwrap());
        assert!(repo.try_ensure_connection("db").unwrap());
        repo.write("app", &entries(2), Duration::from_secs(1)).unwrap();

        assert_eq!(probe.connects(), ["", "db"]);
        assert_eq!(probe.writes()[0].ordinals, [0, 1]);
        assert_eq!(probe.max_concurrent_writes(), 1);
        assert_eq!(probe.in_flight(), 0);
    }

    #[test]
    fn scripted_outcomes_play_in_order() {
        let (mut repo, probe) = ScriptedRepository::new();
        probe.push_write(WriteScript::Fail("down".into()));
        probe.push_write(WriteScript::Timeout);
        probe.push_connect(ConnectScript::Unavailable);

        assert!(!repo.try_ensure_connection("db").unwrap());
        assert!(repo.write("app", &entries(1), Duration::from_secs(1)).is_err());
        assert!(matches!(
            repo.write("app", &entries(1), Duration::from_secs(1)),
            Err(SinkError::Timeout { .. })
        ));
        repo.write("app", &entries(1), Duration::from_secs(1)).unwrap();
        assert_eq!(probe.write_attempts(), 3);
        assert_eq!(probe.writes().len(), 1);
    }

    #[test]
    fn blocking_write_returns_on_interrupt() {
        let (mut repo, probe) = ScriptedRepository::new();
        probe.push_write(WriteScript::BlockUntilInterrupted);
        let interrupter = repo.interrupter();

        let worker = std::thread::spawn(move || repo.write("app", &entries(1), Duration::from_secs(1)));
        assert!(probe.wait_until(Duration::from_secs(5), |p| p.in_flight() == 1));
        interrupter.interrupt();

        let result = worker.join().unwrap();
        assert!(matches!(result, Err(SinkError::Cancelled)));
        assert_eq!(probe.in_flight(), 0);
    }
}
