//! The background flush engine.
//!
//! One dedicated thread (`sqlog-flush`) drains the [`LogQueue`] into a
//! [`LogRepository`]. Producers only append to the queue and, for an explicit
//! flush, flip a flag and notify a condvar; they never wait on I/O.
//!
//! Each cycle the worker:
//!
//! 1. reads the current [`SinkOptions`] snapshot and schedules its next wake
//! 2. sleeps on the condvar until the wake time, an explicit flush, or exit
//! 3. flushes or only prunes, as decided by the [`FlushSchedule`]
//! 4. records success or failure; failures start a linear backoff
//!
//! # Shutdown
//!
//! [`FlushEngine::dispose`] sets the exit flag and wakes the worker, which
//! runs one final flush and exits. If it has not finished within
//! `shutdown_wait`, the repository's [`Interrupter`] is fired and the engine
//! waits a short grace period before joining. The repository is disposed on
//! the disposing thread only after the worker has handed it back through the
//! join.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use sqlog_core::{Clock, LogEntry, SystemClock};
use sqlog_settings::{OptionsReceiver, SinkOptions};
use tracing::{debug, info, warn};

use crate::diagnostics::{Diagnostics, TracingDiagnostics};
use crate::errors::{Result, SinkError};
use crate::queue::LogQueue;
use crate::repository::{Interrupter, LogRepository};
use crate::schedule::{FlushAction, FlushSchedule};

/// Name of the worker thread.
pub const WORKER_THREAD_NAME: &str = "sqlog-flush";

/// How long dispose waits for the worker after interrupting it.
const INTERRUPT_GRACE: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────────────────────────
// Shared state
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct SignalState {
    flush_requested: bool,
    done: bool,
}

/// State shared by producers, the worker and the disposing thread.
#[derive(Debug, Default)]
struct Shared {
    queue: LogQueue,
    exiting: AtomicBool,
    signal: Mutex<SignalState>,
    wake: Condvar,
}

impl Shared {
    fn request_flush(&self) {
        self.signal.lock().flush_requested = true;
        let _ = self.wake.notify_all();
    }

    fn request_exit(&self) {
        self.exiting.store(true, Ordering::Release);
        // Taking the lock orders this notify after any in-progress check of
        // `exiting` by the worker, so the wake-up cannot be lost.
        let _guard = self.signal.lock();
        let _ = self.wake.notify_all();
    }

    fn is_exiting(&self) -> bool {
        self.exiting.load(Ordering::Acquire)
    }

    fn mark_done(&self) {
        self.signal.lock().done = true;
        let _ = self.wake.notify_all();
    }

    /// Wait up to `timeout` for the worker to finish. Returns whether it did.
    fn wait_done(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.signal.lock();
        while !state.done {
            if self.wake.wait_until(&mut state, deadline).timed_out() {
                return state.done;
            }
        }
        true
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Producer handle
// ─────────────────────────────────────────────────────────────────────────────

/// Cheap, cloneable producer-side handle to a running engine.
#[derive(Clone, Debug)]
pub struct SinkHandle {
    shared: Arc<Shared>,
}

impl SinkHandle {
    /// Append an entry to the queue. Never blocks on I/O.
    ///
    /// Entries arriving once the engine is shutting down are discarded:
    /// no worker remains to write or prune them.
    pub fn enqueue(&self, entry: LogEntry) {
        if self.shared.is_exiting() {
            return;
        }
        self.shared.queue.enqueue(entry);
    }

    /// Ask the worker to flush as soon as possible. Returns immediately.
    pub fn flush(&self) {
        self.shared.request_flush();
    }

    /// Number of entries waiting to be written.
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Whether the engine has been disposed.
    pub fn is_closed(&self) -> bool {
        self.shared.is_exiting()
    }
}

#[cfg(test)]
impl SinkHandle {
    /// A handle with no worker behind it, for inspecting what producers queue.
    pub(crate) fn detached() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
        }
    }

    pub(crate) fn queued_entries(&self) -> Vec<Arc<LogEntry>> {
        self.shared
            .queue
            .peek(0, usize::MAX, 0)
            .into_iter()
            .map(|e| e.entry)
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Worker
// ─────────────────────────────────────────────────────────────────────────────

/// Why the worker woke.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Wake {
    Scheduled,
    Explicit,
    Exit,
}

/// Summary of one cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct CycleReport {
    pub flushed: bool,
    pub written: usize,
    pub pruned: usize,
    pub failed: bool,
}

/// Owns the repository and the schedule; runs only on the worker thread
/// (or directly in tests).
pub(crate) struct FlushWorker {
    repository: Box<dyn LogRepository>,
    shared: Arc<Shared>,
    options: OptionsReceiver,
    clock: Arc<dyn Clock>,
    diagnostics: Arc<dyn Diagnostics>,
    schedule: FlushSchedule,
}

impl FlushWorker {
    fn new(
        repository: Box<dyn LogRepository>,
        shared: Arc<Shared>,
        options: OptionsReceiver,
        clock: Arc<dyn Clock>,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Self {
        let schedule = FlushSchedule::new(clock.now());
        Self {
            repository,
            shared,
            options,
            clock,
            diagnostics,
            schedule,
        }
    }

    fn current_options(&mut self) -> Arc<SinkOptions> {
        Arc::clone(&self.options.borrow_and_update())
    }

    fn run(mut self) -> Box<dyn LogRepository> {
        debug!("flush worker started");
        loop {
            self.schedule_next();
            match self.wait() {
                Wake::Exit => {
                    if self.repository.interrupter().is_interrupted() {
                        debug!("flush worker interrupted, skipping final flush");
                    } else {
                        let _ = self.run_cycle(true);
                    }
                    break;
                }
                Wake::Explicit => {
                    let _ = self.run_cycle(true);
                }
                Wake::Scheduled => {
                    let _ = self.run_cycle(false);
                }
            }
        }
        debug!(remaining = self.shared.queue.len(), "flush worker exiting");
        self.shared.mark_done();
        self.repository
    }

    pub(crate) fn schedule_next(&mut self) {
        let wait = self.current_options().autoflush_wait();
        self.schedule.schedule(self.clock.now(), wait);
    }

    fn wait(&self) -> Wake {
        let mut state = self.shared.signal.lock();
        loop {
            if self.shared.is_exiting() {
                return Wake::Exit;
            }
            if state.flush_requested {
                state.flush_requested = false;
                return Wake::Explicit;
            }
            let now = self.clock.now();
            let flush_time = self.schedule.flush_time();
            if now >= flush_time {
                return Wake::Scheduled;
            }
            let _ = self.shared.wake.wait_for(&mut state, flush_time - now);
        }
    }

    /// Run one decide/act cycle. `explicit` marks an explicit flush request.
    pub(crate) fn run_cycle(&mut self, explicit: bool) -> CycleReport {
        let options = self.current_options();
        let action = self.schedule.decide(explicit);
        let mut report = CycleReport::default();

        let result = match action {
            FlushAction::Flush => {
                report.flushed = true;
                self.flush(&options, &mut report)
            }
            FlushAction::PruneOnly => {
                report.pruned = self.prune(&options);
                Ok(())
            }
        };

        match result {
            Ok(()) => {
                // A prune-only cycle runs inside the backoff window and wrote
                // nothing, so it does not count as a successful cycle for
                // `retry_count`. Resetting here would collapse every backoff
                // to a single autoflush tick.
                if action == FlushAction::Flush {
                    self.schedule.record_success();
                }
            }
            Err(e) => {
                report.failed = true;
                let backoff = self.schedule.record_failure(
                    self.clock.now(),
                    options.retry_wait_increment(),
                    options.retry_wait_max(),
                );
                self.report_failure(&e, backoff);
            }
        }
        report
    }

    fn flush(&mut self, options: &SinkOptions, report: &mut CycleReport) -> Result<()> {
        if self.shared.queue.is_empty() {
            return Ok(());
        }

        let connected = match guarded(|| {
            self.repository
                .try_ensure_connection(&options.connection_string)
        }) {
            Ok(connected) => connected,
            Err(e) => {
                report.pruned = self.prune(options);
                return Err(e);
            }
        };
        if !connected {
            report.pruned = self.prune(options);
            return Ok(());
        }

        let result = self.write_snapshot(options, report);
        report.pruned = self.prune(options);
        result
    }

    /// Write the entries present at the start of the flush, in batches.
    ///
    /// Only this thread removes from the queue, so the first `snapshot_len`
    /// entries stay put while producers append behind them.
    fn write_snapshot(&mut self, options: &SinkOptions, report: &mut CycleReport) -> Result<()> {
        let snapshot_len = self.shared.queue.len();
        let batch_size = options.effective_batch_size();
        let timeout = options.batch_timeout();

        while report.written < snapshot_len {
            let take = batch_size.min(snapshot_len - report.written);
            let first_ordinal = i64::try_from(report.written).unwrap_or(i64::MAX);
            let batch = self.shared.queue.peek(0, take, first_ordinal);
            if batch.is_empty() {
                break;
            }

            guarded(|| self.repository.write(&options.log_name, &batch, timeout))?;

            report.written += self.shared.queue.dequeue(batch.len());
        }

        if report.written > 0 {
            debug!(written = report.written, "flushed log entries");
        }
        Ok(())
    }

    fn prune(&self, options: &SinkOptions) -> usize {
        let dropped = self.shared.queue.prune(options.max_queue_size);
        if dropped > 0 {
            warn!(
                dropped,
                max_queue_size = options.max_queue_size,
                "log queue over capacity, discarded oldest entries"
            );
        }
        dropped
    }

    fn report_failure(&self, error: &SinkError, backoff: Duration) {
        let diagnostics = &self.diagnostics;
        if panic::catch_unwind(AssertUnwindSafe(|| diagnostics.flush_failed(error, backoff))).is_err() {
            debug!("diagnostics sink panicked while reporting a flush failure");
        }
    }
}

/// Run a repository call, turning a panic into [`SinkError::WorkerPanicked`].
fn guarded<T>(call: impl FnOnce() -> Result<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(payload) => Err(SinkError::WorkerPanicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Owner of the flush worker thread.
pub struct FlushEngine {
    shared: Arc<Shared>,
    options: OptionsReceiver,
    interrupter: Interrupter,
    worker: Mutex<Option<JoinHandle<Box<dyn LogRepository>>>>,
}

impl FlushEngine {
    /// Start a worker with the system clock and tracing diagnostics.
    pub fn spawn(repository: impl LogRepository, options: OptionsReceiver) -> Result<Self> {
        Self::spawn_with(
            Box::new(repository),
            options,
            Arc::new(SystemClock),
            Arc::new(TracingDiagnostics),
        )
    }

    /// Start a worker with an explicit clock and diagnostics sink.
    pub fn spawn_with(
        repository: Box<dyn LogRepository>,
        options: OptionsReceiver,
        clock: Arc<dyn Clock>,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Result<Self> {
        let shared = Arc::new(Shared::default());
        let interrupter = repository.interrupter();
        let worker = FlushWorker::new(
            repository,
            Arc::clone(&shared),
            options.clone(),
            clock,
            diagnostics,
        );
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.into())
            .spawn(move || worker.run())?;

        info!("log flush engine started");
        Ok(Self {
            shared,
            options,
            interrupter,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// A producer handle.
    pub fn handle(&self) -> SinkHandle {
        SinkHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Ask the worker to flush as soon as possible. Returns immediately.
    pub fn flush(&self) {
        self.shared.request_flush();
    }

    /// Number of entries waiting to be written.
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Whether [`FlushEngine::dispose`] has run.
    pub fn is_disposed(&self) -> bool {
        self.worker.lock().is_none()
    }

    /// Stop the worker and release the repository. Idempotent.
    pub fn dispose(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };

        let shutdown_wait = self.options.borrow().shutdown_wait();
        self.shared.request_exit();

        let mut finished = self.shared.wait_done(shutdown_wait);
        if !finished {
            warn!(
                shutdown_wait_ms = u64::try_from(shutdown_wait.as_millis()).unwrap_or(u64::MAX),
                "flush worker did not stop in time, interrupting"
            );
            self.interrupter.interrupt();
            finished = self.shared.wait_done(INTERRUPT_GRACE);
        }

        if !finished {
            warn!("flush worker still busy after interrupt, detaching");
            drop(handle);
            return;
        }

        match handle.join() {
            Ok(mut repository) => {
                repository.dispose();
                info!(
                    unwritten = self.shared.queue.len(),
                    "log flush engine stopped"
                );
            }
            Err(_) => warn!("flush worker panicked"),
        }
    }
}

impl Drop for FlushEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for FlushEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushEngine")
            .field("queued", &self.shared.queue.len())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
