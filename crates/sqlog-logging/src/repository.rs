//! The durable-store seam used by the flush engine.
//!
//! A [`LogRepository`] is owned by the flush worker thread and never touched
//! by producers. The only thing other threads may do is fire its
//! [`Interrupter`] to cancel a call that is running too long at shutdown.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sqlog_core::SequencedEntry;
use tokio_util::sync::CancellationToken;

use crate::errors::Result;

/// Destination for batches of log entries.
pub trait LogRepository: Send + 'static {
    /// Make sure a usable connection exists for `connection_string`.
    ///
    /// Reuses the current connection when the string is unchanged and the
    /// connection is still live; otherwise replaces it. Returns `Ok(false)`
    /// when `connection_string` is empty, meaning there is nowhere to write.
    fn try_ensure_connection(&mut self, connection_string: &str) -> Result<bool>;

    /// Write one ordered batch, all or nothing, within `timeout`.
    fn write(&mut self, log_name: &str, entries: &[SequencedEntry], timeout: Duration)
    -> Result<()>;

    /// Handle other threads can use to cancel an in-flight call.
    fn interrupter(&self) -> Interrupter;

    /// Release the connection. Safe to call more than once.
    fn dispose(&mut self);
}

type InterruptHook = Box<dyn Fn() + Send + Sync>;

/// Cross-thread cancellation for repository calls.
///
/// Cloning shares the same state. Firing it cancels the token (for
/// repositories that poll) and runs the installed hook (for repositories that
/// must poke a blocking driver call, such as `SQLite`'s interrupt handle).
/// Once fired it stays fired.
#[derive(Clone, Default)]
pub struct Interrupter {
    token: CancellationToken,
    hook: Arc<Mutex<Option<InterruptHook>>>,
}

impl Interrupter {
    /// Create an unfired interrupter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel in-flight and future calls.
    pub fn interrupt(&self) {
        self.token.cancel();
        if let Some(hook) = self.hook.lock().as_ref() {
            hook();
        }
    }

    /// Whether [`Interrupter::interrupt`] has been called.
    pub fn is_interrupted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The underlying cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Install (or replace) the hook run on interrupt. If already fired, the
    /// hook runs immediately.
    pub fn set_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        let mut slot = self.hook.lock();
        if self.token.is_cancelled() {
            hook();
        }
        *slot = Some(Box::new(hook));
    }

    /// Remove the hook (e.g. when the connection it pokes is closed).
    pub fn clear_hook(&self) {
        *self.hook.lock() = None;
    }
}

impl std::fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interrupter")
            .field("interrupted", &self.is_interrupted())
            .field("has_hook", &self.hook.lock().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn interrupt_cancels_token_and_runs_hook() {
        let interrupter = Interrupter::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        interrupter.set_hook(move || {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!interrupter.is_interrupted());
        interrupter.clone().interrupt();

        assert!(interrupter.is_interrupted());
        assert!(interrupter.token().is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn hook_installed_after_interrupt_runs_immediately() {
        let interrupter = Interrupter::new();
        interrupter.interrupt();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        interrupter.set_hook(move || {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cleared_hook_is_not_run() {
        let interrupter = Interrupter::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        interrupter.set_hook(move || {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
        });
        interrupter.clear_hook();
        interrupter.interrupt();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
