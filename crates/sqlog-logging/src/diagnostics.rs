//! Where the flush worker reports its own failures.

use std::time::Duration;

use tracing::warn;

use crate::errors::SinkError;

/// Receives flush-failure reports. Informational only; implementations must
/// not assume they can influence the worker.
pub trait Diagnostics: Send + Sync {
    /// A cycle failed; the next write attempt waits at least `backoff`.
    fn flush_failed(&self, error: &SinkError, backoff: Duration);
}

/// Reports through `tracing` at warn level.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn flush_failed(&self, error: &SinkError, backoff: Duration) {
        warn!(
            error = %error,
            backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
            "log flush failed, backing off"
        );
    }
}
