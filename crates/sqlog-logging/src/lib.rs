//! # sqlog-logging
//!
//! A batched, retrying log sink that persists structured entries to SQL.
//!
//! Producers enqueue into a shared [`LogQueue`]; a dedicated flush worker
//! ([`FlushEngine`]) drains it on a schedule, on request, and at shutdown.
//! Failed flushes back off linearly, and the queue is pruned to its bound
//! whether or not writes succeed.
//!
//! Front-ends:
//! - [`SqlLogger`] / [`SqlLoggerProvider`]: explicit, category-scoped loggers
//! - [`SqlLogLayer`]: a `tracing` layer, wired up by [`init_subscriber_with_sink`]
//!
//! Storage goes through the [`LogRepository`] trait; [`SqliteRepository`] is
//! the bundled implementation.

#![deny(unsafe_code)]

pub mod diagnostics;
pub mod engine;
pub mod errors;
pub mod layer;
pub mod logger;
pub mod queue;
pub mod repository;
pub mod schedule;
pub mod scope;
pub mod sqlite;
pub mod test_utils;

pub use diagnostics::{Diagnostics, TracingDiagnostics};
pub use engine::{FlushEngine, SinkHandle};
pub use errors::{Result, SinkError};
pub use layer::SqlLogLayer;
pub use logger::{NoTraceId, SqlLogger, SqlLoggerProvider, TraceIdSource};
pub use queue::LogQueue;
pub use repository::{Interrupter, LogRepository};
pub use schedule::{FlushAction, FlushSchedule};
pub use scope::{ActivityScope, OperationScope, new_trace_id};
pub use sqlite::{
    LogQuery, LogReader, SqliteRepository, StoredEntry, open_connection, open_read_only,
};

use sqlog_core::LogLevel;
use sqlog_settings::OptionsReceiver;

/// Initialize the global tracing subscriber with stderr output only.
///
/// Call once at startup; later calls are no-ops. `RUST_LOG` overrides `level`.
pub fn init_subscriber(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    let _ = subscriber.try_init();
}

/// Initialize the global tracing subscriber with stderr output and the SQL sink.
///
/// Starts a [`SqlLoggerProvider`] over `repository`, then composes a `fmt`
/// layer with a [`SqlLogLayer`] feeding the provider's engine. `level` filters
/// `tracing` events only. The returned provider also hands out
/// [`SqlLogger`]s, which log at every level unless configured otherwise; drop
/// or dispose it at shutdown to run the final flush.
///
/// If a global subscriber is already installed the layer is not attached,
/// but the provider still works for explicit loggers.
pub fn init_subscriber_with_sink(
    level: &str,
    options: OptionsReceiver,
    repository: impl LogRepository,
) -> Result<SqlLoggerProvider> {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let provider = SqlLoggerProvider::new(repository, options)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    let sink_layer = SqlLogLayer::new(
        provider.handle(),
        provider.clock(),
        LogLevel::from_str_lossy(level),
    );

    if tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(sink_layer)
        .try_init()
        .is_err()
    {
        tracing::debug!("global subscriber already set, sink layer not attached");
    }

    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlog_settings::{OptionsMonitor, SinkOptions};

    use crate::test_utils::ScriptedRepository;

    #[test]
    fn init_subscriber_does_not_panic() {
        init_subscriber("warn");
        init_subscriber("debug");
    }

    #[test]
    fn init_with_sink_returns_working_provider() {
        let monitor = OptionsMonitor::new(SinkOptions {
            connection_string: "scripted".into(),
            log_name: "init".into(),
            ..SinkOptions::default()
        });
        let (repo, probe) = ScriptedRepository::new();
        let provider = init_subscriber_with_sink("info", monitor.subscribe(), repo).unwrap();

        provider.create_logger("boot").info("hello");
        provider.dispose();

        let writes = probe.writes();
        assert!(writes.iter().any(|w| w.messages.iter().any(|m| m == "hello")));
        assert_eq!(probe.dispose_count(), 1);
    }
}
