//! `tracing` front-end for the sink.
//!
//! [`SqlLogLayer`] turns `tracing` events into [`LogEntry`] values and
//! enqueues them. Context comes from span fields:
//!
//! - `trace_id` on the nearest enclosing span that has one
//! - `component` (nearest span) as the category, else the event target
//!
//! Event fields: `message` is the text; `event_id` becomes the event id;
//! `error` / `error.message` are appended after the text; any other fields
//! are rendered as `key=value` between the two.
//!
//! Events from the sink's own worker and repository modules are not queued,
//! so flushing cannot feed itself.

use std::fmt::Write;
use std::sync::Arc;

use sqlog_core::{Clock, LogEntry, LogLevel};
use tracing::Subscriber;
use tracing::field::{Field, Visit};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;

use crate::engine::SinkHandle;
use crate::logger::render_error;

/// Targets whose events never reach the sink.
const SELF_TARGETS: &[&str] = &[
    "sqlog_logging::engine",
    "sqlog_logging::sqlite",
    "sqlog_logging::diagnostics",
    "sqlog_logging::repository",
];

/// Layer that enqueues events into a [`SinkHandle`].
pub struct SqlLogLayer {
    sink: SinkHandle,
    clock: Arc<dyn Clock>,
    min_level: LogLevel,
}

impl SqlLogLayer {
    /// Queue events at `min_level` and above.
    pub fn new(sink: SinkHandle, clock: Arc<dyn Clock>, min_level: LogLevel) -> Self {
        Self {
            sink,
            clock,
            min_level,
        }
    }

    fn is_self_target(target: &str) -> bool {
        SELF_TARGETS.iter().any(|t| target.starts_with(t))
    }
}

impl std::fmt::Debug for SqlLogLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlLogLayer")
            .field("min_level", &self.min_level)
            .finish_non_exhaustive()
    }
}

/// Context fields stored in span extensions.
#[derive(Clone, Debug, Default)]
struct SpanContext {
    trace_id: Option<String>,
    component: Option<String>,
}

struct SpanFieldVisitor<'a> {
    ctx: &'a mut SpanContext,
}

impl Visit for SpanFieldVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "trace_id" => self.ctx.trace_id = Some(value.to_string()),
            "component" => self.ctx.component = Some(value.to_string()),
            _ => {}
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "trace_id" => self.ctx.trace_id = Some(format!("{value:?}")),
            "component" => self.ctx.component = Some(format!("{value:?}")),
            _ => {}
        }
    }
}

#[derive(Default)]
struct EventFieldVisitor {
    message: Option<String>,
    event_id: Option<i32>,
    error: Option<String>,
    extra: String,
}

impl EventFieldVisitor {
    fn push_extra(&mut self, name: &str, value: &dyn std::fmt::Display) {
        if !self.extra.is_empty() {
            self.extra.push(' ');
        }
        let _ = write!(self.extra, "{name}={value}");
    }

    fn into_message(self) -> String {
        [self.message, Some(self.extra), self.error]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Visit for EventFieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            "error" | "error.message" => self.error = Some(value.to_string()),
            name => self.push_extra(name, &value),
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        match field.name() {
            "event_id" => self.event_id = i32::try_from(value).ok(),
            name => self.push_extra(name, &value),
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        match field.name() {
            "event_id" => self.event_id = i32::try_from(value).ok(),
            name => self.push_extra(name, &value),
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push_extra(field.name(), &value);
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.push_extra(field.name(), &value);
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        let rendered = render_error(value);
        match field.name() {
            "error" | "error.message" => self.error = Some(rendered),
            name => self.push_extra(name, &rendered),
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{value:?}");
        match field.name() {
            "message" => self.message = Some(rendered),
            "error" | "error.message" => self.error = Some(rendered),
            name => self.push_extra(name, &rendered),
        }
    }
}

impl<S> Layer<S> for SqlLogLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: Context<'_, S>,
    ) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut span_ctx = SpanContext::default();
        attrs.record(&mut SpanFieldVisitor { ctx: &mut span_ctx });
        span.extensions_mut().insert(span_ctx);
    }

    fn on_record(
        &self,
        id: &tracing::span::Id,
        values: &tracing::span::Record<'_>,
        ctx: Context<'_, S>,
    ) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        if let Some(span_ctx) = extensions.get_mut::<SpanContext>() {
            values.record(&mut SpanFieldVisitor { ctx: span_ctx });
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = LogLevel::from_tracing(metadata.level());
        if level < self.min_level || Self::is_self_target(metadata.target()) {
            return;
        }

        let mut span_ctx = SpanContext::default();
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                let extensions = span.extensions();
                if let Some(fields) = extensions.get::<SpanContext>() {
                    if span_ctx.trace_id.is_none() {
                        span_ctx.trace_id.clone_from(&fields.trace_id);
                    }
                    if span_ctx.component.is_none() {
                        span_ctx.component.clone_from(&fields.component);
                    }
                }
            }
        }

        let mut visitor = EventFieldVisitor::default();
        event.record(&mut visitor);
        let event_id = visitor.event_id;
        let message = visitor.into_message();
        if message.is_empty() {
            return;
        }

        let category = span_ctx
            .component
            .unwrap_or_else(|| metadata.target().to_string());
        let entry = LogEntry::new(self.clock.utc_now(), level, category, message)
            .with_trace_id(span_ctx.trace_id)
            .with_event_id(event_id);
        self.sink.enqueue(entry);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
