//! Tracing layer that streams dbsync progress events to a channel.
//!
//! Front ends install [`SyncEventLayer`] next to their formatter and read
//! [`SyncEvent`]s from the receiver to render progress.

use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;

/// Targets forwarded by default.
pub const DEFAULT_TARGET_PREFIX: &str = "dbsync";

/// One captured event
#[derive(Debug, Clone, serde::Serialize)]
pub struct SyncEvent {
    /// Event target (e.g., "dbsync_application::restore")
    pub target: String,
    /// Log level (INFO, DEBUG, WARN, ERROR)
    pub level: String,
    pub message: String,
    /// Structured fields from the event
    pub fields: HashMap<String, Value>,
    /// Fields of the enclosing spans, innermost wins
    pub span: HashMap<String, Value>,
    pub timestamp: String,
}

impl SyncEvent {
    /// The `phase` field, when the event marks a step of an operation.
    pub fn phase(&self) -> Option<&str> {
        self.fields.get("phase").and_then(Value::as_str)
    }
}

/// Forwards matching events over an unbounded channel.
pub struct SyncEventLayer {
    sender: mpsc::UnboundedSender<SyncEvent>,
    target_prefix: String,
}

impl SyncEventLayer {
    pub fn new(sender: mpsc::UnboundedSender<SyncEvent>) -> Self {
        Self {
            sender,
            target_prefix: DEFAULT_TARGET_PREFIX.to_string(),
        }
    }

    pub fn with_target_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.target_prefix = prefix.into();
        self
    }
}

/// Span fields recorded at creation, stored in span extensions.
#[derive(Debug, Clone, Default)]
struct SpanFields(HashMap<String, Value>);

impl<S> Layer<S> for SyncEventLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut fields = HashMap::new();
        attrs.record(&mut FieldVisitor(&mut fields));
        span.extensions_mut().insert(SpanFields(fields));
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let target = event.metadata().target();
        if !target.starts_with(&self.target_prefix) {
            return;
        }

        let mut fields = HashMap::new();
        event.record(&mut FieldVisitor(&mut fields));

        let mut span_fields = HashMap::new();
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                if let Some(stored) = span.extensions().get::<SpanFields>() {
                    span_fields.extend(stored.0.clone());
                }
            }
        }

        let sync_event = SyncEvent {
            target: target.to_string(),
            level: event.metadata().level().to_string(),
            message: fields
                .remove("message")
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default(),
            fields,
            span: span_fields,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        // Receiver gone means nobody is rendering; drop the event.
        let _ = self.sender.send(sync_event);
    }
}

/// Collects event or span fields as JSON values.
struct FieldVisitor<'a>(&'a mut HashMap<String, Value>);

impl FieldVisitor<'_> {
    fn put(&mut self, field: &Field, value: impl Into<Value>) {
        self.0.insert(field.name().to_string(), value.into());
    }
}

impl Visit for FieldVisitor<'_> {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field, value);
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, value);
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, value);
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, value);
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value);
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.put(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field, format!("{value:?}"));
    }
}
