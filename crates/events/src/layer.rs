//! Custom tracing Layer for capturing taskmemo events.
//!
//! This layer intercepts tracing events whose target starts with `taskmemo`
//! and carry a known `event_type`, converts them to [`TaskmemoEvent`]
//! instances and sends them down a channel.

use crate::event::{EventKind, TaskmemoEvent};
use tokio::sync::mpsc;
use tracing::Subscriber;
use tracing::field::{Field, Visit};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;

/// A tracing Layer that captures taskmemo-specific events.
pub struct TaskmemoEventLayer {
    sender: mpsc::UnboundedSender<TaskmemoEvent>,
}

impl TaskmemoEventLayer {
    /// Create a new layer that sends events to the given channel.
    #[must_use]
    pub fn new(sender: mpsc::UnboundedSender<TaskmemoEvent>) -> Self {
        Self { sender }
    }
}

impl<S> Layer<S> for TaskmemoEventLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let target = event.metadata().target();
        if !target.starts_with("taskmemo") {
            return;
        }

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        if let Some(captured) = visitor.build(target) {
            // Receiver gone means nobody is rendering; dropping is fine.
            let _ = self.sender.send(captured);
        }
    }
}

#[derive(Default)]
struct EventVisitor {
    event_type: Option<String>,
    task_name: Option<String>,
    fingerprint: Option<String>,
    reason: Option<String>,
    error: Option<String>,
    success: Option<bool>,
    duration_ms: Option<u64>,
}

impl EventVisitor {
    fn build(self, target: &str) -> Option<TaskmemoEvent> {
        let kind = EventKind::from_event_type(self.event_type.as_deref()?)?;
        let mut event = TaskmemoEvent::new(target, kind);
        event.task_name = self.task_name;
        event.fingerprint = self.fingerprint;
        event.detail = self.error.or(self.reason);
        event.success = self.success;
        event.duration_ms = self.duration_ms;
        Some(event)
    }

    fn set_str(&mut self, name: &str, value: String) {
        match name {
            "event_type" => self.event_type = Some(value),
            "task_name" => self.task_name = Some(value),
            "fingerprint" => self.fingerprint = Some(value),
            "reason" => self.reason = Some(value),
            "error" => self.error = Some(value),
            _ => {}
        }
    }
}

impl Visit for EventVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.set_str(field.name(), value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == "duration_ms" {
            self.duration_ms = Some(value);
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        if field.name() == "duration_ms" {
            self.duration_ms = u64::try_from(value).ok();
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == "success" {
            self.success = Some(value);
        }
    }

    // `%value` fields arrive here as Display wrappers.
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.set_str(field.name(), format!("{value:?}"));
    }
}
