//! Fire-and-forget notification dispatch.
//!
//! The core emits events; delivery is the collaborator's problem. Dispatch
//! never blocks core work and failures are not awaited.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// An event the core wants surfaced to humans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl NotificationEvent {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

pub trait NotificationDispatcher: Send + Sync {
    /// Emit an event. Must not block on delivery.
    fn dispatch(&self, event: NotificationEvent);
}

pub type SharedDispatcher = Arc<dyn NotificationDispatcher>;

/// Dispatcher that logs events and drops them.
#[derive(Debug, Default)]
pub struct LogDispatcher;

impl NotificationDispatcher for LogDispatcher {
    fn dispatch(&self, event: NotificationEvent) {
        log::info!("notification [{}]: {}", event.kind, event.message);
    }
}

/// Test dispatcher that records every event.
#[derive(Default)]
pub struct RecordingDispatcher {
    events: RwLock<Vec<NotificationEvent>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.read().clone()
    }
}

impl NotificationDispatcher for RecordingDispatcher {
    fn dispatch(&self, event: NotificationEvent) {
        self.events.write().push(event);
    }
}
