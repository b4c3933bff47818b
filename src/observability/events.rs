//! # Events
//!
//! Notification sink for steps (drift triggered, configuration patched). The
//! runner never records events itself. Publishing failures are logged and
//! swallowed: an event is never worth failing a reconciliation over.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use std::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Normal,
    Warning,
}

impl From<Severity> for EventType {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Normal => EventType::Normal,
            Severity::Warning => EventType::Warning,
        }
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(
        &self,
        object: &ObjectReference,
        severity: Severity,
        reason: &str,
        message: &str,
    );
}

/// Publishes Kubernetes events through a `kube` [`Recorder`]
#[derive(Clone)]
pub struct KubeEventSink {
    recorder: Recorder,
}

impl std::fmt::Debug for KubeEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEventSink").finish_non_exhaustive()
    }
}

impl KubeEventSink {
    pub fn new(client: Client, controller: &str) -> Self {
        let reporter = Reporter {
            controller: controller.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn record(
        &self,
        object: &ObjectReference,
        severity: Severity,
        reason: &str,
        message: &str,
    ) {
        let event = Event {
            type_: severity.into(),
            reason: reason.to_string(),
            note: Some(message.to_string()),
            action: reason.to_string(),
            secondary: None,
        };
        match self.recorder.publish(&event, object).await {
            Ok(()) => debug!(reason, object.name = ?object.name, "event.published"),
            Err(e) => warn!(reason, object.name = ?object.name, error = %e, "event.publish_failed"),
        }
    }
}

/// One captured event
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub object: ObjectReference,
    pub severity: Severity,
    pub reason: String,
    pub message: String,
}

/// Keeps events in memory
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn with_reason(&self, reason: &str) -> Vec<RecordedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.reason == reason)
            .collect()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn record(
        &self,
        object: &ObjectReference,
        severity: Severity,
        reason: &str,
        message: &str,
    ) {
        let event = RecordedEvent {
            object: object.clone(),
            severity,
            reason: reason.to_string(),
            message: message.to_string(),
        };
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(e) => warn!(error = %e, "event sink lock poisoned, dropping event"),
        }
    }
}
