//! # Events
//!
//! Human-readable Kubernetes Events emitted on Apps, e.g. after a value
//! object change was propagated or when a pass was cancelled.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use std::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSeverity {
    Normal,
    Warning,
}

/// Event about one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorEvent {
    pub severity: EventSeverity,
    /// CamelCase reason, e.g. `ConfigMapChanged`
    pub reason: String,
    /// What the operator did, e.g. `Propagate`
    pub action: String,
    pub note: Option<String>,
}

impl OperatorEvent {
    pub fn normal(reason: &str, action: &str, note: impl Into<String>) -> Self {
        Self {
            severity: EventSeverity::Normal,
            reason: reason.to_string(),
            action: action.to_string(),
            note: Some(note.into()),
        }
    }

    pub fn warning(reason: &str, action: &str, note: impl Into<String>) -> Self {
        Self {
            severity: EventSeverity::Warning,
            reason: reason.to_string(),
            action: action.to_string(),
            note: Some(note.into()),
        }
    }
}

/// Sink for events; publishing never fails the caller
#[async_trait]
pub trait EventPublisher: Send + Sync + std::fmt::Debug {
    async fn publish(&self, target: &ObjectReference, event: OperatorEvent);
}

/// Publishes through the events.k8s.io API
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl std::fmt::Debug for KubeEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEventPublisher").finish_non_exhaustive()
    }
}

impl KubeEventPublisher {
    #[must_use]
    pub fn new(client: Client, instance: Option<String>) -> Self {
        let reporter = Reporter {
            controller: crate::constants::OPERATOR_NAME.to_string(),
            instance,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(&self, target: &ObjectReference, event: OperatorEvent) {
        let kube_event = Event {
            type_: match event.severity {
                EventSeverity::Normal => EventType::Normal,
                EventSeverity::Warning => EventType::Warning,
            },
            reason: event.reason.clone(),
            note: event.note.clone(),
            action: event.action.clone(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&kube_event, target).await {
            warn!(
                reason = event.reason.as_str(),
                object = target.name.as_deref().unwrap_or("unknown"),
                error = %e,
                "Failed to publish event"
            );
        }
    }
}

/// Keeps events in memory; used when no cluster is available
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<(ObjectReference, OperatorEvent)>>,
}

impl RecordingPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event published so far
    #[must_use]
    pub fn events(&self) -> Vec<(ObjectReference, OperatorEvent)> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, target: &ObjectReference, event: OperatorEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push((target.clone(), event));
        }
    }
}
