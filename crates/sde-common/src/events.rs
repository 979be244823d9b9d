//! Kubernetes Events emitted on `Sde` resources
//!
//! Events show up under `kubectl describe sde <name>`. Publishing is best
//! effort: a rejected Event is logged and the pass carries on.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

use crate::FIELD_MANAGER;

/// Reasons attached to Sde events
pub mod reasons {
    /// The cleanup script ConfigMap was created
    pub const SCRIPT_CONFIG_CREATED: &str = "ScriptConfigCreated";
    /// The cleanup Job was created
    pub const CLEANUP_JOB_CREATED: &str = "CleanupJobCreated";
    /// The cleanup Job reported failure and will be recreated
    pub const CLEANUP_JOB_FAILED: &str = "CleanupJobFailed";
    /// The cleanup Job finished
    pub const CLEANUP_COMPLETED: &str = "CleanupCompleted";
    /// Surplus databases were dropped in-process
    pub const DATABASES_DROPPED: &str = "DatabasesDropped";
    /// A direct cleanup pass failed
    pub const CLEANUP_FAILED: &str = "CleanupFailed";
}

/// Actions attached to Sde events
pub mod actions {
    /// Creating the script ConfigMap or the cleanup Job
    pub const PROVISION: &str = "Provision";
    /// Retiring databases
    pub const CLEANUP: &str = "Cleanup";
}

/// Informational event
pub fn normal(reason: &str, action: &str, note: impl Into<String>) -> Event {
    event(EventType::Normal, reason, action, note.into())
}

/// Event flagging a failure the operator will retry
pub fn warning(reason: &str, action: &str, note: impl Into<String>) -> Event {
    event(EventType::Warning, reason, action, note.into())
}

fn event(type_: EventType, reason: &str, action: &str, note: String) -> Event {
    Event {
        type_,
        reason: reason.to_string(),
        note: Some(note),
        action: action.to_string(),
        secondary: None,
    }
}

/// Sink for events about an Sde
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Record `event` against `regarding`
    async fn publish(&self, regarding: &ObjectReference, event: Event);
}

/// Publishes through the events.k8s.io API as `sde-controller`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// `POD_NAME`, when set, identifies the reporting replica
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: FIELD_MANAGER.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(&self, regarding: &ObjectReference, event: Event) {
        if let Err(e) = self.recorder.publish(&event, regarding).await {
            warn!(
                reason = %event.reason,
                object = ?regarding.name,
                error = %e,
                "Dropping Sde event"
            );
        }
    }
}

/// Discards every event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(&self, _regarding: &ObjectReference, _event: Event) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_failure_is_a_warning_with_its_message() {
        let event = warning(
            reasons::CLEANUP_JOB_FAILED,
            actions::CLEANUP,
            "Job staging-db-cleanup failed: BackoffLimitExceeded",
        );
        assert_eq!(event.type_, EventType::Warning);
        assert_eq!(event.reason, "CleanupJobFailed");
        assert_eq!(event.action, "Cleanup");
        assert_eq!(
            event.note.as_deref(),
            Some("Job staging-db-cleanup failed: BackoffLimitExceeded")
        );
        assert!(event.secondary.is_none());
    }

    #[test]
    fn provisioning_events_are_normal() {
        let event = normal(
            reasons::SCRIPT_CONFIG_CREATED,
            actions::PROVISION,
            String::from("Created ConfigMap staging-run-scripts"),
        );
        assert_eq!(event.type_, EventType::Normal);
        assert_eq!(event.reason, "ScriptConfigCreated");
    }
}
