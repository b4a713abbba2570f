//! Kubernetes Event emission
//!
//! Events are fire-and-forget. A failed publish is logged and never changes
//! the outcome of a reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Client;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
#[cfg(test)]
use mockall::automock;
use tracing::warn;

/// Event reasons
pub mod reasons {
    pub const RECONCILE_SUCCEEDED: &str = "ReconcileSucceeded";
    pub const RECONCILE_FAIL: &str = "ReconcileFail";
    pub const REQUEUE: &str = "Requeue";
    pub const INSTALLATION: &str = "Installation";
    pub const ERR_INSTALLATION: &str = "ErrInstallation";
    pub const UPGRADE: &str = "Upgrading";
    pub const ERR_UPGRADE: &str = "ErrUpgrade";
    pub const DELETION: &str = "Deinstallation";
    pub const ERR_DELETION: &str = "ErrDeinstallation";
    pub const VOLUME_EXPANSION: &str = "VolumeExpansion";
    pub const RESTART: &str = "Restart";
    pub const DOGU_NOT_FOUND: &str = "DoguNotFound";
    pub const GET_DOGU_FAILED: &str = "FailedGetDogu";
    pub const STOP_FAILED: &str = "FailedStop";
    pub const START_FAILED: &str = "FailedStart";
    pub const SUPPORT: &str = "Support";
    pub const EXPORT: &str = "ExportMode";
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        object: &ObjectReference,
        type_: EventType,
        reason: &str,
        message: String,
    );
}

/// [`EventPublisher`] backed by the events.k8s.io API
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
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
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        object: &ObjectReference,
        type_: EventType,
        reason: &str,
        message: String,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(message),
            action: reason.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, object).await {
            warn!(error = %e, reason, "failed to publish event");
        }
    }
}

/// Discards all events
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(&self, _: &ObjectReference, _: EventType, _: &str, _: String) {}
}
