//! Diagnostic events attached to managed resources.

use crate::k8s::{
    events::{Event, EventType, Recorder, Reporter},
    Client, ObjectReference,
};

pub const FAILED_TO_CREATE: &str = "FailedToCreateVirtualService";
pub const FAILED_TO_UPDATE: &str = "FailedToUpdateVirtualService";

const REPORTER: &str = "virtualservice-controller";

/// Records user-visible events. Recording never fails the caller.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync + 'static {
    async fn record(
        &self,
        object: &ObjectReference,
        type_: EventType,
        reason: &str,
        message: String,
    );
}

/// Publishes events to the API server through a [`Recorder`].
pub struct KubeEventSink {
    recorder: Recorder,
}

// === impl KubeEventSink ===

impl KubeEventSink {
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: REPORTER.to_string(),
            instance: std::env::var("HOSTNAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait::async_trait]
impl EventSink for KubeEventSink {
    async fn record(
        &self,
        object: &ObjectReference,
        type_: EventType,
        reason: &str,
        message: String,
    ) {
        let namespace = object.namespace.as_deref().unwrap_or_default();
        let name = object.name.as_deref().unwrap_or_default();
        match type_ {
            EventType::Warning => tracing::warn!(%namespace, %name, %reason, "{message}"),
            EventType::Normal => tracing::info!(%namespace, %name, %reason, "{message}"),
        }

        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(message),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        if let Err(error) = self.recorder.publish(&event, object).await {
            tracing::warn!(%namespace, %name, %reason, %error, "Failed to publish event");
        }
    }
}
