use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tracing::warn;

/// Publishes Kubernetes events about reconciled objects.
/// Publishing is best effort; failures are logged and dropped.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn warn(&self, reference: &ObjectReference, reason: &str, note: &str);

    async fn normal(&self, reference: &ObjectReference, reason: &str, note: &str);
}

pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl KubeEventRecorder {
    pub fn new(client: Client) -> Self {
        Self {
            recorder: Recorder::new(client, "nodepool-controller".into()),
        }
    }

    async fn publish(&self, reference: &ObjectReference, type_: EventType, reason: &str, note: &str) {
        let event = Event {
            type_,
            reason: reason.into(),
            note: Some(note.into()),
            action: "Reconcile".into(),
            secondary: None,
        };
        if let Err(err) = self.recorder.publish(&event, reference).await {
            warn!("failed to publish {reason} event: {err}");
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn warn(&self, reference: &ObjectReference, reason: &str, note: &str) {
        self.publish(reference, EventType::Warning, reason, note).await
    }

    async fn normal(&self, reference: &ObjectReference, reason: &str, note: &str) {
        self.publish(reference, EventType::Normal, reason, note).await
    }
}
