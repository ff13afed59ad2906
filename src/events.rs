//! Kubernetes Event recording for the bucket reconcilers.
//!
//! Wraps `kube::runtime::events::Recorder` behind a trait so reconcilers can
//! emit Events visible via `kubectl describe bucketclaim ...` while tests run
//! against a no-op or recording implementation.
//!
//! Events are fire-and-forget: failures are logged and never returned. A
//! failed event must never fail a reconcile.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Publishes Kubernetes Events against bucket resources
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event on the referenced object
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by the API server
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str, instance: Option<String>) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance,
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
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Publisher that drops every event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reasons (REASON column of `kubectl get events`)
pub mod reasons {
    /// Backend bucket created for a claim
    pub const BUCKET_PROVISIONED: &str = "BucketProvisioned";
    /// Backend bucket creation failed
    pub const PROVISIONING_FAILED: &str = "ProvisioningFailed";
    /// Backend bucket deleted after claim removal
    pub const BUCKET_DELETED: &str = "BucketDeleted";
    /// Backend bucket kept after claim removal (Retain policy)
    pub const BUCKET_RETAINED: &str = "BucketRetained";
    /// Backend access granted and credentials stored
    pub const ACCESS_GRANTED: &str = "AccessGranted";
    /// Backend access grant failed
    pub const ACCESS_FAILED: &str = "AccessFailed";
    /// Backend access revoked after access removal
    pub const ACCESS_REVOKED: &str = "AccessRevoked";
    /// Best-effort teardown step failed
    pub const CLEANUP_FAILED: &str = "CleanupFailed";
    /// Spec is invalid and will not be retried until it changes
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
}

/// Event actions (ACTION column of `kubectl get events`)
pub mod actions {
    /// Bucket creation
    pub const PROVISION: &str = "Provision";
    /// Access grant
    pub const GRANT: &str = "Grant";
    /// Teardown of a deleted object
    pub const DELETE: &str = "Delete";
}
