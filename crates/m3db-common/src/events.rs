//! Kubernetes Event recording for the operator's controllers.
//!
//! Provides a trait-based abstraction over `kube::runtime::events::Recorder`
//! so controllers can emit standard Kubernetes Events visible via
//! `kubectl describe` and `kubectl get events`.
//!
//! Events are **fire-and-forget**: failures are logged as warnings and never
//! propagate errors. A failed event must never break reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
///
/// Implementations are expected to be fire-and-forget: `publish()` logs a
/// warning on failure but never returns an error.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a Kubernetes Event on the given resource.
    ///
    /// # Arguments
    ///
    /// * `resource_ref` - The Kubernetes object this event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason string (e.g. "FailedToUpdate")
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    client: Client,
    reporter: Reporter,
}

impl KubeEventPublisher {
    /// Create a new publisher for the given controller name.
    ///
    /// The controller name appears as the "reportingComponent" on Events
    /// (e.g. "m3db-controller").
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self { client, reporter }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: actions::RECONCILE.to_string(),
            secondary: None,
        };
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), resource_ref.clone());
        if let Err(e) = recorder.publish(event).await {
            warn!(reason, error = %e, "failed to publish Kubernetes event");
        }
    }
}

/// No-op implementation for tests.
///
/// All calls are silently ignored - no Kubernetes API interaction.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _note: Option<String>,
    ) {
        // intentionally empty
    }
}

/// Well-known event reason strings.
///
/// These appear in `kubectl get events` under the REASON column.
pub mod reasons {
    /// Cluster converged; nothing left to do this tick
    pub const SUCCESSFUL_UPDATE: &str = "SuccessfulUpdate";
    /// A platform or admin mutation failed
    pub const FAILED_TO_UPDATE: &str = "FailedToUpdate";
    /// Spec has no isolation groups
    pub const ISOLATION_GROUPS_MISSING: &str = "IsolationGroupsMissing";
    /// Spec replication factor doesn't match isolation-group count
    pub const INVALID_REPLICATION_FACTOR: &str = "InvalidReplicationFactor";
    /// Spec shard count is not positive
    pub const INVALID_NUMBER_OF_SHARDS: &str = "InvalidNumberOfShards";
    /// Placement instances are taking longer than usual to become available
    pub const LONGER_THAN_USUAL: &str = "LongerThanUsual";
    /// Pod identity differs from the sticky annotated identity
    pub const POD_IDENTITY_MISMATCH: &str = "PodIdentityMismatch";
    /// Catch-all for warnings with no more specific reason
    pub const UNKNOWN: &str = "Unknown";
}

/// Well-known event action strings.
pub mod actions {
    /// Standard reconciliation loop
    pub const RECONCILE: &str = "Reconcile";
}
