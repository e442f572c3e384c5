//! Controllers reconciling M3DBCluster resources and their member pods

pub mod cluster;
pub mod pod;

use std::sync::Arc;

use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};

use crate::backoff::BackoffTracker;
use crate::k8s::{KubeClient, KubeClientImpl};
use m3db_admin::{AdminClientRegistry, ClientProvider};
use m3db_common::crd::M3DBCluster;
use m3db_common::events::{EventPublisher, KubeEventPublisher};

/// Name this controller reports as on Events it emits
pub const CONTROLLER_NAME: &str = "m3db-controller";

/// Shared state for all reconcilers.
///
/// Holds the clients that are expensive to create; reconcile ticks only
/// ever borrow it.
pub struct Context {
    /// Kubernetes operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Per-cluster admin clients
    pub admin: Arc<dyn ClientProvider>,
    /// Kubernetes Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Per-key requeue backoff, reset on success
    pub backoff: BackoffTracker,
}

impl Context {
    /// Create the production context
    pub fn new(client: Client, admin: Arc<AdminClientRegistry>) -> Self {
        Self {
            kube: Arc::new(KubeClientImpl::new(client.clone())),
            admin,
            events: Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME)),
            backoff: BackoffTracker::default(),
        }
    }

    /// Create a context with mock clients for unit tests
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        admin: Arc<dyn ClientProvider>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            kube,
            admin,
            events,
            backoff: BackoffTracker::default(),
        }
    }

    /// Emit a Warning event on a cluster
    pub async fn warn_event(&self, cluster: &M3DBCluster, reason: &str, note: impl Into<String>) {
        self.events
            .publish(
                &cluster_ref(cluster),
                EventType::Warning,
                reason,
                Some(note.into()),
            )
            .await;
    }

    /// Emit a Normal event on a cluster
    pub async fn normal_event(&self, cluster: &M3DBCluster, reason: &str, note: impl Into<String>) {
        self.events
            .publish(
                &cluster_ref(cluster),
                EventType::Normal,
                reason,
                Some(note.into()),
            )
            .await;
    }
}

fn cluster_ref(cluster: &M3DBCluster) -> ObjectReference {
    cluster.object_ref(&())
}

/// The `<namespace>/<name>` key a cluster's work is serialized under
pub fn cluster_key(cluster: &M3DBCluster) -> String {
    format!(
        "{}/{}",
        cluster.namespace().unwrap_or_default(),
        cluster.name_any()
    )
}
