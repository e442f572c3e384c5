//! Pod identity: the stable name a DB instance keeps across pod re-creations.
//!
//! Identity is computed from a small closed set of sources configured on the
//! cluster; the pod name always contributes. The DB reads the serialized
//! identity at startup (via a mounted identity file) so that a pod re-created
//! on the same host is treated as the same instance when the configured
//! sources say so. Serialization is canonical - fixed field order, absent
//! fields omitted - so equality on the annotation string is reliable.

use k8s_openapi::api::core::v1::{Node, Pod};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};

use m3db_common::crd::{M3DBCluster, PodIdentitySource};
use m3db_common::{Error, Result};

/// A pod's identity record. Field order is the canonical serialization order.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PodIdentity {
    /// Pod name; always present
    pub name: String,

    /// Pod UID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// Name of the node the pod is scheduled on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,

    /// The node's external address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_external_id: Option<String>,

    /// The node's cloud provider id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_provider_id: Option<String>,
}

/// Effective identity sources for a cluster.
///
/// Choosing none defaults to the pod UID (plus the always-present name),
/// which makes every re-created pod a new instance.
pub fn effective_sources(cluster: &M3DBCluster) -> Vec<PodIdentitySource> {
    cluster
        .spec
        .pod_identity_config
        .as_ref()
        .map(|c| c.sources.clone())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| vec![PodIdentitySource::PodUid])
}

/// Whether any configured source needs a Node object to resolve
pub fn sources_require_node(sources: &[PodIdentitySource]) -> bool {
    sources.iter().any(|s| {
        matches!(
            s,
            PodIdentitySource::NodeExternalId | PodIdentitySource::NodeProviderId
        )
    })
}

/// Compute a pod's identity from the cluster's configured sources.
///
/// `node` must be supplied when [`sources_require_node`] says so; it is
/// ignored otherwise.
pub fn identity_for_pod(
    cluster: &M3DBCluster,
    pod: &Pod,
    node: Option<&Node>,
) -> Result<PodIdentity> {
    let mut identity = PodIdentity {
        name: pod.name_any(),
        ..Default::default()
    };

    for source in effective_sources(cluster) {
        match source {
            PodIdentitySource::PodUid => {
                identity.uid = Some(pod.uid().ok_or_else(|| {
                    Error::internal_with_context("pod-identity", "pod has no uid")
                })?);
            }
            PodIdentitySource::NodeName => {
                identity.node_name = pod.spec.as_ref().and_then(|s| s.node_name.clone());
            }
            PodIdentitySource::NodeExternalId => {
                let node = node.ok_or_else(|| {
                    Error::internal_with_context("pod-identity", "node required for external id")
                })?;
                identity.node_external_id = node_external_id(node);
            }
            PodIdentitySource::NodeProviderId => {
                let node = node.ok_or_else(|| {
                    Error::internal_with_context("pod-identity", "node required for provider id")
                })?;
                identity.node_provider_id =
                    node.spec.as_ref().and_then(|s| s.provider_id.clone());
            }
        }
    }

    Ok(identity)
}

/// The node's external identifier: its first ExternalIP address
fn node_external_id(node: &Node) -> Option<String> {
    node.status
        .as_ref()
        .and_then(|s| s.addresses.as_ref())
        .and_then(|addrs| {
            addrs
                .iter()
                .find(|a| a.type_ == "ExternalIP")
                .map(|a| a.address.clone())
        })
}

/// Canonical JSON serialization of an identity
pub fn identity_json(identity: &PodIdentity) -> Result<String> {
    serde_json::to_string(identity).map_err(|e| Error::serialization(e.to_string()))
}
