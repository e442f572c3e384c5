//! Placement coordination: deriving admin API payloads from observed pods.
//!
//! Everything here is deterministic in the observed pod set and the spec, so
//! the same tick against the same world always issues the same admin request.

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use m3db_admin::placement::{InitRequest, Instance, Placement};
use m3db_common::crd::M3DBCluster;
use m3db_common::{labels, Error, Result, PORT_CLIENT};

/// Placement weight applied when the spec does not override it
pub const DEFAULT_INSTANCE_WEIGHT: u32 = 100;

/// Derive the placement instance a pod will join as.
///
/// Instance id is the pod name; endpoint and hostname use the pod's stable
/// DNS name under the cluster's headless service.
pub fn instance_for_pod(cluster: &M3DBCluster, pod: &Pod) -> Result<Instance> {
    let pod_name = pod.name_any();
    let isolation_group = pod
        .labels()
        .get(labels::ISOLATION_GROUP)
        .cloned()
        .ok_or_else(|| {
            Error::internal_with_context(
                "placement",
                format!("pod {pod_name} has no isolation-group label"),
            )
        })?;

    let namespace = pod.namespace().ok_or_else(|| {
        Error::internal_with_context("placement", format!("pod {pod_name} has no namespace"))
    })?;
    let hostname = format!("{}.{}.{}", pod_name, cluster.node_service_name(), namespace);

    Ok(Instance {
        id: pod_name,
        isolation_group: isolation_group.clone(),
        zone: isolation_group,
        weight: cluster.spec.instance_weight.unwrap_or(DEFAULT_INSTANCE_WEIGHT),
        endpoint: format!("{}:{}", hostname, PORT_CLIENT),
        hostname,
        port: PORT_CLIENT as u32,
        ..Default::default()
    })
}

/// Build the placement init request from the full observed pod set
pub fn init_request(cluster: &M3DBCluster, pods: &[Pod]) -> Result<InitRequest> {
    let mut instances = pods
        .iter()
        .map(|p| instance_for_pod(cluster, p))
        .collect::<Result<Vec<_>>>()?;
    instances.sort_by(|a, b| a.id.cmp(&b.id));

    Ok(InitRequest {
        instances,
        replication_factor: cluster.spec.replication_factor,
        num_shards: cluster.spec.number_of_shards,
    })
}

/// Pods in the given isolation group that are absent from the placement,
/// in name order
pub fn pods_to_add<'a>(
    pods: &'a [Pod],
    placement: &Placement,
    isolation_group: &str,
) -> Vec<&'a Pod> {
    let mut missing: Vec<&Pod> = pods
        .iter()
        .filter(|p| {
            p.labels().get(labels::ISOLATION_GROUP).map(String::as_str) == Some(isolation_group)
        })
        .filter(|p| !placement.instances.contains_key(&p.name_any()))
        .collect();
    missing.sort_by_key(|p| p.name_any());
    missing
}

/// The instance to remove when shrinking a group: the one backed by the
/// highest-ordinal pod.
///
/// StatefulSets scale down from the highest ordinal, so removing that
/// instance from the placement first means the placement removal and the
/// eventual pod deletion agree on which instance goes.
pub fn shrink_candidate<'a>(placement: &'a Placement, isolation_group: &'a str) -> Option<&'a str> {
    placement
        .instances_in_group(isolation_group)
        .max_by_key(|i| pod_ordinal(&i.id).unwrap_or(0))
        .map(|i| i.id.as_str())
}

/// Ordinal suffix of a StatefulSet pod name (`cluster-1-2` -> 2)
fn pod_ordinal(name: &str) -> Option<u32> {
    name.rsplit('-').next()?.parse().ok()
}
