//! Pod reconciliation: sticky identity annotations.
//!
//! Every pod labeled as a cluster member gets its computed identity
//! annotated exactly once. The annotation is what the DB reads at startup,
//! so a pod re-created on the same host keeps its instance identity when
//! the configured sources say so. Identity is sticky: once annotated it is
//! never rewritten, and what happens on a mismatch is the cluster's
//! configured policy.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{error, info, warn};

use super::Context;
use crate::placement::instance_for_pod;
use crate::podidentity;
use m3db_common::crd::{M3DBCluster, MismatchPolicy};
use m3db_common::events::reasons;
use m3db_common::{labels, Error, Result};

/// Reconcile one pod.
///
/// Pods without the cluster label are not ours: dropped without any call.
pub async fn reconcile(pod: Arc<Pod>, ctx: Arc<Context>) -> Result<Action> {
    let key = pod_key(&pod);
    match reconcile_pod(&pod, &ctx).await {
        Ok(action) => {
            ctx.backoff.forget(&key);
            Ok(action)
        }
        Err(err) => Err(err),
    }
}

/// Requeue behavior after a failed pod tick
pub fn error_policy(pod: Arc<Pod>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = pod_key(&pod);
    error!(pod = %pod.name_any(), error = %error, "pod reconciliation failed");
    if error.is_retryable() {
        Action::requeue(ctx.backoff.next_delay(&key))
    } else {
        Action::await_change()
    }
}

fn pod_key(pod: &Pod) -> String {
    format!("{}/{}", pod.namespace().unwrap_or_default(), pod.name_any())
}

async fn reconcile_pod(pod: &Pod, ctx: &Context) -> Result<Action> {
    // Orphan pods (no cluster label) are silently dropped.
    let Some(cluster_name) = pod.labels().get(labels::CLUSTER).cloned() else {
        return Ok(Action::await_change());
    };

    let pod_name = pod.name_any();
    let namespace = pod
        .namespace()
        .ok_or_else(|| Error::internal_with_context("pod-handler", "pod has no namespace"))?;

    let cluster = ctx
        .kube
        .get_cluster(&namespace, &cluster_name)
        .await?
        .ok_or_else(|| {
            Error::internal_with_context(
                "pod-handler",
                format!("parent cluster {cluster_name} not found for pod {pod_name}"),
            )
        })?;

    let sources = podidentity::effective_sources(&cluster);
    let node = if podidentity::sources_require_node(&sources) {
        let node_name = pod
            .spec
            .as_ref()
            .and_then(|s| s.node_name.clone())
            .ok_or_else(|| {
                Error::internal_with_context(
                    "pod-handler",
                    format!("pod {pod_name} not yet scheduled, no node to resolve identity from"),
                )
            })?;
        ctx.kube.get_node(&node_name).await?
    } else {
        None
    };

    let identity = podidentity::identity_for_pod(&cluster, pod, node.as_ref())?;
    let identity_json = podidentity::identity_json(&identity)?;

    if let Some(current) = pod
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(labels::ANNOTATION_POD_IDENTITY))
    {
        if *current != identity_json {
            return handle_mismatch(pod, &cluster, current, &identity_json, ctx).await;
        }
        return Ok(Action::await_change());
    }

    info!(pod = %pod_name, identity = %identity_json, "annotating pod identity");
    let mut updated = pod.clone();
    updated
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(labels::ANNOTATION_POD_IDENTITY.to_string(), identity_json);
    ctx.kube.update_pod(&namespace, &updated).await?;

    Ok(Action::await_change())
}

/// Apply the cluster's mismatch policy.
///
/// The annotation itself is never rewritten either way: `warn` only logs,
/// `replace` swaps the instance in the DB placement so the pod rejoins
/// under its new identity.
async fn handle_mismatch(
    pod: &Pod,
    cluster: &M3DBCluster,
    current: &str,
    computed: &str,
    ctx: &Context,
) -> Result<Action> {
    let pod_name = pod.name_any();
    warn!(
        pod = %pod_name,
        current = %current,
        computed = %computed,
        "pod identity mismatch"
    );
    ctx.warn_event(
        cluster,
        reasons::POD_IDENTITY_MISMATCH,
        format!("pod {pod_name} identity differs from its annotation"),
    )
    .await;

    let policy = cluster
        .spec
        .pod_identity_config
        .as_ref()
        .map(|c| c.mismatch_policy)
        .unwrap_or_default();

    match policy {
        MismatchPolicy::Warn => Ok(Action::await_change()),
        MismatchPolicy::Replace => {
            let namespace = cluster.namespace().ok_or_else(|| {
                Error::internal_with_context("pod-handler", "cluster has no namespace")
            })?;
            let candidate = instance_for_pod(cluster, pod)?;
            info!(pod = %pod_name, "replacing placement instance for re-identified pod");
            ctx.admin
                .placement_client(&cluster.name_any(), &namespace)?
                .replace(&pod_name, candidate)
                .await?;
            Ok(Action::await_change())
        }
    }
}
