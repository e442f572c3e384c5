//! Controller runner - wires the watch streams to the reconcilers.
//!
//! Two independent controllers mirror the two work queues: one keyed by
//! cluster, one keyed by pod. The runtime provides the queue contract the
//! reconcilers rely on: per-key serialization with coalescing, owner-ref
//! resolution for StatefulSet events, and resync suppression.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::controller;
use kube::runtime::watcher;
use kube::runtime::Controller;
use kube::{Api, Client};
use tracing::{debug, error, info};

use crate::controller::{cluster, pod, Context};
use m3db_common::crd::M3DBCluster;
use m3db_common::labels;

/// Run both controllers until shutdown.
///
/// `workers` bounds how many reconciliations run concurrently per
/// controller; per-key serialization holds regardless.
pub async fn run_controllers(client: Client, ctx: Arc<Context>, workers: u16) {
    let clusters: Api<M3DBCluster> = Api::all(client.clone());
    let statefulsets: Api<StatefulSet> = Api::all(client.clone());
    let pods: Api<Pod> = Api::all(client);

    let member_selector = format!("{}={}", labels::APP, labels::APP_VALUE);
    let config = controller::Config::default().concurrency(workers);

    info!("starting M3DB operator controllers");
    info!("- M3DBCluster controller");
    info!("- Pod controller");

    // StatefulSet events resolve through their controller owner reference
    // to the owning cluster key; unowned sets are ignored.
    let cluster_controller = Controller::new(clusters, watcher::Config::default())
        .owns(
            statefulsets,
            watcher::Config::default().labels(&member_selector),
        )
        .with_config(config.clone())
        .shutdown_on_signal()
        .run(cluster::reconcile, cluster::error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    debug!(cluster = %obj.name, ?action, "cluster reconciliation completed")
                }
                Err(e) => error!(error = %e, "cluster reconciliation error"),
            }
        });

    let pod_controller = Controller::new(
        pods,
        watcher::Config::default().labels(&member_selector),
    )
    .with_config(config)
    .shutdown_on_signal()
    .run(pod::reconcile, pod::error_policy, ctx)
    .for_each(|result| async move {
        match result {
            Ok((obj, action)) => debug!(pod = %obj.name, ?action, "pod reconciliation completed"),
            Err(e) => error!(error = %e, "pod reconciliation error"),
        }
    });

    tokio::select! {
        _ = cluster_controller => info!("cluster controller completed"),
        _ = pod_controller => info!("pod controller completed"),
    }
}
