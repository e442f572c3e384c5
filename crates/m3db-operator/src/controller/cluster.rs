//! M3DBCluster reconciliation: the cluster state machine.
//!
//! Each tick observes the world, decides the single next action toward the
//! declared topology, commits it, and returns. Event-driven re-entry
//! carries the remaining work: every mutation produces a watch event that
//! re-enqueues the cluster. Ordering is what makes this correct - services
//! before StatefulSets, bootstrap completion before placement changes, and
//! placement updates before shrinks.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{error, info, instrument, warn};

use super::{cluster_key, Context};
use crate::k8s::resources;
use crate::{namespaces, placement};
use m3db_common::crd::{
    ClusterState, ConditionStatus, M3DBCluster, M3DBClusterStatus,
    CONDITION_PLACEMENT_INITIALIZED, CONDITION_PODS_BOOTSTRAPPING,
};
use m3db_common::events::reasons;
use m3db_common::{labels, Error, Result};

/// Reconcile one M3DBCluster.
///
/// Success forgets the key's backoff state; admin failures additionally
/// emit a `FailedToUpdate` warning event before propagating to the error
/// policy.
pub async fn reconcile(cluster: Arc<M3DBCluster>, ctx: Arc<Context>) -> Result<Action> {
    let key = cluster_key(&cluster);
    match reconcile_cluster(&cluster, &ctx).await {
        Ok(action) => {
            ctx.backoff.forget(&key);
            Ok(action)
        }
        Err(err) => {
            if matches!(err, Error::Admin { .. }) {
                ctx.warn_event(&cluster, reasons::FAILED_TO_UPDATE, err.to_string())
                    .await;
            }
            Err(err)
        }
    }
}

/// Decide the requeue behavior after a failed tick.
///
/// Retryable errors requeue with per-key exponential backoff; anything else
/// waits for a spec change.
pub fn error_policy(cluster: Arc<M3DBCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = cluster_key(&cluster);
    error!(cluster = %cluster.name_any(), error = %error, "cluster reconciliation failed");
    if error.is_retryable() {
        Action::requeue(ctx.backoff.next_delay(&key))
    } else {
        Action::await_change()
    }
}

#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any()))]
async fn reconcile_cluster(cluster: &M3DBCluster, ctx: &Context) -> Result<Action> {
    let name = cluster.name_any();
    let namespace = cluster
        .namespace()
        .ok_or_else(|| Error::internal_with_context("reconciler", "cluster has no namespace"))?;

    // Headless service MUST exist before the StatefulSets that reference it.
    if ensure_services(cluster, ctx, &namespace).await? {
        return Ok(Action::await_change());
    }

    if cluster.spec.isolation_groups.is_empty() {
        warn!("cluster has no isolation groups, nothing to converge");
        ctx.warn_event(
            cluster,
            reasons::ISOLATION_GROUPS_MISSING,
            format!("cluster {name} has no isolation groups"),
        )
        .await;
        return Ok(Action::await_change());
    }

    if let Err(err) = cluster.spec.validate(&name) {
        warn!(error = %err, "invalid cluster spec");
        ctx.warn_event(cluster, reasons::UNKNOWN, err.to_string()).await;
        return Ok(Action::await_change());
    }

    // Sorted order gives groups a stable index, which is what numbers the
    // StatefulSets.
    let iso_groups = cluster.spec.sorted_isolation_groups();

    let children = ctx.kube.list_child_statefulsets(cluster).await?;

    // Readiness gate: ready == bootstrapped. No topology change while any
    // group is mid-bootstrap; the next pod event re-enters the loop.
    for set in &children {
        if let Some(declared) = set.spec.as_ref().and_then(|s| s.replicas) {
            let ready = set
                .status
                .as_ref()
                .and_then(|s| s.ready_replicas)
                .unwrap_or(0);
            if declared != ready {
                info!(set = %set.name_any(), declared, ready, "waiting for statefulset to be ready");
                return Ok(Action::await_change());
            }
        }
    }

    // One group per tick, in sorted-group order.
    if children.len() < iso_groups.len() {
        let index = children.len();
        let group = &iso_groups[index];
        let set = resources::generate_statefulset(cluster, group, index)?;
        ctx.kube.create_statefulset(&namespace, &set).await?;
        info!(set = %set.name_any(), group = %group.name, "created statefulset");
        return Ok(Action::await_change());
    }

    match namespaces::reconcile_namespaces(
        cluster,
        ctx.admin.namespace_client(&name, &namespace)?.as_ref(),
    )
    .await
    {
        Ok(true) => return Ok(Action::await_change()),
        Ok(false) => {}
        Err(err @ Error::Validation { .. }) => {
            warn!(error = %err, "invalid namespace spec");
            ctx.warn_event(cluster, reasons::UNKNOWN, err.to_string()).await;
            return Ok(Action::await_change());
        }
        Err(err) => return Err(err),
    }

    if cluster.spec.namespaces.is_empty() {
        warn!("cluster has no namespaces defined");
        ctx.warn_event(
            cluster,
            reasons::UNKNOWN,
            format!("cluster {name} has no namespaces"),
        )
        .await;
    }

    let status = cluster.status_or_default();
    let placement_client = ctx.admin.placement_client(&name, &namespace)?;

    if !status.has_initialized_placement() {
        if let Err(err) = cluster.spec.validate_placement(&name) {
            let reason = if cluster.spec.number_of_shards <= 0 {
                reasons::INVALID_NUMBER_OF_SHARDS
            } else {
                reasons::INVALID_REPLICATION_FACTOR
            };
            warn!(error = %err, "spec cannot initialize a placement");
            ctx.warn_event(cluster, reason, err.to_string()).await;
            return Ok(Action::await_change());
        }

        let pods = ctx.kube.list_cluster_pods(cluster).await?;
        let request = placement::init_request(cluster, &pods)?;
        let num_instances = request.instances.len();
        placement_client.init(request).await?;

        let mut updated = cluster.clone();
        let mut status = updated.status_or_default();
        status.set_condition(
            CONDITION_PLACEMENT_INITIALIZED,
            ConditionStatus::True,
            "PlacementCreated",
            format!("placement initialized with {num_instances} instances"),
        );
        status.state = ClusterState::Yellow;
        status.message = Some("placement initialized, waiting for bootstrap".to_string());
        updated.status = Some(status);
        ctx.kube.update_cluster_status(&updated).await?;

        info!(instances = num_instances, "initialized placement");
        return Ok(Action::await_change());
    }

    let db_placement = placement_client.get().await?;
    info!(
        instances = db_placement.num_instances(),
        version = db_placement.version,
        "found placement"
    );

    // Availability gate: no topology change while any instance is still
    // bootstrapping or draining.
    let unavailable = db_placement.unavailable_instances();
    if !unavailable.is_empty() {
        warn!(instances = ?unavailable, "waiting for instances to be available");
        ctx.warn_event(
            cluster,
            reasons::LONGER_THAN_USUAL,
            format!("{} instances not yet available", unavailable.len()),
        )
        .await;

        let bootstrapping_known = status
            .condition(CONDITION_PODS_BOOTSTRAPPING)
            .map(|c| c.is_true())
            .unwrap_or(false);
        if !bootstrapping_known {
            let mut updated = cluster.clone();
            let mut status = updated.status_or_default();
            status.set_condition(
                CONDITION_PODS_BOOTSTRAPPING,
                ConditionStatus::True,
                "InstancesInitializing",
                format!("{} instances not yet available", unavailable.len()),
            );
            status.state = ClusterState::Yellow;
            updated.status = Some(status);
            ctx.kube.update_cluster_status(&updated).await?;
        }
        return Ok(Action::await_change());
    }

    // Per-group scaling in sorted-group order (the order groups were
    // numbered in): exactly one mutation per tick, placement changes
    // before replica changes on the shrink path. StatefulSet name order is
    // only lexicographic, so each group is matched to its set by label.
    for group in &iso_groups {
        let set = children
            .iter()
            .find(|s| {
                s.metadata
                    .labels
                    .as_ref()
                    .and_then(|l| l.get(labels::ISOLATION_GROUP))
                    == Some(&group.name)
            })
            .ok_or_else(|| {
                Error::internal_with_context(
                    "reconciler",
                    format!("no statefulset for isolation group {}", group.name),
                )
            })?;
        let set_name = set.name_any();
        let current = set.spec.as_ref().and_then(|s| s.replicas).ok_or_else(|| {
            Error::internal_with_context(
                "reconciler",
                format!("statefulset {set_name} has unset spec replicas"),
            )
        })?;

        let desired = group.num_instances;
        let in_placement = db_placement.instances_in_group(&group.name).count() as i32;

        if desired == current {
            // At the desired size with every pod in the placement: done.
            if current == in_placement {
                continue;
            }

            // At the desired size but pods are absent from the placement:
            // expand.
            if in_placement < current {
                let pods = ctx.kube.list_cluster_pods(cluster).await?;
                let to_add = placement::pods_to_add(&pods, &db_placement, &group.name);
                let instances = to_add
                    .iter()
                    .map(|p| placement::instance_for_pod(cluster, p))
                    .collect::<Result<Vec<_>>>()?;
                if instances.is_empty() {
                    return Err(Error::internal_with_context(
                        "reconciler",
                        format!(
                            "group {} under-represented in placement but no pods to add",
                            group.name
                        ),
                    ));
                }
                info!(set = %set_name, count = instances.len(), "expanding placement for set");
                placement_client.add(instances).await?;
                return Ok(Action::await_change());
            }
        }

        // More instances in the placement than the group wants: remove one
        // so the subsequent replica decrement deletes a pod that owns
        // nothing.
        if in_placement > desired {
            let candidate = placement::shrink_candidate(&db_placement, &group.name)
                .ok_or_else(|| {
                    Error::internal_with_context(
                        "reconciler",
                        format!("no shrink candidate in group {}", group.name),
                    )
                })?;
            info!(set = %set_name, instance = %candidate, "removing instance from placement for set");
            placement_client.remove(candidate).await?;
            return Ok(Action::await_change());
        }

        // Step the replica count toward desired by one.
        let new_count = if current < desired {
            current + 1
        } else {
            current - 1
        };
        info!(set = %set_name, current, desired, new_count, "resizing set");
        let mut updated = set.clone();
        if let Some(spec) = updated.spec.as_mut() {
            spec.replicas = Some(new_count);
        }
        ctx.kube.update_statefulset(&namespace, &updated).await?;
        return Ok(Action::await_change());
    }

    // All groups converged. Clear bootstrap markers for pods whose
    // placement entry is available, then settle the status.
    let pods = ctx.kube.list_cluster_pods(cluster).await?;
    for pod in &pods {
        if !resources::is_marked_bootstrapping(pod) {
            continue;
        }
        let available = db_placement
            .instances
            .get(&pod.name_any())
            .map(|i| i.is_available())
            .unwrap_or(false);
        if available {
            let mut updated = pod.clone();
            if let Some(annotations) = updated.metadata.annotations.as_mut() {
                annotations.remove(labels::ANNOTATION_BOOTSTRAPPING);
            }
            info!(pod = %pod.name_any(), "clearing bootstrap marker");
            ctx.kube.update_pod(&namespace, &updated).await?;
        }
    }

    let generation = cluster.metadata.generation;
    let bootstrapping_set = status
        .condition(CONDITION_PODS_BOOTSTRAPPING)
        .map(|c| c.is_true())
        .unwrap_or(false);
    if status.state != ClusterState::Green
        || status.observed_generation != generation
        || bootstrapping_set
    {
        let mut updated = cluster.clone();
        let mut status: M3DBClusterStatus = updated.status_or_default();
        status.set_condition(
            CONDITION_PODS_BOOTSTRAPPING,
            ConditionStatus::False,
            "InstancesAvailable",
            "all placement instances available",
        );
        status.state = ClusterState::Green;
        status.observed_generation = generation;
        status.message = Some("cluster updated and synced".to_string());
        updated.status = Some(status);
        ctx.kube.update_cluster_status(&updated).await?;
    }

    info!(
        children = children.len(),
        groups = iso_groups.len(),
        "nothing to do"
    );
    ctx.normal_event(cluster, reasons::SUCCESSFUL_UPDATE, "cluster updated and synced")
        .await;
    Ok(Action::await_change())
}

/// Ensure the headless node service and the coordinator service exist.
///
/// Returns whether anything was created; creation ends the tick so the
/// next one observes the services through the cache.
async fn ensure_services(cluster: &M3DBCluster, ctx: &Context, namespace: &str) -> Result<bool> {
    let mut created = false;

    let node_service = resources::generate_node_service(cluster)?;
    if ctx
        .kube
        .get_service(namespace, &cluster.node_service_name())
        .await?
        .is_none()
    {
        info!(service = %cluster.node_service_name(), "creating node service");
        ctx.kube.create_service(namespace, &node_service).await?;
        created = true;
    }

    let coordinator_service = resources::generate_coordinator_service(cluster)?;
    if ctx
        .kube
        .get_service(namespace, &cluster.coordinator_service_name())
        .await?
        .is_none()
    {
        info!(service = %cluster.coordinator_service_name(), "creating coordinator service");
        ctx.kube
            .create_service(namespace, &coordinator_service)
            .await?;
        created = true;
    }

    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetStatus};
    use k8s_openapi::api::core::v1::{Pod, Service};
    use kube::api::ObjectMeta;

    use crate::k8s::MockKubeClient;
    use m3db_admin::placement::{Instance, InstanceAvailability, Placement};
    use m3db_admin::{MockClientProvider, MockNamespaceClient, MockPlacementClient};
    use m3db_common::crd::{IsolationGroup, M3DBClusterSpec};
    use m3db_common::events::NoopEventPublisher;

    // =========================================================================
    // Fixtures
    // =========================================================================

    fn sample_cluster(name: &str) -> M3DBCluster {
        let spec: M3DBClusterSpec = serde_json::from_value(serde_json::json!({
            "replicationFactor": 3,
            "numberOfShards": 256,
            "isolationGroups": [
                {"name": "a", "numInstances": 1},
                {"name": "b", "numInstances": 1},
                {"name": "c", "numInstances": 1}
            ],
            "namespaces": [{"name": "metrics", "preset": "10s:2d"}]
        }))
        .expect("spec should parse");
        M3DBCluster {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                uid: Some("uid-1".to_string()),
                generation: Some(1),
                ..Default::default()
            },
            spec,
            status: None,
        }
    }

    /// A cluster whose status says the placement exists and bootstrap is done
    fn converged_status() -> M3DBClusterStatus {
        let mut status = M3DBClusterStatus {
            state: ClusterState::Green,
            observed_generation: Some(1),
            ..Default::default()
        };
        status.set_condition(
            CONDITION_PLACEMENT_INITIALIZED,
            ConditionStatus::True,
            "PlacementCreated",
            "",
        );
        status.set_condition(
            CONDITION_PODS_BOOTSTRAPPING,
            ConditionStatus::False,
            "InstancesAvailable",
            "",
        );
        status
    }

    fn child_set(cluster: &M3DBCluster, group: &str, index: usize, replicas: i32, ready: i32) -> StatefulSet {
        let mut set = resources::generate_statefulset(
            cluster,
            &IsolationGroup {
                name: group.to_string(),
                num_instances: replicas,
            },
            index,
        )
        .expect("statefulset");
        set.status = Some(StatefulSetStatus {
            ready_replicas: Some(ready),
            ..Default::default()
        });
        set
    }

    fn member_pod(cluster_name: &str, name: &str, group: &str, bootstrapping: bool) -> Pod {
        let mut labels = m3db_common::labels::base_labels(cluster_name);
        labels.insert(labels::ISOLATION_GROUP.to_string(), group.to_string());
        let annotations = bootstrapping.then(|| {
            BTreeMap::from([(
                labels::ANNOTATION_BOOTSTRAPPING.to_string(),
                "true".to_string(),
            )])
        });
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                labels: Some(labels),
                annotations,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn placement_with(entries: &[(&str, &str, InstanceAvailability)]) -> Placement {
        let mut placement = Placement {
            replica_factor: 3,
            num_shards: 256,
            version: 1,
            ..Default::default()
        };
        for (id, group, availability) in entries {
            placement.instances.insert(
                id.to_string(),
                Instance {
                    id: id.to_string(),
                    isolation_group: group.to_string(),
                    availability: *availability,
                    ..Default::default()
                },
            );
        }
        placement
    }

    /// Kube mock where both services already exist; write expectations are
    /// all zero unless a test overrides them.
    fn kube_with_services() -> MockKubeClient {
        let mut kube = MockKubeClient::new();
        kube.expect_get_service()
            .returning(|_, _| Ok(Some(Service::default())));
        kube
    }

    fn admin_with(
        placement: MockPlacementClient,
        namespaces: MockNamespaceClient,
    ) -> MockClientProvider {
        let placement = Arc::new(placement);
        let namespaces = Arc::new(namespaces);
        let mut admin = MockClientProvider::new();
        admin
            .expect_placement_client()
            .returning(move |_, _| Ok(placement.clone()));
        admin
            .expect_namespace_client()
            .returning(move |_, _| Ok(namespaces.clone()));
        admin
    }

    /// Namespace client whose registry already matches the spec
    fn converged_namespaces() -> MockNamespaceClient {
        let mut ns = MockNamespaceClient::new();
        ns.expect_list().returning(|| Ok(vec!["metrics".to_string()]));
        ns.expect_create().times(0);
        ns.expect_delete().times(0);
        ns
    }

    fn test_ctx(kube: MockKubeClient, admin: MockClientProvider) -> Arc<Context> {
        Arc::new(Context::for_testing(
            Arc::new(kube),
            Arc::new(admin),
            Arc::new(NoopEventPublisher),
        ))
    }

    /// Capture of status patches, for asserting on WHAT was written without
    /// coupling to how.
    #[derive(Clone, Default)]
    struct StatusCapture {
        updates: Arc<Mutex<Vec<M3DBClusterStatus>>>,
    }

    impl StatusCapture {
        fn install(&self, kube: &mut MockKubeClient) {
            let updates = self.updates.clone();
            kube.expect_update_cluster_status().returning(move |c| {
                updates
                    .lock()
                    .unwrap()
                    .push(c.status.clone().unwrap_or_default());
                Ok(())
            });
        }

        fn last(&self) -> Option<M3DBClusterStatus> {
            self.updates.lock().unwrap().last().cloned()
        }
    }

    // =========================================================================
    // Cold start (S1)
    // =========================================================================

    /// Story: the first tick for a new cluster only creates its services.
    ///
    /// The headless service must exist before any StatefulSet references
    /// it, so nothing else happens this tick.
    #[tokio::test]
    async fn story_cold_start_creates_services_first() {
        let cluster = Arc::new(sample_cluster("cluster"));

        let mut kube = MockKubeClient::new();
        kube.expect_get_service().times(2).returning(|_, _| Ok(None));
        kube.expect_create_service().times(2).returning(|_, _| Ok(()));
        kube.expect_create_statefulset().times(0);
        kube.expect_list_child_statefulsets().times(0);

        let admin = MockClientProvider::new();
        let action = reconcile(cluster, test_ctx(kube, admin))
            .await
            .expect("reconcile should succeed");
        assert_eq!(action, Action::await_change());
    }

    /// Story: groups are created one per tick, numbered in sorted order.
    ///
    /// With services in place and no children yet, tick 2 creates exactly
    /// `cluster-0` for group `a` and stops.
    #[tokio::test]
    async fn story_cold_start_creates_first_group() {
        let cluster = Arc::new(sample_cluster("cluster"));

        let mut kube = kube_with_services();
        kube.expect_list_child_statefulsets().returning(|_| Ok(vec![]));
        kube.expect_create_statefulset()
            .times(1)
            .withf(|_, set| {
                set.metadata.name.as_deref() == Some("cluster-0")
                    && set
                        .metadata
                        .labels
                        .as_ref()
                        .and_then(|l| l.get(labels::ISOLATION_GROUP))
                        .map(String::as_str)
                        == Some("a")
            })
            .returning(|_, _| Ok(()));
        kube.expect_update_statefulset().times(0);

        let admin = MockClientProvider::new();
        let action = reconcile(cluster, test_ctx(kube, admin))
            .await
            .expect("reconcile should succeed");
        assert_eq!(action, Action::await_change());
    }

    /// Story: the third group follows once the first two are ready (monotonic
    /// group creation)
    #[tokio::test]
    async fn story_next_group_is_created_in_order() {
        let cluster = Arc::new(sample_cluster("cluster"));
        let children = vec![
            child_set(&cluster, "a", 0, 1, 1),
            child_set(&cluster, "b", 1, 1, 1),
        ];

        let mut kube = kube_with_services();
        kube.expect_list_child_statefulsets()
            .returning(move |_| Ok(children.clone()));
        kube.expect_create_statefulset()
            .times(1)
            .withf(|_, set| set.metadata.name.as_deref() == Some("cluster-2"))
            .returning(|_, _| Ok(()));

        let admin = MockClientProvider::new();
        reconcile(cluster, test_ctx(kube, admin))
            .await
            .expect("reconcile should succeed");
    }

    /// Story: once all groups exist, the declared namespace is created before
    /// the placement is touched
    #[tokio::test]
    async fn story_namespaces_reconcile_before_placement() {
        let cluster = Arc::new(sample_cluster("cluster"));
        let children = vec![
            child_set(&cluster, "a", 0, 1, 1),
            child_set(&cluster, "b", 1, 1, 1),
            child_set(&cluster, "c", 2, 1, 1),
        ];

        let mut kube = kube_with_services();
        kube.expect_list_child_statefulsets()
            .returning(move |_| Ok(children.clone()));
        kube.expect_create_statefulset().times(0);

        let mut ns = MockNamespaceClient::new();
        ns.expect_list().returning(|| Ok(vec![]));
        ns.expect_create()
            .times(1)
            .withf(|req| req.name == "metrics")
            .returning(|_| Ok(()));

        let mut placement_client = MockPlacementClient::new();
        placement_client.expect_init().times(0);
        placement_client.expect_get().times(0);

        reconcile(cluster, test_ctx(kube, admin_with(placement_client, ns)))
            .await
            .expect("reconcile should succeed");
    }

    /// Story: with namespaces converged, the placement is initialized from
    /// the observed pods and the condition is recorded
    #[tokio::test]
    async fn story_placement_initializes_from_pods() {
        let cluster = Arc::new(sample_cluster("cluster"));
        let children = vec![
            child_set(&cluster, "a", 0, 1, 1),
            child_set(&cluster, "b", 1, 1, 1),
            child_set(&cluster, "c", 2, 1, 1),
        ];
        let pods = vec![
            member_pod("cluster", "cluster-0-0", "a", true),
            member_pod("cluster", "cluster-1-0", "b", true),
            member_pod("cluster", "cluster-2-0", "c", true),
        ];

        let capture = StatusCapture::default();
        let mut kube = kube_with_services();
        kube.expect_list_child_statefulsets()
            .returning(move |_| Ok(children.clone()));
        kube.expect_list_cluster_pods().returning(move |_| Ok(pods.clone()));
        capture.install(&mut kube);

        let mut placement_client = MockPlacementClient::new();
        placement_client
            .expect_init()
            .times(1)
            .withf(|req| {
                req.replication_factor == 3
                    && req.num_shards == 256
                    && req.instances.len() == 3
                    && req.instances[0].id == "cluster-0-0"
            })
            .returning(|_| Ok(()));
        placement_client.expect_get().times(0);

        let action = reconcile(
            cluster,
            test_ctx(kube, admin_with(placement_client, converged_namespaces())),
        )
        .await
        .expect("reconcile should succeed");

        assert_eq!(action, Action::await_change());
        let status = capture.last().expect("status should be written");
        assert!(status.has_initialized_placement());
        assert_eq!(status.state, ClusterState::Yellow);
    }

    /// Story: the converged cluster clears bootstrap markers, goes green, and
    /// reports synced - all in the final tick
    #[tokio::test]
    async fn story_converged_cluster_goes_green() {
        let mut cluster = sample_cluster("cluster");
        let mut status = M3DBClusterStatus::default();
        status.set_condition(
            CONDITION_PLACEMENT_INITIALIZED,
            ConditionStatus::True,
            "PlacementCreated",
            "",
        );
        status.set_condition(
            CONDITION_PODS_BOOTSTRAPPING,
            ConditionStatus::True,
            "InstancesInitializing",
            "",
        );
        cluster.status = Some(status);
        let cluster = Arc::new(cluster);

        let children = vec![
            child_set(&cluster, "a", 0, 1, 1),
            child_set(&cluster, "b", 1, 1, 1),
            child_set(&cluster, "c", 2, 1, 1),
        ];
        let pods = vec![
            member_pod("cluster", "cluster-0-0", "a", true),
            member_pod("cluster", "cluster-1-0", "b", false),
            member_pod("cluster", "cluster-2-0", "c", false),
        ];

        let capture = StatusCapture::default();
        let mut kube = kube_with_services();
        kube.expect_list_child_statefulsets()
            .returning(move |_| Ok(children.clone()));
        kube.expect_list_cluster_pods().returning(move |_| Ok(pods.clone()));
        // only cluster-0-0 still carries the marker
        kube.expect_update_pod()
            .times(1)
            .withf(|_, pod| {
                pod.metadata.name.as_deref() == Some("cluster-0-0")
                    && !resources::is_marked_bootstrapping(pod)
            })
            .returning(|_, _| Ok(()));
        capture.install(&mut kube);

        let mut placement_client = MockPlacementClient::new();
        let placement = placement_with(&[
            ("cluster-0-0", "a", InstanceAvailability::Available),
            ("cluster-1-0", "b", InstanceAvailability::Available),
            ("cluster-2-0", "c", InstanceAvailability::Available),
        ]);
        placement_client
            .expect_get()
            .returning(move || Ok(placement.clone()));
        placement_client.expect_add().times(0);
        placement_client.expect_remove().times(0);

        let action = reconcile(
            cluster,
            test_ctx(kube, admin_with(placement_client, converged_namespaces())),
        )
        .await
        .expect("reconcile should succeed");

        assert_eq!(action, Action::await_change());
        let status = capture.last().expect("status should be written");
        assert_eq!(status.state, ClusterState::Green);
        assert_eq!(status.observed_generation, Some(1));
        assert!(!status
            .condition(CONDITION_PODS_BOOTSTRAPPING)
            .expect("condition present")
            .is_true());
    }

    /// Story: a fully green cluster issues no writes at all
    #[tokio::test]
    async fn story_green_cluster_is_left_alone() {
        let mut cluster = sample_cluster("cluster");
        cluster.status = Some(converged_status());
        let cluster = Arc::new(cluster);

        let children = vec![
            child_set(&cluster, "a", 0, 1, 1),
            child_set(&cluster, "b", 1, 1, 1),
            child_set(&cluster, "c", 2, 1, 1),
        ];
        let pods = vec![
            member_pod("cluster", "cluster-0-0", "a", false),
            member_pod("cluster", "cluster-1-0", "b", false),
            member_pod("cluster", "cluster-2-0", "c", false),
        ];

        let mut kube = kube_with_services();
        kube.expect_list_child_statefulsets()
            .returning(move |_| Ok(children.clone()));
        kube.expect_list_cluster_pods().returning(move |_| Ok(pods.clone()));
        kube.expect_create_statefulset().times(0);
        kube.expect_update_statefulset().times(0);
        kube.expect_update_pod().times(0);
        kube.expect_update_cluster_status().times(0);

        let mut placement_client = MockPlacementClient::new();
        let placement = placement_with(&[
            ("cluster-0-0", "a", InstanceAvailability::Available),
            ("cluster-1-0", "b", InstanceAvailability::Available),
            ("cluster-2-0", "c", InstanceAvailability::Available),
        ]);
        placement_client
            .expect_get()
            .returning(move || Ok(placement.clone()));
        placement_client.expect_add().times(0);
        placement_client.expect_remove().times(0);

        reconcile(
            cluster,
            test_ctx(kube, admin_with(placement_client, converged_namespaces())),
        )
        .await
        .expect("reconcile should succeed");
    }

    // =========================================================================
    // Gates (S4 + availability)
    // =========================================================================

    /// Story: an unready group freezes the whole cluster (readiness gate).
    ///
    /// declared != ready means a pod is still bootstrapping; no write of
    /// any kind is issued until the next event.
    #[tokio::test]
    async fn story_unready_group_blocks_all_writes() {
        let cluster = Arc::new(sample_cluster("cluster"));
        let children = vec![
            child_set(&cluster, "a", 0, 1, 0), // not ready
            child_set(&cluster, "b", 1, 1, 1),
        ];

        let mut kube = kube_with_services();
        kube.expect_list_child_statefulsets()
            .returning(move |_| Ok(children.clone()));
        kube.expect_create_statefulset().times(0);
        kube.expect_update_statefulset().times(0);
        kube.expect_update_cluster_status().times(0);

        let admin = MockClientProvider::new();
        let action = reconcile(cluster, test_ctx(kube, admin))
            .await
            .expect("reconcile should succeed");
        assert_eq!(action, Action::await_change());
    }

    /// Story: unavailable placement instances freeze scaling
    #[tokio::test]
    async fn story_unavailable_instances_block_scaling() {
        let mut cluster = sample_cluster("cluster");
        // scale-out pending: group a wants 2
        cluster.spec.isolation_groups[0].num_instances = 2;
        let mut status = M3DBClusterStatus::default();
        status.set_condition(
            CONDITION_PLACEMENT_INITIALIZED,
            ConditionStatus::True,
            "PlacementCreated",
            "",
        );
        status.set_condition(
            CONDITION_PODS_BOOTSTRAPPING,
            ConditionStatus::True,
            "InstancesInitializing",
            "",
        );
        cluster.status = Some(status);
        let cluster = Arc::new(cluster);

        let children = vec![
            child_set(&cluster, "a", 0, 1, 1),
            child_set(&cluster, "b", 1, 1, 1),
            child_set(&cluster, "c", 2, 1, 1),
        ];

        let mut kube = kube_with_services();
        kube.expect_list_child_statefulsets()
            .returning(move |_| Ok(children.clone()));
        kube.expect_update_statefulset().times(0);
        kube.expect_update_cluster_status().times(0);

        let mut placement_client = MockPlacementClient::new();
        let placement = placement_with(&[
            ("cluster-0-0", "a", InstanceAvailability::Initializing),
            ("cluster-1-0", "b", InstanceAvailability::Available),
            ("cluster-2-0", "c", InstanceAvailability::Available),
        ]);
        placement_client
            .expect_get()
            .returning(move || Ok(placement.clone()));
        placement_client.expect_add().times(0);
        placement_client.expect_remove().times(0);

        let action = reconcile(
            cluster,
            test_ctx(kube, admin_with(placement_client, converged_namespaces())),
        )
        .await
        .expect("reconcile should succeed");
        assert_eq!(action, Action::await_change());
    }

    // =========================================================================
    // Validation (S5 + placement validation)
    // =========================================================================

    /// Story: no isolation groups means nothing to converge after services
    #[tokio::test]
    async fn story_empty_isolation_groups_only_ensures_services() {
        let mut cluster = sample_cluster("cluster");
        cluster.spec.isolation_groups.clear();
        let cluster = Arc::new(cluster);

        let mut kube = kube_with_services();
        kube.expect_list_child_statefulsets().times(0);
        kube.expect_create_statefulset().times(0);

        let admin = MockClientProvider::new();
        let action = reconcile(cluster, test_ctx(kube, admin))
            .await
            .expect("reconcile should succeed");
        assert_eq!(action, Action::await_change());
    }

    /// Story: a replication factor that can't fit the groups never touches
    /// the placement
    #[tokio::test]
    async fn story_invalid_replication_factor_blocks_placement_init() {
        let mut cluster = sample_cluster("cluster");
        cluster.spec.replication_factor = 2;
        let cluster = Arc::new(cluster);

        let children = vec![
            child_set(&cluster, "a", 0, 1, 1),
            child_set(&cluster, "b", 1, 1, 1),
            child_set(&cluster, "c", 2, 1, 1),
        ];

        let mut kube = kube_with_services();
        kube.expect_list_child_statefulsets()
            .returning(move |_| Ok(children.clone()));
        kube.expect_update_cluster_status().times(0);

        let mut placement_client = MockPlacementClient::new();
        placement_client.expect_init().times(0);

        let action = reconcile(
            cluster,
            test_ctx(kube, admin_with(placement_client, converged_namespaces())),
        )
        .await
        .expect("reconcile should succeed");
        // validation errors wait for a spec change instead of requeueing
        assert_eq!(action, Action::await_change());
    }

    // =========================================================================
    // Scaling (S2, S3)
    // =========================================================================

    fn scaling_cluster(group_a_instances: i32) -> M3DBCluster {
        let mut cluster = sample_cluster("cluster");
        cluster.spec.isolation_groups[0].num_instances = group_a_instances;
        cluster.status = Some(converged_status());
        cluster
    }

    /// Story: scale-out steps the StatefulSet up by one (S2).
    ///
    /// Group a wants 2 but declares 1; the only mutation this tick is the
    /// replica bump - no placement change yet.
    #[tokio::test]
    async fn story_scale_out_steps_replicas_by_one() {
        let cluster = Arc::new(scaling_cluster(2));
        let children = vec![
            child_set(&cluster, "a", 0, 1, 1),
            child_set(&cluster, "b", 1, 1, 1),
            child_set(&cluster, "c", 2, 1, 1),
        ];

        let mut kube = kube_with_services();
        kube.expect_list_child_statefulsets()
            .returning(move |_| Ok(children.clone()));
        kube.expect_update_statefulset()
            .times(1)
            .withf(|_, set| {
                set.metadata.name.as_deref() == Some("cluster-0")
                    && set.spec.as_ref().and_then(|s| s.replicas) == Some(2)
            })
            .returning(|_, _| Ok(()));
        kube.expect_create_statefulset().times(0);

        let mut placement_client = MockPlacementClient::new();
        let placement = placement_with(&[
            ("cluster-0-0", "a", InstanceAvailability::Available),
            ("cluster-1-0", "b", InstanceAvailability::Available),
            ("cluster-2-0", "c", InstanceAvailability::Available),
        ]);
        placement_client
            .expect_get()
            .returning(move || Ok(placement.clone()));
        placement_client.expect_add().times(0);
        placement_client.expect_remove().times(0);

        reconcile(
            cluster,
            test_ctx(kube, admin_with(placement_client, converged_namespaces())),
        )
        .await
        .expect("reconcile should succeed");
    }

    /// Story: scaling decisions follow sorted-group order, not the order
    /// the children happen to list in.
    ///
    /// Group `a` is the first divergent group by name, so it gets the
    /// tick's one mutation even when its StatefulSet lists last.
    #[tokio::test]
    async fn story_scaling_follows_group_order_not_child_order() {
        let cluster = Arc::new(scaling_cluster(2));
        let children = vec![
            child_set(&cluster, "c", 2, 1, 1),
            child_set(&cluster, "b", 1, 1, 1),
            child_set(&cluster, "a", 0, 1, 1),
        ];

        let mut kube = kube_with_services();
        kube.expect_list_child_statefulsets()
            .returning(move |_| Ok(children.clone()));
        kube.expect_update_statefulset()
            .times(1)
            .withf(|_, set| {
                set.metadata.name.as_deref() == Some("cluster-0")
                    && set.spec.as_ref().and_then(|s| s.replicas) == Some(2)
            })
            .returning(|_, _| Ok(()));

        let mut placement_client = MockPlacementClient::new();
        let placement = placement_with(&[
            ("cluster-0-0", "a", InstanceAvailability::Available),
            ("cluster-1-0", "b", InstanceAvailability::Available),
            ("cluster-2-0", "c", InstanceAvailability::Available),
        ]);
        placement_client
            .expect_get()
            .returning(move || Ok(placement.clone()));
        placement_client.expect_add().times(0);
        placement_client.expect_remove().times(0);

        reconcile(
            cluster,
            test_ctx(kube, admin_with(placement_client, converged_namespaces())),
        )
        .await
        .expect("reconcile should succeed");
    }

    /// Story: once the new pod is ready but absent from the placement, the
    /// placement expands (S2, second phase)
    #[tokio::test]
    async fn story_scale_out_expands_placement_for_new_pod() {
        let cluster = Arc::new(scaling_cluster(2));
        let children = vec![
            child_set(&cluster, "a", 0, 2, 2),
            child_set(&cluster, "b", 1, 1, 1),
            child_set(&cluster, "c", 2, 1, 1),
        ];
        let pods = vec![
            member_pod("cluster", "cluster-0-0", "a", false),
            member_pod("cluster", "cluster-0-1", "a", true),
            member_pod("cluster", "cluster-1-0", "b", false),
            member_pod("cluster", "cluster-2-0", "c", false),
        ];

        let mut kube = kube_with_services();
        kube.expect_list_child_statefulsets()
            .returning(move |_| Ok(children.clone()));
        kube.expect_list_cluster_pods().returning(move |_| Ok(pods.clone()));
        kube.expect_update_statefulset().times(0);
        kube.expect_update_pod().times(0);

        let mut placement_client = MockPlacementClient::new();
        let placement = placement_with(&[
            ("cluster-0-0", "a", InstanceAvailability::Available),
            ("cluster-1-0", "b", InstanceAvailability::Available),
            ("cluster-2-0", "c", InstanceAvailability::Available),
        ]);
        placement_client
            .expect_get()
            .returning(move || Ok(placement.clone()));
        placement_client
            .expect_add()
            .times(1)
            .withf(|instances| instances.len() == 1 && instances[0].id == "cluster-0-1")
            .returning(|_| Ok(()));
        placement_client.expect_remove().times(0);

        reconcile(
            cluster,
            test_ctx(kube, admin_with(placement_client, converged_namespaces())),
        )
        .await
        .expect("reconcile should succeed");
    }

    /// Story: scale-in removes from the placement before any replica change
    /// (S3, placement-before-shrink)
    #[tokio::test]
    async fn story_scale_in_removes_from_placement_first() {
        let cluster = Arc::new(scaling_cluster(1));
        let children = vec![
            child_set(&cluster, "a", 0, 2, 2),
            child_set(&cluster, "b", 1, 1, 1),
            child_set(&cluster, "c", 2, 1, 1),
        ];

        let mut kube = kube_with_services();
        kube.expect_list_child_statefulsets()
            .returning(move |_| Ok(children.clone()));
        // property: no replica decrement in the same tick as the removal
        kube.expect_update_statefulset().times(0);

        let mut placement_client = MockPlacementClient::new();
        let placement = placement_with(&[
            ("cluster-0-0", "a", InstanceAvailability::Available),
            ("cluster-0-1", "a", InstanceAvailability::Available),
            ("cluster-1-0", "b", InstanceAvailability::Available),
            ("cluster-2-0", "c", InstanceAvailability::Available),
        ]);
        placement_client
            .expect_get()
            .returning(move || Ok(placement.clone()));
        // highest ordinal goes, matching StatefulSet scale-down
        placement_client
            .expect_remove()
            .times(1)
            .withf(|id| id == "cluster-0-1")
            .returning(|_| Ok(()));
        placement_client.expect_add().times(0);

        reconcile(
            cluster,
            test_ctx(kube, admin_with(placement_client, converged_namespaces())),
        )
        .await
        .expect("reconcile should succeed");
    }

    /// Story: after the leaving instance drains out of the placement, the
    /// replica count steps down (S3, second phase)
    #[tokio::test]
    async fn story_scale_in_decrements_replicas_after_drain() {
        let cluster = Arc::new(scaling_cluster(1));
        let children = vec![
            child_set(&cluster, "a", 0, 2, 2),
            child_set(&cluster, "b", 1, 1, 1),
            child_set(&cluster, "c", 2, 1, 1),
        ];

        let mut kube = kube_with_services();
        kube.expect_list_child_statefulsets()
            .returning(move |_| Ok(children.clone()));
        kube.expect_update_statefulset()
            .times(1)
            .withf(|_, set| {
                set.metadata.name.as_deref() == Some("cluster-0")
                    && set.spec.as_ref().and_then(|s| s.replicas) == Some(1)
            })
            .returning(|_, _| Ok(()));

        let mut placement_client = MockPlacementClient::new();
        let placement = placement_with(&[
            ("cluster-0-0", "a", InstanceAvailability::Available),
            ("cluster-1-0", "b", InstanceAvailability::Available),
            ("cluster-2-0", "c", InstanceAvailability::Available),
        ]);
        placement_client
            .expect_get()
            .returning(move || Ok(placement.clone()));
        placement_client.expect_remove().times(0);
        placement_client.expect_add().times(0);

        reconcile(
            cluster,
            test_ctx(kube, admin_with(placement_client, converged_namespaces())),
        )
        .await
        .expect("reconcile should succeed");
    }

    // =========================================================================
    // Error propagation
    // =========================================================================

    /// Story: admin failures propagate so the error policy can back off
    #[tokio::test]
    async fn story_admin_errors_propagate_for_retry() {
        let mut cluster = sample_cluster("cluster");
        cluster.status = Some(converged_status());
        let cluster = Arc::new(cluster);

        let children = vec![
            child_set(&cluster, "a", 0, 1, 1),
            child_set(&cluster, "b", 1, 1, 1),
            child_set(&cluster, "c", 2, 1, 1),
        ];

        let mut kube = kube_with_services();
        kube.expect_list_child_statefulsets()
            .returning(move |_| Ok(children.clone()));

        let mut placement_client = MockPlacementClient::new();
        placement_client
            .expect_get()
            .returning(|| Err(Error::admin_for("cluster", "connection refused")));

        let result = reconcile(
            cluster,
            test_ctx(kube, admin_with(placement_client, converged_namespaces())),
        )
        .await;
        assert!(result.is_err());
        assert!(result.err().expect("error").is_retryable());
    }

    #[tokio::test]
    async fn error_policy_backs_off_retryable_errors() {
        let cluster = Arc::new(sample_cluster("cluster"));
        let ctx = test_ctx(MockKubeClient::new(), MockClientProvider::new());

        let err = Error::admin_for("cluster", "boom");
        let first = error_policy(cluster.clone(), &err, ctx.clone());
        let second = error_policy(cluster.clone(), &err, ctx.clone());
        assert_ne!(first, second, "delays should grow between failures");

        let validation = Error::validation_for("cluster", "bad spec");
        assert_eq!(
            error_policy(cluster, &validation, ctx),
            Action::await_change()
        );
    }
}
