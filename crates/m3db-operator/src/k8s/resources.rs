//! Generation of the Kubernetes objects a cluster owns.
//!
//! Pure builders: the same cluster spec always yields byte-identical
//! objects, so creates are deterministic and diffs are meaningful. All
//! generated objects carry a controller owner reference to the cluster;
//! deletion cascades through platform garbage collection.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, HTTPGetAction, PersistentVolumeClaim, Pod,
    PodSpec, PodTemplateSpec, Probe, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::Resource;
use kube::ResourceExt;

use m3db_common::crd::{IsolationGroup, M3DBCluster};
use m3db_common::{
    labels, Error, Result, PORT_CLIENT, PORT_CLUSTER, PORT_COORDINATOR, PORT_COORDINATOR_METRICS,
    PORT_DEBUG, PORT_HTTP_CLUSTER, PORT_HTTP_NODE,
};

const DATA_VOLUME: &str = "m3db-data";
const CONFIG_VOLUME: &str = "m3db-config";
const DATA_DIR: &str = "/var/lib/m3db";
const CONFIG_DIR: &str = "/etc/m3db";

fn controller_owner_ref(cluster: &M3DBCluster) -> Result<OwnerReference> {
    cluster.controller_owner_ref(&()).ok_or_else(|| {
        Error::internal_with_context("resources", "cluster has no name or uid for owner reference")
    })
}

fn object_labels(cluster: &M3DBCluster, component: &str) -> BTreeMap<String, String> {
    let mut labels = labels::base_labels(&cluster.name_any());
    labels.extend(cluster.spec.labels.clone());
    labels.insert(labels::COMPONENT.to_string(), component.to_string());
    labels
}

/// Generate the StatefulSet for one isolation group.
///
/// `index` is the group's position in sorted-group order; it numbers the
/// set (`<cluster>-<index>`) and must not change across ticks.
pub fn generate_statefulset(
    cluster: &M3DBCluster,
    group: &IsolationGroup,
    index: usize,
) -> Result<StatefulSet> {
    let name = format!("{}-{}", cluster.name_any(), index);

    let mut pod_labels = object_labels(cluster, labels::COMPONENT_M3DBNODE);
    pod_labels.insert(labels::ISOLATION_GROUP.to_string(), group.name.clone());

    // New pods start marked as bootstrapping; the controller clears the
    // marker once their placement instance reports available.
    let pod_annotations = BTreeMap::from([(
        labels::ANNOTATION_BOOTSTRAPPING.to_string(),
        "true".to_string(),
    )]);

    let mut volumes = vec![Volume {
        name: CONFIG_VOLUME.to_string(),
        config_map: Some(k8s_openapi::api::core::v1::ConfigMapVolumeSource {
            name: cluster.config_map_name(),
            ..Default::default()
        }),
        ..Default::default()
    }];

    let mut volume_claim_templates: Option<Vec<PersistentVolumeClaim>> = None;
    match &cluster.spec.data_dir_volume_claim_template {
        Some(template) => {
            let mut claim = template.clone();
            if claim.metadata.name.is_none() {
                claim.metadata.name = Some(DATA_VOLUME.to_string());
            }
            volume_claim_templates = Some(vec![claim]);
        }
        None => {
            volumes.push(Volume {
                name: DATA_VOLUME.to_string(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Default::default()
            });
        }
    }

    let data_volume_name = volume_claim_templates
        .as_ref()
        .and_then(|claims| claims[0].metadata.name.clone())
        .unwrap_or_else(|| DATA_VOLUME.to_string());

    let container = Container {
        name: "m3db".to_string(),
        image: Some(cluster.spec.image.clone()),
        args: Some(vec!["-f".to_string(), format!("{CONFIG_DIR}/m3db.yml")]),
        ports: Some(vec![
            node_port("client", PORT_CLIENT),
            node_port("cluster", PORT_CLUSTER),
            node_port("http-node", PORT_HTTP_NODE),
            node_port("http-cluster", PORT_HTTP_CLUSTER),
            node_port("debug", PORT_DEBUG),
            node_port("coordinator", PORT_COORDINATOR),
        ]),
        readiness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/health/bootstrapped".to_string()),
                port: IntOrString::Int(PORT_HTTP_NODE),
                ..Default::default()
            }),
            initial_delay_seconds: Some(15),
            period_seconds: Some(10),
            ..Default::default()
        }),
        resources: cluster.spec.container_resources.clone(),
        volume_mounts: Some(vec![
            VolumeMount {
                name: data_volume_name,
                mount_path: DATA_DIR.to_string(),
                ..Default::default()
            },
            VolumeMount {
                name: CONFIG_VOLUME.to_string(),
                mount_path: CONFIG_DIR.to_string(),
                ..Default::default()
            },
        ]),
        ..Default::default()
    };

    Ok(StatefulSet {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: cluster.namespace(),
            labels: Some(pod_labels.clone()),
            owner_references: Some(vec![controller_owner_ref(cluster)?]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            service_name: cluster.node_service_name(),
            replicas: Some(group.num_instances),
            // All pods of a group may bootstrap at once; ordering is only
            // needed across groups, which the controller serializes itself.
            pod_management_policy: Some("Parallel".to_string()),
            selector: LabelSelector {
                match_labels: Some(pod_labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    annotations: Some(pod_annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            volume_claim_templates,
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn node_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

fn service_port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(port)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// Generate the headless service governing DB node pods.
///
/// StatefulSets require the governing service to exist before pods get
/// their stable DNS names, which is why the state machine ensures services
/// before anything else.
pub fn generate_node_service(cluster: &M3DBCluster) -> Result<Service> {
    let mut selector = labels::base_labels(&cluster.name_any());
    selector.insert(
        labels::COMPONENT.to_string(),
        labels::COMPONENT_M3DBNODE.to_string(),
    );

    Ok(Service {
        metadata: ObjectMeta {
            name: Some(cluster.node_service_name()),
            namespace: cluster.namespace(),
            labels: Some(object_labels(cluster, labels::COMPONENT_M3DBNODE)),
            owner_references: Some(vec![controller_owner_ref(cluster)?]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(selector),
            ports: Some(vec![
                service_port("client", PORT_CLIENT),
                service_port("cluster", PORT_CLUSTER),
                service_port("http-node", PORT_HTTP_NODE),
                service_port("http-cluster", PORT_HTTP_CLUSTER),
                service_port("debug", PORT_DEBUG),
            ]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Generate the coordinator service fronting the embedded coordinators.
///
/// The admin client registry resolves this service's DNS name, and the
/// kubectl-proxy rewrite addresses its `coordinator` port by name.
pub fn generate_coordinator_service(cluster: &M3DBCluster) -> Result<Service> {
    let mut selector = labels::base_labels(&cluster.name_any());
    selector.insert(
        labels::COMPONENT.to_string(),
        labels::COMPONENT_M3DBNODE.to_string(),
    );

    Ok(Service {
        metadata: ObjectMeta {
            name: Some(cluster.coordinator_service_name()),
            namespace: cluster.namespace(),
            labels: Some(object_labels(cluster, labels::COMPONENT_COORDINATOR)),
            owner_references: Some(vec![controller_owner_ref(cluster)?]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector),
            ports: Some(vec![
                service_port("coordinator", PORT_COORDINATOR),
                service_port("metrics", PORT_COORDINATOR_METRICS),
            ]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// True if the pod carries the bootstrapping marker annotation
pub fn is_marked_bootstrapping(pod: &Pod) -> bool {
    pod.metadata
        .annotations
        .as_ref()
        .map(|a| a.contains_key(labels::ANNOTATION_BOOTSTRAPPING))
        .unwrap_or(false)
}
