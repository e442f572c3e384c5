//! Narrow facade over the Kubernetes API.
//!
//! The reconcilers only touch the platform through [`KubeClient`], which
//! keeps them testable against mocks and enforces the cache-safety rule:
//! every read returns owned objects, never shared cache references.

pub mod resources;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Node, Pod, Service};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, CustomResourceExt, ResourceExt};
use tracing::info;

#[cfg(test)]
use mockall::automock;

use m3db_common::crd::M3DBCluster;
use m3db_common::{labels, Error, Result};

/// Field manager name used for all server-side apply patches
pub const FIELD_MANAGER: &str = "m3db-operator";

/// Trait abstracting Kubernetes operations for the reconcilers.
///
/// List operations are deterministic: results are sorted by name so that
/// "the next group to create" and "the next pod to touch" are stable across
/// ticks.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get a service by name, None on 404
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>>;

    /// Create a service
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<()>;

    /// StatefulSets controller-owned by the cluster, sorted by name
    async fn list_child_statefulsets(&self, cluster: &M3DBCluster) -> Result<Vec<StatefulSet>>;

    /// Create a StatefulSet
    async fn create_statefulset(&self, namespace: &str, set: &StatefulSet) -> Result<()>;

    /// Update a StatefulSet (replica changes)
    async fn update_statefulset(&self, namespace: &str, set: &StatefulSet) -> Result<()>;

    /// Pods carrying the cluster's base labels, sorted by name
    async fn list_cluster_pods(&self, cluster: &M3DBCluster) -> Result<Vec<Pod>>;

    /// Update a pod (annotation changes)
    async fn update_pod(&self, namespace: &str, pod: &Pod) -> Result<()>;

    /// Get a node by name, None on 404
    async fn get_node(&self, name: &str) -> Result<Option<Node>>;

    /// Get a cluster by namespace and name, None on 404
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<M3DBCluster>>;

    /// Patch the status subresource of a cluster
    async fn update_cluster_status(&self, cluster: &M3DBCluster) -> Result<()>;
}

/// Production implementation backed by a kube [`Client`]
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Wrap the given kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(svc) => Ok(Some(svc)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<()> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), service).await?;
        Ok(())
    }

    async fn list_child_statefulsets(&self, cluster: &M3DBCluster) -> Result<Vec<StatefulSet>> {
        let namespace = cluster.namespace().ok_or_else(|| {
            Error::internal_with_context("kube", "cluster has no namespace")
        })?;
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), &namespace);
        let params =
            ListParams::default().labels(&labels::base_selector(&cluster.name_any()));

        let uid = cluster.uid();
        let mut children: Vec<StatefulSet> = api
            .list(&params)
            .await?
            .items
            .into_iter()
            .filter(|set| {
                set.metadata
                    .owner_references
                    .as_ref()
                    .map(|refs| {
                        refs.iter().any(|r| {
                            r.controller == Some(true) && Some(&r.uid) == uid.as_ref()
                        })
                    })
                    .unwrap_or(false)
            })
            .collect();
        children.sort_by(|a, b| a.name_any().cmp(&b.name_any()));
        Ok(children)
    }

    async fn create_statefulset(&self, namespace: &str, set: &StatefulSet) -> Result<()> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), set).await?;
        Ok(())
    }

    async fn update_statefulset(&self, namespace: &str, set: &StatefulSet) -> Result<()> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        api.replace(&set.name_any(), &PostParams::default(), set)
            .await?;
        Ok(())
    }

    async fn list_cluster_pods(&self, cluster: &M3DBCluster) -> Result<Vec<Pod>> {
        let namespace = cluster.namespace().ok_or_else(|| {
            Error::internal_with_context("kube", "cluster has no namespace")
        })?;
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
        let params =
            ListParams::default().labels(&labels::base_selector(&cluster.name_any()));
        let mut pods = api.list(&params).await?.items;
        pods.sort_by(|a, b| a.name_any().cmp(&b.name_any()));
        Ok(pods)
    }

    async fn update_pod(&self, namespace: &str, pod: &Pod) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.replace(&pod.name_any(), &PostParams::default(), pod)
            .await?;
        Ok(())
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        match api.get(name).await {
            Ok(node) => Ok(Some(node)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<M3DBCluster>> {
        let api: Api<M3DBCluster> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(cluster) => Ok(Some(cluster)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_cluster_status(&self, cluster: &M3DBCluster) -> Result<()> {
        let namespace = cluster.namespace().ok_or_else(|| {
            Error::internal_with_context("kube", "cluster has no namespace")
        })?;
        let api: Api<M3DBCluster> = Api::namespaced(self.client.clone(), &namespace);
        let patch = serde_json::json!({ "status": cluster.status });
        api.patch_status(
            &cluster.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }
}

/// Install the M3DBCluster CRD using server-side apply.
///
/// Running this on every startup keeps the served CRD version in lockstep
/// with the operator version.
pub async fn ensure_crd_installed(client: &Client) -> Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    info!("installing M3DBCluster CRD");
    crds.patch(
        "m3dbclusters.operator.m3db.io",
        &params,
        &Patch::Apply(&M3DBCluster::crd()),
    )
    .await?;
    Ok(())
}
