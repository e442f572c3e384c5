//! Per-cluster admin client registry.
//!
//! Admin clients are cheap but not free (connection pools), and every
//! reconcile tick needs one, so they are created lazily and cached per
//! cluster. The URL function is swappable: production resolves the
//! coordinator service DNS name, development rewrites through a local
//! kubectl proxy.

use std::sync::Arc;

use dashmap::DashMap;

use crate::namespace::{HttpNamespaceClient, NamespaceClient};
use crate::placement::{HttpPlacementClient, PlacementClient};
use crate::Client;
use m3db_common::Result;

/// Function deriving the admin base URL for a cluster from its name and
/// namespace
pub type ClusterUrlFn = fn(name: &str, namespace: &str) -> String;

/// Coordinator service URL used in-cluster
pub fn cluster_url(name: &str, namespace: &str) -> String {
    format!("http://m3coordinator-{name}.{namespace}.svc.cluster.local:7201")
}

/// Coordinator URL rewritten through a local `kubectl proxy`.
///
/// Lets the operator run outside the cluster during development while still
/// reaching every coordinator.
pub fn cluster_url_proxy(name: &str, namespace: &str) -> String {
    format!(
        "http://localhost:8001/api/v1/namespaces/{namespace}/services/m3coordinator-{name}:coordinator/proxy"
    )
}

/// Provider of per-cluster admin clients
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
pub trait ClientProvider: Send + Sync {
    /// Placement client for the given cluster
    fn placement_client(&self, name: &str, namespace: &str) -> Result<Arc<dyn PlacementClient>>;

    /// Namespace client for the given cluster
    fn namespace_client(&self, name: &str, namespace: &str) -> Result<Arc<dyn NamespaceClient>>;
}

struct ClusterClients {
    placement: Arc<dyn PlacementClient>,
    namespaces: Arc<dyn NamespaceClient>,
}

/// Lazily-initialized cache of admin clients keyed by `<namespace>/<name>`.
///
/// The map is concurrent; creation races on the same key are resolved by
/// the entry API so each cluster gets exactly one client pair.
pub struct AdminClientRegistry {
    http: reqwest::Client,
    url_fn: ClusterUrlFn,
    clients: DashMap<String, Arc<ClusterClients>>,
}

impl AdminClientRegistry {
    /// Create a registry resolving coordinator service DNS names
    pub fn new() -> Self {
        Self::with_url_fn(cluster_url)
    }

    /// Create a registry with a custom URL function (kubectl proxy mode)
    pub fn with_url_fn(url_fn: ClusterUrlFn) -> Self {
        Self {
            http: reqwest::Client::new(),
            url_fn,
            clients: DashMap::new(),
        }
    }

    fn clients_for(&self, name: &str, namespace: &str) -> Arc<ClusterClients> {
        let key = format!("{namespace}/{name}");
        self.clients
            .entry(key)
            .or_insert_with(|| {
                let base_url = (self.url_fn)(name, namespace);
                let client = Client::new(self.http.clone(), base_url, name);
                Arc::new(ClusterClients {
                    placement: Arc::new(HttpPlacementClient::new(client.clone())),
                    namespaces: Arc::new(HttpNamespaceClient::new(client)),
                })
            })
            .clone()
    }
}

impl Default for AdminClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientProvider for AdminClientRegistry {
    fn placement_client(&self, name: &str, namespace: &str) -> Result<Arc<dyn PlacementClient>> {
        Ok(self.clients_for(name, namespace).placement.clone())
    }

    fn namespace_client(&self, name: &str, namespace: &str) -> Result<Arc<dyn NamespaceClient>> {
        Ok(self.clients_for(name, namespace).namespaces.clone())
    }
}
