//! Namespace API: the logical data namespaces series are stored under

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Client;
use m3db_common::crd::NamespaceOptions;
use m3db_common::Result;

/// Request creating one namespace
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    /// Namespace name
    pub name: String,

    /// Retention and index options
    pub options: NamespaceOptions,
}

#[derive(Debug, Deserialize)]
struct RegistryResponse {
    registry: Registry,
}

#[derive(Debug, Default, Deserialize)]
struct Registry {
    #[serde(default)]
    namespaces: BTreeMap<String, serde_json::Value>,
}

/// Operations on a cluster's namespaces
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait NamespaceClient: Send + Sync {
    /// Create a namespace. Creating an existing namespace with the same
    /// options is a no-op on the DB side.
    async fn create(&self, request: CreateRequest) -> Result<()>;

    /// Names of the namespaces currently live on the DB
    async fn list(&self) -> Result<Vec<String>>;

    /// Delete a namespace and the series stored under it
    async fn delete(&self, name: &str) -> Result<()>;
}

/// HTTP implementation backed by a coordinator endpoint
pub struct HttpNamespaceClient {
    client: Client,
}

impl HttpNamespaceClient {
    /// Wrap the given base client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NamespaceClient for HttpNamespaceClient {
    async fn create(&self, request: CreateRequest) -> Result<()> {
        self.client
            .post_json("/api/v1/services/m3db/namespace", &request)
            .await
    }

    async fn list(&self) -> Result<Vec<String>> {
        let resp: RegistryResponse = self.client.get_json("/api/v1/services/m3db/namespace").await?;
        Ok(resp.registry.namespaces.into_keys().collect())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.client
            .delete(&format!("/api/v1/services/m3db/namespace/{name}"))
            .await
    }
}
