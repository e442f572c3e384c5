//! Placement API: the DB's runtime map of instance -> owned shards.
//!
//! The operator never manipulates shards directly; it initializes the
//! placement once, then adds and removes whole instances and lets the DB
//! move shards. Instance payloads use the admin API's snake_case JSON.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Client;
use m3db_common::Result;

/// Availability of one placement instance.
///
/// An instance becomes `Available` once it finishes bootstrapping; removals
/// pass through `Leaving` while shards drain to their new owners.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InstanceAvailability {
    /// Bootstrapped and serving all of its shards
    Available,
    /// Still loading local or peer data
    #[default]
    Initializing,
    /// Being removed; shards draining away
    Leaving,
}

/// One DB instance in the placement
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Instance {
    /// Instance id (the pod name)
    pub id: String,

    /// Isolation group the instance counts toward
    pub isolation_group: String,

    /// Zone, mirrored from the isolation group
    #[serde(default)]
    pub zone: String,

    /// Relative share of shards this instance receives
    #[serde(default)]
    pub weight: u32,

    /// host:port the DB client protocol is reachable on
    #[serde(default)]
    pub endpoint: String,

    /// Stable DNS hostname of the instance
    #[serde(default)]
    pub hostname: String,

    /// DB client protocol port
    #[serde(default)]
    pub port: u32,

    /// Current availability; absent in write payloads
    #[serde(default)]
    pub availability: InstanceAvailability,
}

impl Instance {
    /// True once the instance has bootstrapped
    pub fn is_available(&self) -> bool {
        self.availability == InstanceAvailability::Available
    }
}

/// The full placement as returned by the admin API
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Placement {
    /// Instances keyed by id
    #[serde(default)]
    pub instances: BTreeMap<String, Instance>,

    /// Number of copies of each shard
    #[serde(default)]
    pub replica_factor: i32,

    /// Number of shards data is partitioned into
    #[serde(default)]
    pub num_shards: i32,

    /// Placement version, bumped on every change
    #[serde(default)]
    pub version: i32,
}

impl Placement {
    /// Number of instances in the placement
    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    /// Instances belonging to the given isolation group
    pub fn instances_in_group<'a>(&'a self, group: &'a str) -> impl Iterator<Item = &'a Instance> {
        self.instances
            .values()
            .filter(move |i| i.isolation_group == group)
    }

    /// Ids of instances that are not yet available
    pub fn unavailable_instances(&self) -> Vec<&str> {
        self.instances
            .values()
            .filter(|i| !i.is_available())
            .map(|i| i.id.as_str())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct PlacementResponse {
    placement: Placement,
}

/// Request initializing a placement from scratch
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct InitRequest {
    /// Initial instance set
    pub instances: Vec<Instance>,

    /// Number of copies of each shard
    pub replication_factor: i32,

    /// Number of shards data is partitioned into
    pub num_shards: i32,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
struct AddRequest<'a> {
    instances: &'a [Instance],
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
struct ReplaceRequest<'a> {
    leaving_instance_ids: Vec<&'a str>,
    candidates: &'a [Instance],
}

/// Operations on a cluster's placement
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait PlacementClient: Send + Sync {
    /// Initialize the placement with the given instances, replication
    /// factor, and shard count. Fails if a placement already exists.
    async fn init(&self, request: InitRequest) -> Result<()>;

    /// Fetch the current placement
    async fn get(&self) -> Result<Placement>;

    /// Add instances to the placement; the DB redistributes shards to them
    async fn add(&self, instances: Vec<Instance>) -> Result<()>;

    /// Remove an instance; it transitions to leaving while shards drain
    async fn remove(&self, id: &str) -> Result<()>;

    /// Replace an instance with a candidate carrying a new identity
    async fn replace(&self, leaving_id: &str, candidate: Instance) -> Result<()>;
}

/// HTTP implementation backed by a coordinator endpoint
pub struct HttpPlacementClient {
    client: Client,
}

impl HttpPlacementClient {
    /// Wrap the given base client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PlacementClient for HttpPlacementClient {
    async fn init(&self, request: InitRequest) -> Result<()> {
        self.client.post_json("/api/v1/placement/init", &request).await
    }

    async fn get(&self) -> Result<Placement> {
        let resp: PlacementResponse = self.client.get_json("/api/v1/placement").await?;
        Ok(resp.placement)
    }

    async fn add(&self, instances: Vec<Instance>) -> Result<()> {
        self.client
            .post_json("/api/v1/placement", &AddRequest { instances: &instances })
            .await
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.client.delete(&format!("/api/v1/placement/{id}")).await
    }

    async fn replace(&self, leaving_id: &str, candidate: Instance) -> Result<()> {
        self.client
            .post_json(
                "/api/v1/placement/replace",
                &ReplaceRequest {
                    leaving_instance_ids: vec![leaving_id],
                    candidates: std::slice::from_ref(&candidate),
                },
            )
            .await
    }
}
