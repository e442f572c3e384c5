//! M3DBCluster Custom Resource Definition
//!
//! An M3DBCluster declares the desired topology of one DB cluster: the node
//! image, how shards replicate across isolation groups, and which logical
//! data namespaces exist. The controller drives StatefulSets, Services, and
//! the DB's placement to match.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::core::v1::{PersistentVolumeClaim, ResourceRequirements};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    rfc3339_now, ClusterState, Condition, ConditionStatus, IsolationGroup, NamespaceSpec,
    PodIdentityConfig, CONDITION_PLACEMENT_INITIALIZED,
};

/// Specification for an M3DBCluster
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "operator.m3db.io",
    version = "v1",
    kind = "M3DBCluster",
    plural = "m3dbclusters",
    shortname = "m3db",
    status = "M3DBClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Shards","type":"integer","jsonPath":".spec.numberOfShards"}"#,
    printcolumn = r#"{"name":"ReplicationFactor","type":"integer","jsonPath":".spec.replicationFactor"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct M3DBClusterSpec {
    /// DB node container image
    #[serde(default = "default_image")]
    pub image: String,

    /// Number of copies of each shard. Must equal the number of isolation
    /// groups so that every replica lands in a distinct failure domain.
    pub replication_factor: i32,

    /// Number of shards data is partitioned into. Immutable once the
    /// placement has been initialized.
    pub number_of_shards: i32,

    /// Failure domains and how many instances each holds. The sum of
    /// `numInstances` is the target total instance count.
    #[serde(default)]
    pub isolation_groups: Vec<IsolationGroup>,

    /// Logical data namespaces to maintain on the DB
    #[serde(default)]
    pub namespaces: Vec<NamespaceSpec>,

    /// Pod identity configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_identity_config: Option<PodIdentityConfig>,

    /// Resources for the DB node container, passed through to the
    /// StatefulSet template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_resources: Option<ResourceRequirements>,

    /// Volume claim template for each node's data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir_volume_claim_template: Option<PersistentVolumeClaim>,

    /// Name of the ConfigMap holding the DB node configuration. Defaults to
    /// `m3db-config-<cluster>` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_name: Option<String>,

    /// Extra labels applied to every generated object
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Placement weight for each instance (default 100)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_weight: Option<u32>,
}

fn default_image() -> String {
    "quay.io/m3db/m3dbnode:latest".to_string()
}

impl M3DBClusterSpec {
    /// Isolation groups sorted by name.
    ///
    /// Group index in this ordering is what numbers StatefulSets, so the
    /// ordering must be deterministic across ticks.
    pub fn sorted_isolation_groups(&self) -> Vec<IsolationGroup> {
        let mut groups = self.isolation_groups.clone();
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        groups
    }

    /// Total desired instance count across all isolation groups
    pub fn total_instances(&self) -> i32 {
        self.isolation_groups.iter().map(|g| g.num_instances).sum()
    }

    /// Validate the parts of the spec the placement depends on.
    ///
    /// Called before placement initialization: the replication factor must
    /// equal the isolation-group count and the shard count must be positive.
    pub fn validate_placement(&self, cluster: &str) -> Result<(), crate::Error> {
        if self.replication_factor != self.isolation_groups.len() as i32 {
            return Err(crate::Error::validation_for(
                cluster,
                format!(
                    "replication factor {} does not match {} isolation groups",
                    self.replication_factor,
                    self.isolation_groups.len()
                ),
            ));
        }
        if self.number_of_shards <= 0 {
            return Err(crate::Error::validation_for(
                cluster,
                format!("number of shards must be positive, got {}", self.number_of_shards),
            ));
        }
        Ok(())
    }

    /// Validate structural spec invariants: unique group and namespace names
    pub fn validate(&self, cluster: &str) -> Result<(), crate::Error> {
        let mut group_names = BTreeSet::new();
        for g in &self.isolation_groups {
            if !group_names.insert(g.name.as_str()) {
                return Err(crate::Error::validation_for(
                    cluster,
                    format!("duplicate isolation group {}", g.name),
                ));
            }
            if g.num_instances < 0 {
                return Err(crate::Error::validation_for(
                    cluster,
                    format!("isolation group {} has negative instance count", g.name),
                ));
            }
        }
        let mut ns_names = BTreeSet::new();
        for ns in &self.namespaces {
            if !ns_names.insert(ns.name.as_str()) {
                return Err(crate::Error::validation_for(
                    cluster,
                    format!("duplicate namespace {}", ns.name),
                ));
            }
        }
        Ok(())
    }
}

/// Observed status of an M3DBCluster, owned by the controller
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct M3DBClusterStatus {
    /// Coarse cluster health
    #[serde(default)]
    pub state: ClusterState,

    /// Human-readable message about current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// The spec generation the controller last fully converged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions representing cluster state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl M3DBClusterStatus {
    /// Look up a condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// True once the PlacementInitialized condition is True
    pub fn has_initialized_placement(&self) -> bool {
        self.condition(CONDITION_PLACEMENT_INITIALIZED)
            .map(Condition::is_true)
            .unwrap_or(false)
    }

    /// Set a condition, replacing any existing condition of the same type.
    ///
    /// The transition time only advances when the status actually changes;
    /// the update time advances on every call.
    pub fn set_condition(
        &mut self,
        type_: &str,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) {
        let now = rfc3339_now();
        match self.conditions.iter_mut().find(|c| c.type_ == type_) {
            Some(existing) => {
                if existing.status != status {
                    existing.last_transition_time = Some(now.clone());
                }
                existing.status = status;
                existing.last_update_time = Some(now);
                existing.reason = reason.into();
                existing.message = message.into();
            }
            None => {
                let mut c = Condition::new(type_, status, reason, message);
                c.last_transition_time = c.last_update_time.clone();
                self.conditions.push(c);
            }
        }
    }
}

impl M3DBCluster {
    /// The cluster's status, defaulting when the controller has not yet
    /// written one
    pub fn status_or_default(&self) -> M3DBClusterStatus {
        self.status.clone().unwrap_or_default()
    }

    /// Name of the headless service governing DB node pods
    pub fn node_service_name(&self) -> String {
        format!("m3dbnode-{}", self.metadata.name.as_deref().unwrap_or_default())
    }

    /// Name of the coordinator service
    pub fn coordinator_service_name(&self) -> String {
        format!(
            "m3coordinator-{}",
            self.metadata.name.as_deref().unwrap_or_default()
        )
    }

    /// Name of the ConfigMap mounted into DB node pods
    pub fn config_map_name(&self) -> String {
        self.spec.config_map_name.clone().unwrap_or_else(|| {
            format!("m3db-config-{}", self.metadata.name.as_deref().unwrap_or_default())
        })
    }
}
