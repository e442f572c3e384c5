//! Supporting types for the M3DBCluster CRD

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type set once the DB placement has been initialized
pub const CONDITION_PLACEMENT_INITIALIZED: &str = "PlacementInitialized";

/// Condition type set while placement instances are still bootstrapping
pub const CONDITION_PODS_BOOTSTRAPPING: &str = "PodsBootstrapping";

/// A failure-correlation boundary (rack, zone). Each replica of the data
/// lives in a distinct isolation group.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IsolationGroup {
    /// Name of the isolation group (e.g. a zone name). Unique per cluster.
    pub name: String,

    /// Desired number of DB instances in this group
    pub num_instances: i32,
}

/// A logical data namespace to create on the DB, either from a preset or
/// with fully spelled-out options.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSpec {
    /// Namespace name. Unique per cluster.
    pub name: String,

    /// Named preset expanding to a fixed set of retention+index options.
    /// Mutually exclusive with `options`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,

    /// Explicit namespace options. Mutually exclusive with `preset`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<NamespaceOptions>,
}

/// Retention and indexing configuration under which series are stored.
///
/// Durations are nanoseconds, matching the admin wire format.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceOptions {
    /// Data retention configuration
    pub retention: RetentionOptions,

    /// Reverse-index configuration
    pub index: IndexOptions,
}

/// How long data is kept and how it is blocked on disk
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RetentionOptions {
    /// Total retention period in nanoseconds
    pub retention_period_nanos: i64,

    /// Block size in nanoseconds
    pub block_size_nanos: i64,

    /// How far into the future writes are accepted, in nanoseconds
    pub buffer_future_nanos: i64,

    /// How far into the past writes are accepted, in nanoseconds
    pub buffer_past_nanos: i64,

    /// Whether blocks expire with the data they hold
    #[serde(default)]
    pub block_data_expiry: bool,
}

/// Reverse-index configuration for a namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IndexOptions {
    /// Whether the reverse index is enabled
    #[serde(default)]
    pub enabled: bool,

    /// Index block size in nanoseconds
    pub block_size_nanos: i64,
}

/// Sources contributing to a pod's identity beyond its name.
///
/// The pod name always contributes; these select what else does. Identity
/// determines whether a re-created pod is treated as the same DB instance.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PodIdentitySource {
    /// The pod's UID (changes on every re-creation)
    PodUid,
    /// Name of the node the pod is scheduled on
    NodeName,
    /// The node's external ID
    NodeExternalId,
    /// The node's cloud provider ID
    NodeProviderId,
}

/// Policy applied when a pod's computed identity differs from the sticky
/// annotated identity.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MismatchPolicy {
    /// Log and emit a warning event; never rewrite the annotation (default)
    #[default]
    Warn,
    /// Replace the instance in the DB placement with the pod's new identity
    Replace,
}

/// Pod identity configuration for a cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PodIdentityConfig {
    /// Identity sources beyond the pod name. Empty defaults to the pod UID.
    #[serde(default)]
    pub sources: Vec<PodIdentitySource>,

    /// What to do when a pod's identity no longer matches its annotation
    #[serde(default)]
    pub mismatch_policy: MismatchPolicy,
}

/// Coarse health of a cluster as observed by the operator
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClusterState {
    /// Fully converged: all groups at size, placement available
    Green,
    /// Converging: groups scaling or instances bootstrapping
    #[default]
    Yellow,
    /// An error state requiring attention
    Red,
}

/// Truth value of a condition
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// The condition holds
    True,
    /// The condition does not hold
    False,
    /// The condition's state cannot be determined
    #[default]
    Unknown,
}

/// A timestamped observation about one aspect of cluster state
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (e.g. "PlacementInitialized")
    #[serde(rename = "type")]
    pub type_: String,

    /// Current status of the condition
    pub status: ConditionStatus,

    /// When the condition was last refreshed (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,

    /// When the condition last changed status (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,

    /// Machine-readable reason for the last transition
    #[serde(default)]
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,
}

impl Condition {
    /// Create a condition stamped with the current time
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let now = rfc3339_now();
        Self {
            type_: type_.into(),
            status,
            last_update_time: Some(now.clone()),
            last_transition_time: Some(now),
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// True if the condition's status is `True`
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

pub(crate) fn rfc3339_now() -> String {
    let now: DateTime<Utc> = Utc::now();
    now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
