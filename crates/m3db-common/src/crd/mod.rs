//! Custom Resource Definitions served by the operator

mod cluster;
mod types;

pub use cluster::{M3DBCluster, M3DBClusterSpec, M3DBClusterStatus};
pub use types::{
    ClusterState, Condition, ConditionStatus, IndexOptions, IsolationGroup, MismatchPolicy,
    NamespaceOptions, NamespaceSpec, PodIdentityConfig, PodIdentitySource, RetentionOptions,
    CONDITION_PLACEMENT_INITIALIZED, CONDITION_PODS_BOOTSTRAPPING,
};
