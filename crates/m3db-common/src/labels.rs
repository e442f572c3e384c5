//! Label and annotation vocabulary shared by everything the operator creates.
//!
//! Every object the operator generates carries the base labels; the cluster
//! label is how pods are mapped back to their owning cluster, and the
//! isolation-group label is how StatefulSets and placement instances are
//! matched to spec groups.

use std::collections::BTreeMap;

/// Label identifying any object managed by this operator
pub const APP: &str = "operator.m3db.io/app";

/// Value of the [`APP`] label
pub const APP_VALUE: &str = "m3db";

/// Label naming the owning M3DBCluster
pub const CLUSTER: &str = "operator.m3db.io/cluster";

/// Label naming the isolation group a StatefulSet (and its pods) belongs to
pub const ISOLATION_GROUP: &str = "operator.m3db.io/isolation-group";

/// Label naming the component role of an object
pub const COMPONENT: &str = "operator.m3db.io/component";

/// Component value for DB node objects
pub const COMPONENT_M3DBNODE: &str = "m3dbnode";

/// Component value for coordinator objects
pub const COMPONENT_COORDINATOR: &str = "coordinator";

/// Annotation carrying a pod's canonical serialized identity
pub const ANNOTATION_POD_IDENTITY: &str = "operator.m3db.io/pod-identity";

/// Annotation marking a pod as not yet bootstrapped into the placement.
///
/// Stamped on every pod via the StatefulSet template and cleared by the
/// controller once the pod's placement instance reports available.
pub const ANNOTATION_BOOTSTRAPPING: &str = "operator.m3db.io/bootstrapping";

/// Base labels carried by every object belonging to a cluster
pub fn base_labels(cluster_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP.to_string(), APP_VALUE.to_string()),
        (CLUSTER.to_string(), cluster_name.to_string()),
    ])
}

/// Base labels rendered as a Kubernetes label selector string
pub fn base_selector(cluster_name: &str) -> String {
    format!("{}={},{}={}", APP, APP_VALUE, CLUSTER, cluster_name)
}
