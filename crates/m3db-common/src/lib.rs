//! Common types for the M3DB operator: the M3DBCluster CRD, errors, Kubernetes
//! Event publishing, and the label/annotation vocabulary.

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod labels;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Port the DB node serves its client protocol on
pub const PORT_CLIENT: i32 = 9000;

/// Port used for intra-cluster traffic between DB nodes
pub const PORT_CLUSTER: i32 = 9001;

/// Port of the DB node's HTTP debug/health API
pub const PORT_HTTP_NODE: i32 = 9002;

/// Port of the DB node's cluster HTTP API
pub const PORT_HTTP_CLUSTER: i32 = 9003;

/// Port exposing the DB node's debug endpoints
pub const PORT_DEBUG: i32 = 9004;

/// Port the embedded coordinator serves its API on
pub const PORT_COORDINATOR: i32 = 7201;

/// Port the embedded coordinator serves metrics on
pub const PORT_COORDINATOR_METRICS: i32 = 7203;
