//! Typed clients for the M3DB admin HTTP API.
//!
//! The operator talks to each cluster's coordinator over plain HTTP: the
//! placement API owns which instances hold which shards, and the namespace
//! API owns the logical data namespaces. Clients are created lazily per
//! cluster through [`AdminClientRegistry`] and bound to the cluster's
//! coordinator service DNS name (or a kubectl-proxy rewrite of it during
//! development).

#![deny(missing_docs)]
#![cfg_attr(any(test, feature = "mocks"), allow(missing_docs))]

mod client;
pub mod namespace;
pub mod placement;
pub mod presets;
mod registry;

pub use client::Client;
pub use namespace::NamespaceClient;
pub use placement::PlacementClient;
pub use registry::{
    cluster_url, cluster_url_proxy, AdminClientRegistry, ClientProvider, ClusterUrlFn,
};

#[cfg(any(test, feature = "mocks"))]
pub use namespace::MockNamespaceClient;
#[cfg(any(test, feature = "mocks"))]
pub use placement::MockPlacementClient;
#[cfg(any(test, feature = "mocks"))]
pub use registry::MockClientProvider;
