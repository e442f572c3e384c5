//! M3DB Kubernetes operator
//!
//! Watches M3DBCluster resources and drives the real topology - StatefulSets,
//! Services, and the DB's internal placement of shards across instances -
//! toward the declared state. Each reconcile tick computes the single next
//! action toward convergence; event-driven re-entry carries the rest.

#![deny(missing_docs)]
#![cfg_attr(test, allow(missing_docs))]

pub mod backoff;
pub mod controller;
pub mod controller_runner;
pub mod k8s;
pub mod namespaces;
pub mod placement;
pub mod podidentity;

pub use m3db_common::{crd, error, events, labels, Error, Result};
