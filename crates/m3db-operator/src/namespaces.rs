//! Namespace coordination: converging the declared namespace list with the
//! DB's live registry.
//!
//! Works on the symmetric difference of declared vs live names and commits
//! at most one admin write per call, so the caller keeps its
//! one-mutation-per-tick contract. Mutations are idempotent: re-creating
//! after a delete is safe, and re-adding an existing namespace is a no-op
//! on the DB side.

use std::collections::BTreeSet;

use tracing::info;

use m3db_admin::namespace::{CreateRequest, NamespaceClient};
use m3db_admin::presets;
use m3db_common::crd::{M3DBCluster, NamespaceOptions, NamespaceSpec};
use m3db_common::{Error, Result};

/// Expand a declared namespace to its concrete options.
///
/// Presets expand through the closed table; an unknown preset or a
/// namespace with neither preset nor options is a spec validation error.
pub fn declared_options(cluster_name: &str, ns: &NamespaceSpec) -> Result<NamespaceOptions> {
    if let Some(options) = &ns.options {
        return Ok(options.clone());
    }
    match &ns.preset {
        Some(preset) => presets::expand(preset).ok_or_else(|| {
            Error::validation_for(
                cluster_name,
                format!("namespace {} uses unknown preset {preset}", ns.name),
            )
        }),
        None => Err(Error::validation_for(
            cluster_name,
            format!("namespace {} has neither preset nor options", ns.name),
        )),
    }
}

/// Converge declared namespaces toward the live list by one step.
///
/// Creates the first missing declared namespace, else deletes the first
/// live namespace no longer declared. Returns whether a mutation was
/// issued.
pub async fn reconcile_namespaces(
    cluster: &M3DBCluster,
    client: &dyn NamespaceClient,
) -> Result<bool> {
    let cluster_name = cluster.metadata.name.as_deref().unwrap_or_default();
    let live: BTreeSet<String> = client.list().await?.into_iter().collect();
    let declared: BTreeSet<&str> = cluster
        .spec
        .namespaces
        .iter()
        .map(|ns| ns.name.as_str())
        .collect();

    for ns in &cluster.spec.namespaces {
        if live.contains(&ns.name) {
            continue;
        }
        let options = declared_options(cluster_name, ns)?;
        info!(cluster = %cluster_name, namespace = %ns.name, "creating namespace");
        client
            .create(CreateRequest {
                name: ns.name.clone(),
                options,
            })
            .await?;
        return Ok(true);
    }

    for name in &live {
        if declared.contains(name.as_str()) {
            continue;
        }
        info!(cluster = %cluster_name, namespace = %name, "deleting namespace not in spec");
        client.delete(name).await?;
        return Ok(true);
    }

    Ok(false)
}
