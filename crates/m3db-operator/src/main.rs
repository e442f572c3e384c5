//! M3DB operator - reconciles declarative DB cluster topology on Kubernetes

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use m3db_admin::{cluster_url_proxy, AdminClientRegistry};
use m3db_operator::controller::Context;
use m3db_operator::controller_runner::run_controllers;
use m3db_operator::crd::M3DBCluster;
use m3db_operator::k8s::ensure_crd_installed;

/// M3DB operator - CRD-driven topology management for M3DB clusters
#[derive(Parser, Debug)]
#[command(name = "m3db-operator", version, about, long_about = None)]
struct Cli {
    /// Default log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Path to a kubeconfig file; in-cluster config when unset
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Concurrent reconciliations per controller
    #[arg(long, default_value_t = 1)]
    workers: u16,

    /// Reach coordinators through a local `kubectl proxy` instead of
    /// cluster DNS (development mode)
    #[arg(long)]
    kubectl_proxy: bool,

    /// Print the M3DBCluster CRD manifest and exit
    #[arg(long)]
    crd: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    if cli.crd {
        let crd = serde_yaml::to_string(&M3DBCluster::crd())
            .map_err(|e| anyhow::anyhow!("failed to serialize CRD: {e}"))?;
        println!("{crd}");
        return Ok(());
    }

    tracing::info!("M3DB operator starting");

    let client = match &cli.kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .map_err(|e| anyhow::anyhow!("failed to read kubeconfig: {e}"))?;
            let config =
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| anyhow::anyhow!("failed to load kubeconfig: {e}"))?;
            Client::try_from(config)
                .map_err(|e| anyhow::anyhow!("failed to create Kubernetes client: {e}"))?
        }
        None => Client::try_default()
            .await
            .map_err(|e| anyhow::anyhow!("failed to create Kubernetes client: {e}"))?,
    };

    // The operator installs its own CRD on startup so the served version
    // always matches the binary. Failure here is fatal.
    ensure_crd_installed(&client)
        .await
        .map_err(|e| anyhow::anyhow!("failed to install CRD: {e}"))?;

    let registry = if cli.kubectl_proxy {
        tracing::info!("using kubectl proxy for admin endpoints");
        AdminClientRegistry::with_url_fn(cluster_url_proxy)
    } else {
        AdminClientRegistry::new()
    };

    let ctx = Arc::new(Context::new(client.clone(), Arc::new(registry)));
    run_controllers(client, ctx, cli.workers).await;

    tracing::info!("M3DB operator shutting down");
    Ok(())
}
