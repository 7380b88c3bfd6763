//! Daemon wiring: provider, bootstrap, controller and API server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use nodescale_autoscale::{Controller, Reconciler};
use nodescale_cloud::{
    AutoScalingGroupCapability, ControlPlane, Provisioner, ProvisionerConfig, SimulatedCloud,
};
use nodescale_core::DaemonConfig;
use nodescale_core::config::{ControllerSettings, ProviderConfig};
use nodescale_metrics::PrometheusClient;
use nodescale_state::{BootstrapState, StateStore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::seed::seed_autoscalers;

/// Build the control plane the config points at.
fn provider(config: &DaemonConfig) -> SimulatedCloud {
    match &config.provider {
        ProviderConfig::Simulated(simulated) => {
            info!(cluster = %config.cluster.name, "using simulated control plane");
            SimulatedCloud::from_config(&config.cluster.name, simulated)
        }
    }
}

fn provisioner(
    config: &DaemonConfig,
    cloud: &SimulatedCloud,
    settings: &ControllerSettings,
) -> Provisioner {
    let mut provisioner_config =
        ProvisionerConfig::new(config.node_role_name(), &config.cluster.image_id);
    provisioner_config.call_timeout = settings.call_timeout;
    Provisioner::new(
        ControlPlane::from_single(Arc::new(cloud.clone())),
        provisioner_config,
    )
}

/// Run the bootstrap provisioner once against a fresh provider.
pub async fn bootstrap_once(config: &DaemonConfig) -> anyhow::Result<BootstrapState> {
    let settings = config.controller_settings()?;
    let cloud = provider(config);
    let state = provisioner(config, &cloud, &settings)
        .ensure(&config.cluster.name)
        .await?;
    Ok(state)
}

pub async fn run(
    config: DaemonConfig,
    port: Option<u16>,
    data_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    info!(cluster = %config.cluster.name, "nodescale daemon starting");
    let settings = config.controller_settings()?;

    let data_dir = data_dir.unwrap_or_else(|| PathBuf::from(config.data_dir()));
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let db_path = data_dir.join("nodescale.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let cancel = CancellationToken::new();

    // ── Bootstrap ──────────────────────────────────────────────

    let cloud = provider(&config);
    let bootstrap = provisioner(&config, &cloud, &settings)
        .with_cancellation(cancel.clone())
        .ensure(&config.cluster.name)
        .await?;
    store.put_bootstrap(&bootstrap)?;

    let seeded = seed_autoscalers(&store, &config.autoscalers)?;
    info!(seeded, "autoscalers loaded from config");

    // ── Controller ─────────────────────────────────────────────

    let metrics = PrometheusClient::new(&config.metrics.prometheus_url, config.metrics_timeout()?)?;
    info!(endpoint = %metrics.endpoint(), "metric source configured");
    let node_groups = AutoScalingGroupCapability::new(Arc::new(cloud.clone()));
    let reconciler = Reconciler::new(
        store.clone(),
        Arc::new(metrics),
        Arc::new(node_groups),
        settings.call_timeout,
    );
    let controller = Controller::new(reconciler, store.clone(), &settings)
        .with_node_group_events(cloud.node_group_events());
    let queue = controller.queue();
    let controller_handle = tokio::spawn(controller.run(cancel.clone()));

    // ── API server ─────────────────────────────────────────────

    let router = nodescale_api::build_router(store, queue);
    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(config.api_port())));
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown = cancel.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = ctrl_c() => info!("shutdown signal received"),
                _ = shutdown.cancelled() => {}
            }
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    controller_handle.await?;
    info!("nodescale daemon stopped");
    Ok(())
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
}
