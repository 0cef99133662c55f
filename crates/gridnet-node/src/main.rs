//! Gridnet regional node.
//!
//! Wires the signaling router, task engine, global coordinator, task-backup
//! helper, DHT overlay and HTTP surface together and runs them until a
//! shutdown signal arrives. All state is in-memory and process-scoped.

mod backup;
mod config;
mod coordinator;
mod engine;
mod http;
mod metrics;
mod registry;
mod router;

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use gridnet_dht::{DhtConfig, DhtMetadata, DhtNetwork, DhtNodeInfo, TcpDhtTransport};

use crate::backup::TaskBackupService;
use crate::config::NodeConfig;
use crate::coordinator::{CoordinatorConfig, GlobalCoordinator};
use crate::engine::{EngineConfig, TaskEngine};
use crate::metrics::{HealthThresholds, MetricsRecorder};
use crate::registry::PeerRegistry;
use crate::router::SignalingRouter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = NodeConfig::parse();
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    }

    let node_id = config.effective_node_id();
    info!(
        node_id = %node_id,
        node_type = %config.node_type,
        node_tier = %config.node_tier,
        region = %config.region,
        "Starting Gridnet node"
    );

    // Core components
    let registry = Arc::new(PeerRegistry::new());
    let engine = TaskEngine::new(
        Arc::clone(&registry),
        EngineConfig {
            task_timeout: config.task_timeout(),
            min_duration_ms: config.task_min_duration_ms,
            max_duration_ms: config.task_max_duration_ms,
            max_nodes_per_task: config.max_nodes_per_task,
            retention: Duration::from_secs(config.task_retention_secs),
        },
    );
    let metrics = Arc::new(MetricsRecorder::new(HealthThresholds {
        min_active_ratio: config.min_active_ratio,
        min_validators: config.min_validators,
    }));
    let coordinator = GlobalCoordinator::new(
        Arc::clone(&registry),
        Arc::clone(&engine),
        Arc::clone(&metrics),
        CoordinatorConfig {
            health_interval: Duration::from_secs(config.health_interval_secs),
            probe_timeout: Duration::from_millis(config.probe_timeout_ms),
            sync_interval: Duration::from_secs(config.sync_interval_secs),
            responsiveness_step: 20.0,
        },
    );
    let backup = TaskBackupService::new(
        Arc::clone(&registry),
        Arc::clone(&engine),
        Duration::from_secs(config.backup_interval_secs),
    );
    let router = SignalingRouter::new(
        Arc::clone(&registry),
        Arc::clone(&engine),
        Arc::clone(&coordinator),
        Arc::clone(&metrics),
        config.clone(),
    );

    // DHT overlay
    let dht_address = format!("0.0.0.0:{}", config.dht_port);
    let self_info = DhtNodeInfo::new(node_id.clone(), dht_address.clone()).with_metadata(
        DhtMetadata {
            node_type: Some(config.node_type.clone()),
            node_tier: Some(config.node_tier.clone()),
            region: Some(config.region.clone()),
            token_balance: config.token_balance,
            direct: false,
        },
    );
    let dht = DhtNetwork::new(
        self_info,
        config.bootstrap_addrs(),
        DhtConfig {
            refresh_interval: Duration::from_secs(config.dht_refresh_secs),
            request_timeout: Duration::from_secs(config.dht_timeout_secs),
            replication_factor: config.dht_replication,
            staleness_secs: config.dht_staleness_secs,
            reconnect_attempts: config.dht_reconnect_attempts,
        },
        Arc::new(TcpDhtTransport::new(Duration::from_secs(
            config.dht_timeout_secs,
        ))),
    );

    // Listeners
    let signaling_listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "Signaling listening");
    let dht_listener = TcpListener::bind(("0.0.0.0", config.dht_port)).await?;
    info!(port = config.dht_port, "DHT listening");
    let http_listener = TcpListener::bind(("0.0.0.0", config.http_port)).await?;
    info!(port = config.http_port, "HTTP surface listening");

    // Bring everything up
    dht.serve(dht_listener);
    dht.join().await?;
    if let Err(e) = dht.announce().await {
        warn!(error = %e, "Initial announce failed");
    }

    router.run(signaling_listener);
    coordinator.start();
    backup.start();
    engine.start_gc(Duration::from_secs(config.cleanup_interval_secs));

    let app = http::create_router(http::AppState {
        registry: Arc::clone(&registry),
        engine: Arc::clone(&engine),
        coordinator: Arc::clone(&coordinator),
        metrics: Arc::clone(&metrics),
    });
    let http_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(http_listener, app).await {
            error!(error = %e, "HTTP surface failed");
        }
    });

    info!("Gridnet node running");
    shutdown_signal().await;
    info!("Shutting down");

    // Orderly teardown: stop timers, leave the overlay, drop the surface
    router.shutdown();
    coordinator.shutdown();
    backup.shutdown();
    engine.shutdown();
    dht.leave().await;
    http_handle.abort();

    info!("Gridnet node stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
