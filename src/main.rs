use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{self, EnvFilter};

use address_watcher::api;
use address_watcher::indexer::SubscriptionCoordinator;
use address_watcher::metrics::Metrics;
use address_watcher::storage::InMemoryStore;
use address_watcher::transport::JsonRpcTransport;
use address_watcher::utils::load_config;

const DEFAULT_CONFIG_PATH: &str = "config.yml";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    println!();
    info!("=========================== INITIALIZING ===========================");

    // Load config
    let config_path =
        std::env::var("WATCHER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = match load_config(&config_path) {
        Ok(config) => {
            info!("Config loaded successfully");
            config
        }
        Err(e) => {
            error!("Failed to load config: {:#}", e);
            return Err(e);
        }
    };

    info!("RPC URL: {}", config.rpc_url);
    info!("WebSocket URL: {}", config.ws_url);
    info!("Queue capacity per subscription: {}", config.stream.queue_capacity);

    // Initialize optional metrics
    let metrics = if config.metrics.enabled {
        Some(Metrics::new()?)
    } else {
        info!("Metrics are disabled");
        None
    };

    // Start metrics server if metrics are enabled
    if let Some(metrics_instance) = &metrics {
        metrics_instance
            .start_metrics_server(&config.metrics.address, config.metrics.port)
            .await?;
    }

    let transport = Arc::new(JsonRpcTransport::new(&config, metrics.clone()));
    let store = Arc::new(InMemoryStore::new());
    let coordinator = Arc::new(SubscriptionCoordinator::new(transport, store, metrics));

    let addr = format!("{}:{}", config.server.address, config.server.port)
        .parse::<SocketAddr>()
        .context("invalid server bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    println!();
    info!("========================= STARTING WATCHER =========================");
    info!("Listening on {}", addr);

    axum::serve(listener, api::router(coordinator.clone()))
        .with_graceful_shutdown(async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
            info!("Received Ctrl+C signal, initiating shutdown...");
        })
        .await
        .context("server error")?;

    // Stop watchers once no more requests can arrive
    if let Err(e) = coordinator.shutdown(config.shutdown_timeout()).await {
        error!("Error during shutdown: {}", e);
    }

    info!("Shut down cleanly");
    Ok(())
}
