//! Node Simulator - periodic synthetic telemetry for registered IoT nodes
//!
//! This service runs one job per started node. Each job generates a reading
//! from the node's parameter ranges, delivers it to the oneM2M sink and logs
//! the outcome, then sleeps for the node's frequency.
//!
//! ## Features
//!
//! - Start/stop node jobs over HTTP, at most one job per node
//! - Per-node JSON delivery logs
//! - Live delivery stream over server-sent events
//! - Graceful shutdown on SIGINT
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! - `NODE_SIM_LISTEN_ADDR`: Control surface address (default: 0.0.0.0:8000)
//! - `NODE_SIM_SINK_URL`: Sink base URL (default: https://ccsp.m2m.cdot.in)
//! - `NODE_SIM_CLIENT_CERT` / `NODE_SIM_CLIENT_KEY`: PEM client identity
//! - `NODE_SIM_LOG_DIR`: Delivery log directory (default: logs)
//! - `NODE_SIM_EVENT_TICK_SECS`: Event stream cadence (default: 1)
//! - `NODE_SIM_NODES_FILE`: JSON seed for the node store
//! - `RUST_LOG`: Logging level filter (default: info)

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use node_simulator::api::{build_router, AppState};
use node_simulator::config::Config;
use node_simulator::delivery_log::DeliveryLog;
use node_simulator::events::EventStream;
use node_simulator::registry::TaskRegistry;
use node_simulator::store::MemoryNodeStore;
use node_simulator::transmitter::HttpsTransmitter;

/// Upper bound on waiting for running jobs to exit at shutdown
const SHUTDOWN_TIMEOUT_SECS: u64 = 10;

#[tokio::main]
async fn main() {
    init_tracing();

    info!("Starting Node Simulator service...");

    let config = match Config::from_env() {
        Ok(config) => {
            info!(
                listen_addr = %config.listen_addr,
                sink_url = %config.sink.base_url,
                log_dir = %config.log_dir.display(),
                event_tick_secs = config.event_tick.as_secs(),
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let store = match &config.nodes_file {
        Some(path) => match MemoryNodeStore::load(path) {
            Ok(store) => {
                info!(path = %path.display(), nodes = store.list().len(), "Node store seeded");
                store
            }
            Err(e) => {
                error!(error = %e, "Failed to seed node store");
                std::process::exit(1);
            }
        },
        None => {
            warn!("NODE_SIM_NODES_FILE not set, node store starts empty");
            MemoryNodeStore::new()
        }
    };

    let log = Arc::new(DeliveryLog::new(&config.log_dir));
    let transmitter = match HttpsTransmitter::new(&config.sink, log) {
        Ok(transmitter) => {
            info!(sink_url = %config.sink.base_url, "Transmitter initialized");
            Arc::new(transmitter)
        }
        Err(e) => {
            error!(error = %e, "Failed to create transmitter");
            std::process::exit(1);
        }
    };

    let store = Arc::new(store);
    let registry = Arc::new(TaskRegistry::new(store.clone(), transmitter.clone()));
    let events = EventStream::new(registry.clone(), config.event_tick);
    let events_shutdown = events.shutdown_token();
    let router = build_router(Arc::new(AppState::new(registry.clone(), events, store)));

    let listener = match TcpListener::bind(config.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, addr = %config.listen_addr, "Failed to bind listener");
            std::process::exit(1);
        }
    };

    info!(addr = %config.listen_addr, "Node Simulator running. Press Ctrl+C to stop.");
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received, stopping..."),
                Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
            }
            // Open event streams would otherwise hold the server open
            events_shutdown.cancel();
        })
        .await;
    if let Err(e) = served {
        error!(error = %e, "Server error");
    }

    info!("Initiating graceful shutdown...");

    let shutdown_timeout = Duration::from_secs(SHUTDOWN_TIMEOUT_SECS);
    match tokio::time::timeout(shutdown_timeout, registry.stop_all()).await {
        Ok(outcomes) => {
            info!(jobs = outcomes.len(), "Jobs shut down gracefully");
        }
        Err(_) => {
            warn!("Job shutdown timed out after {:?}", shutdown_timeout);
        }
    }

    let stats = transmitter.stats();
    info!(sent = stats.sent, failed = stats.failed, "Node Simulator stopped");
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}
