//! OBD-II Logger - Main Entry Point

use anyhow::Context;
use api::{init_logging, install_metrics, run_server, AppConfig, AppState};
use obd_connection::ConnectionManager;
use obd_protocol::{Elm327Connector, ObdConnector, SimulatedConnector};
use obd_scheduler::SampleOutput;
use ring_buffer::RingBuffer;
use std::sync::Arc;
use storage::JsonlStore;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;
    init_logging(&config.logging).context("Failed to set tracing subscriber")?;

    info!("=== OBD Logger v{} ===", env!("CARGO_PKG_VERSION"));

    let metrics = match install_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Prometheus recorder not installed");
            None
        }
    };

    let store = Arc::new(JsonlStore::new(&config.storage.log_dir));
    let buffer = Arc::new(RingBuffer::new(config.storage.buffer_size));
    let connector: Arc<dyn ObdConnector> = if config.serial.simulate {
        info!("Using simulated vehicle");
        Arc::new(SimulatedConnector)
    } else {
        Arc::new(Elm327Connector::new(config.elm327()))
    };

    let manager = Arc::new(ConnectionManager::new(
        config.manager(),
        connector,
        config.catalog(),
        SampleOutput::new(buffer, store.clone()),
        store.clone(),
    ));
    let lifecycle = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.run().await }
    });

    let state = Arc::new(AppState::new(Arc::clone(&manager), store, metrics));
    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    run_server(listener, state, shutdown_signal()).await?;

    manager.shutdown();
    lifecycle.await.context("Connection manager task failed")?;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl-C received, shutting down"),
        Err(e) => {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    }
}
