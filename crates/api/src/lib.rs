//! OBD-II Logger API Server
//!
//! REST API over the connection manager: status, live samples, history and
//! start/stop control, plus configuration and logging setup for the
//! `obd-logger` binary.

use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use obd_connection::ConnectionManager;
use std::future::Future;
use std::sync::Arc;
use storage::SampleSink;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::subscriber::SetGlobalDefaultError;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

pub mod config;
pub mod error;
mod routes;

pub use config::{AppConfig, LoggingConfig};
pub use error::ApiError;

/// Application state shared across handlers
pub struct AppState {
    pub manager: Arc<ConnectionManager>,
    /// Persisted samples, for history queries
    pub store: Arc<dyn SampleSink>,
    /// Absent when another recorder was already installed
    pub metrics: Option<PrometheusHandle>,
    /// Version string
    pub version: String,
    /// Start time
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Create new application state
    pub fn new(
        manager: Arc<ConnectionManager>,
        store: Arc<dyn SampleSink>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            manager,
            store,
            metrics,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
        }
    }
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(routes::status::service_summary))
        .route("/api/v1/health", get(routes::status::health))
        .route("/api/v1/status", get(routes::status::link_status))
        .route("/api/v1/current", get(routes::data::current))
        .route("/api/v1/recent", get(routes::data::recent))
        .route("/api/v1/commands", get(routes::data::commands))
        .route("/api/v1/history", get(routes::data::history))
        .route("/api/v1/start", post(routes::control::start))
        .route("/api/v1/stop", post(routes::control::stop))
        .route("/metrics", get(routes::status::metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Initialize logging
pub fn init_logging(config: &LoggingConfig) -> Result<(), SetGlobalDefaultError> {
    let parsed = config.level.parse::<Level>().ok();
    let level = parsed.unwrap_or(Level::INFO);
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }

    if parsed.is_none() {
        warn!(level = %config.level, "Unknown log level, using info");
    }
    Ok(())
}

/// Install the global Prometheus recorder
pub fn install_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Serve the API until `shutdown` resolves
pub async fn run_server(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = create_router(state);

    info!("Starting API server on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use obd_connection::{ConnectionState, ManagerConfig};
    use obd_protocol::mock::{ConnectOutcome, MockConnector, MockReply};
    use obd_protocol::CommandDescriptor;
    use obd_scheduler::SampleOutput;
    use ring_buffer::RingBuffer;
    use serde_json::Value;
    use std::time::Duration;
    use storage::JsonlStore;
    use tokio::sync::{broadcast, oneshot};

    struct TestServer {
        base: String,
        manager: Arc<ConnectionManager>,
        transitions: broadcast::Receiver<ConnectionState>,
        stop: oneshot::Sender<()>,
        server: tokio::task::JoinHandle<std::io::Result<()>>,
        lifecycle: Option<tokio::task::JoinHandle<()>>,
        _dir: tempfile::TempDir,
    }

    async fn start_server(connector: MockConnector, run_manager: bool) -> TestServer {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonlStore::new(dir.path()));
        let output = SampleOutput::new(Arc::new(RingBuffer::new(100)), store.clone());
        let catalog = vec![
            CommandDescriptor::new("RPM", "Engine RPM").with_pid(0x01, 0x0C),
            CommandDescriptor::new("SPEED", "Vehicle speed").with_pid(0x01, 0x0D),
        ];
        let config = ManagerConfig {
            probe_delay: Duration::ZERO,
            ..ManagerConfig::default()
        };
        let manager = Arc::new(ConnectionManager::new(
            config,
            Arc::new(connector),
            catalog,
            output,
            store.clone(),
        ));

        let transitions = manager.subscribe();
        let lifecycle = run_manager.then(|| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.run().await })
        });

        let state = Arc::new(AppState::new(Arc::clone(&manager), store, None));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (stop, stopped) = oneshot::channel::<()>();
        let server = tokio::spawn(run_server(listener, state, async move {
            let _ = stopped.await;
        }));

        TestServer {
            base,
            manager,
            transitions,
            stop,
            server,
            lifecycle,
            _dir: dir,
        }
    }

    impl TestServer {
        async fn get(&self, path: &str) -> (u16, Value) {
            let response = reqwest::get(format!("{}{}", self.base, path)).await.unwrap();
            let status = response.status().as_u16();
            (status, response.json().await.unwrap())
        }

        async fn post(&self, path: &str) -> Value {
            reqwest::Client::new()
                .post(format!("{}{}", self.base, path))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap()
        }

        async fn wait_for(&mut self, target: ConnectionState) {
            while self.transitions.recv().await.unwrap() != target {}
        }

        async fn finish(self) {
            self.manager.shutdown();
            if let Some(lifecycle) = self.lifecycle {
                lifecycle.await.unwrap();
            }
            let _ = self.stop.send(());
            self.server.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_empty_service() {
        let server = start_server(MockConnector::new(), false).await;

        let (status, body) = server.get("/").await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "running");
        assert_eq!(body["connected"], false);
        assert_eq!(body["poll_interval_ms"], 500);

        let (status, body) = server.get("/api/v1/health").await;
        assert_eq!(status, 200);
        assert_eq!(body["healthy"], false);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["logging"], true);

        let (status, body) = server.get("/api/v1/current").await;
        assert_eq!(status, 503);
        assert_eq!(body["error"], "service_unavailable");

        let (status, body) = server.get("/api/v1/history?date=2024-13-40").await;
        assert_eq!(status, 400);
        assert_eq!(body["error"], "bad_request");

        let (status, _) = server.get("/api/v1/history?date=2001-01-01").await;
        assert_eq!(status, 404);

        let (status, body) = server.get("/api/v1/status").await;
        assert_eq!(status, 200);
        assert_eq!(body["state"], "initializing");
        assert_eq!(body["attempts"], 0);

        server.finish().await;
    }

    #[tokio::test]
    async fn test_logging_round_trip() {
        let connector = MockConnector::new()
            .with_reply("RPM", MockReply::value(812.5, "rpm"))
            .with_reply("SPEED", MockReply::NoData);
        let mut server = start_server(connector, true).await;
        server.wait_for(ConnectionState::Connected).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (_, body) = server.get("/api/v1/commands").await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["commands"][0]["name"], "RPM");

        let (status, body) = server.get("/api/v1/current").await;
        assert_eq!(status, 200);
        assert_eq!(body["RPM"]["value"], 812.5);
        assert_eq!(body["RPM"]["unit"], "rpm");
        assert!(body.get("SPEED").is_none());

        let (_, body) = server.get("/api/v1/recent?limit=5").await;
        assert!(body["count"].as_u64().unwrap() >= 1);

        let (status, body) = server.get("/api/v1/history").await;
        assert_eq!(status, 200);
        assert!(body["count"].as_u64().unwrap() >= 1);

        let (_, body) = server.get("/api/v1/health").await;
        assert_eq!(body["connected"], true);
        assert_eq!(body["healthy"], true);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["logging"], true);

        let body = server.post("/api/v1/stop").await;
        assert_eq!(body["status"], "stopped");
        let body = server.post("/api/v1/stop").await;
        assert_eq!(body["status"], "already stopped");
        server.wait_for(ConnectionState::Disconnected).await;

        let (_, body) = server.get("/").await;
        assert_eq!(body["status"], "stopped");
        let (_, body) = server.get("/api/v1/health").await;
        assert_eq!(body["healthy"], false);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["logging"], false);

        let body = server.post("/api/v1/start").await;
        assert_eq!(body["status"], "started");
        server.wait_for(ConnectionState::Connected).await;
        let body = server.post("/api/v1/start").await;
        assert_eq!(body["status"], "already running");

        server.finish().await;
    }

    #[tokio::test]
    async fn test_start_during_backoff_retries_now() {
        let connector = MockConnector::new();
        connector.push_connect_outcomes([ConnectOutcome::Unreachable]);
        let mut server = start_server(connector.clone(), true).await;
        server.wait_for(ConnectionState::Disconnected).await;

        let (_, body) = server.get("/api/v1/status").await;
        assert_eq!(body["attempts"], 1);
        assert!(body["next_retry_in_secs"].as_f64().unwrap() > 0.0);

        // Without the request the next attempt would be 5s away
        let body = server.post("/api/v1/start").await;
        assert_eq!(body["status"], "started");
        server.wait_for(ConnectionState::Connected).await;
        assert_eq!(connector.connect_count(), 2);

        server.finish().await;
    }
}
