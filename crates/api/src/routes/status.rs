//! Service, health and status routes

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use obd_connection::{ConnectionState, LinkStatus};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

/// Response for `GET /`
#[derive(Debug, Serialize)]
pub struct ServiceSummary {
    pub service: &'static str,
    pub version: String,
    /// `running` unless paused by an operator
    pub status: &'static str,
    pub connected: bool,
    pub state: ConnectionState,
    pub port: Option<String>,
    pub available_commands: usize,
    pub poll_interval_ms: u64,
    pub uptime_seconds: u64,
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy` while logging, `degraded` otherwise
    pub status: &'static str,
    /// Connected and not paused
    pub healthy: bool,
    pub timestamp: i64,
    pub version: String,
    pub uptime_seconds: u64,
    pub connected: bool,
    /// Not paused by an operator
    pub logging: bool,
    pub samples_buffered: usize,
    pub last_sample_age_seconds: Option<f64>,
}

/// Service summary
pub async fn service_summary(State(state): State<Arc<AppState>>) -> Json<ServiceSummary> {
    let status = state.manager.status();
    Json(ServiceSummary {
        service: "obd-logger",
        version: state.version.clone(),
        status: if status.paused { "stopped" } else { "running" },
        connected: status.state == ConnectionState::Connected,
        state: status.state,
        port: status.port,
        available_commands: status.supported_commands,
        poll_interval_ms: state.manager.config().poller.interval.as_millis() as u64,
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

/// Health check handler
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let status = state.manager.status();
    let connected = status.state == ConnectionState::Connected;
    let healthy = connected && !status.paused;
    Json(HealthResponse {
        status: if healthy { "healthy" } else { "degraded" },
        healthy,
        timestamp: chrono::Utc::now().timestamp(),
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        connected,
        logging: !status.paused,
        samples_buffered: status.buffered_samples,
        last_sample_age_seconds: status.latest_sample.as_ref().map(|s| s.age_seconds()),
    })
}

/// Full lifecycle status
pub async fn link_status(State(state): State<Arc<AppState>>) -> Json<LinkStatus> {
    Json(state.manager.status())
}

/// Prometheus exposition
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        ),
        None => (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            "metrics recorder not installed\n".to_string(),
        ),
    }
}
