//! Start / stop logging

use axum::{extract::State, Json};
use obd_connection::{ConnectionState, ControlOutcome};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub status: &'static str,
    pub state: ConnectionState,
    pub paused: bool,
}

impl ControlResponse {
    fn new(outcome: ControlOutcome, applied: &'static str, redundant: &'static str) -> Self {
        Self {
            status: if outcome.applied { applied } else { redundant },
            state: outcome.state,
            paused: outcome.paused,
        }
    }
}

/// Resume logging, or retry a pending reconnection right away
pub async fn start(State(state): State<Arc<AppState>>) -> Json<ControlResponse> {
    let outcome = state.manager.resume_immediate();
    info!(applied = outcome.applied, "Start requested over API");
    Json(ControlResponse::new(outcome, "started", "already running"))
}

/// Pause logging and close the adapter connection
pub async fn stop(State(state): State<Arc<AppState>>) -> Json<ControlResponse> {
    let outcome = state.manager.pause();
    info!(applied = outcome.applied, "Stop requested over API");
    Json(ControlResponse::new(outcome, "stopped", "already stopped"))
}
