//! Sample and command routes

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{Local, NaiveDate};
use obd_protocol::{CommandDescriptor, Sample};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ApiError;
use crate::AppState;

/// Query parameters for the recent endpoint
#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    /// Maximum number of samples to return
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

#[derive(Debug, Serialize)]
pub struct SamplesResponse {
    pub count: usize,
    pub samples: Vec<Sample>,
}

#[derive(Debug, Serialize)]
pub struct CommandsResponse {
    pub count: usize,
    pub commands: Vec<CommandDescriptor>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// `YYYY-MM-DD`; today when absent
    pub date: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub date: NaiveDate,
    pub count: usize,
    pub samples: Vec<Sample>,
}

/// Latest sample
pub async fn current(State(state): State<Arc<AppState>>) -> Result<Json<Sample>, ApiError> {
    state
        .manager
        .buffer()
        .latest()
        .map(Json)
        .ok_or_else(|| ApiError::ServiceUnavailable("No data available yet".to_string()))
}

/// Most recent buffered samples, newest first
pub async fn recent(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RecentQuery>,
) -> Json<SamplesResponse> {
    let buffer = state.manager.buffer();
    let samples = buffer.read_last(params.limit.min(buffer.capacity()));
    Json(SamplesResponse {
        count: samples.len(),
        samples,
    })
}

/// Supported command set
pub async fn commands(State(state): State<Arc<AppState>>) -> Json<CommandsResponse> {
    let commands = state.manager.commands().to_vec();
    Json(CommandsResponse {
        count: commands.len(),
        commands,
    })
}

/// Persisted samples for one day
pub async fn history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let date = match params.date.as_deref() {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|_| ApiError::BadRequest(format!("Invalid date '{}', expected YYYY-MM-DD", raw)))?,
        None => Local::now().date_naive(),
    };

    let samples = state.store.read_all(date).await?;
    Ok(Json(HistoryResponse {
        date,
        count: samples.len(),
        samples,
    }))
}
