use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::models::JobStatus;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub running_jobs: usize,
    pub queued_jobs: usize,
    pub total_jobs: usize,
    pub version: String,
    pub data_dir: String,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Health check");

    let uptime = state.start_time.elapsed().as_secs();

    let (running, queued, total) = match state.scheduler.list_jobs().await {
        Ok(jobs) => (
            jobs.iter().filter(|j| j.status == JobStatus::Running).count(),
            jobs.iter().filter(|j| j.status == JobStatus::Queued).count(),
            jobs.len(),
        ),
        Err(_) => (0, 0, 0),
    };

    let data_dir = state
        .config
        .data_dir
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let response = HealthResponse {
        status: "ok".to_string(),
        uptime_seconds: uptime,
        running_jobs: running,
        queued_jobs: queued,
        total_jobs: total,
        version: env!("CARGO_PKG_VERSION").to_string(),
        data_dir,
    };

    (StatusCode::OK, Json(response))
}
