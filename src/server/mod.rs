pub mod health;
pub mod routes;
pub mod sse;

use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use tokio::sync::{broadcast, watch};
use tower_http::cors::{Any, CorsLayer};

use crate::daemon::scheduler::Scheduler;
use crate::daemon::sync::RecordSync;
use crate::models::{AppConfig, JobSnapshot};

/// Shared application state for the Axum server.
pub struct AppState {
    pub scheduler: Scheduler,
    pub records: Arc<RecordSync>,
    /// Fan-out of job snapshots to SSE clients, fed by a scheduler subscription.
    pub event_tx: broadcast::Sender<JobSnapshot>,
    /// Flipped to `true` on daemon shutdown; ends every open SSE stream.
    pub shutdown: watch::Sender<bool>,
    pub config: Arc<AppConfig>,
    pub start_time: Instant,
}

/// Create the Axum router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/jobs", get(routes::list_jobs).post(routes::submit_job))
        .route("/api/jobs/{id}", get(routes::get_job))
        .route("/api/jobs/{id}/cancel", post(routes::cancel_job))
        .route("/api/events", get(sse::sse_handler))
        .route("/api/records", get(routes::list_records))
        .route("/api/records/uninstall", post(routes::uninstall_record))
        .route("/api/records/enable", post(routes::enable_record))
        .route("/api/records/disable", post(routes::disable_record))
        .with_state(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
}
