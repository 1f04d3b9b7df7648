use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AppState;
use crate::errors::QueueError;
use crate::models::JobRequest;

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

fn error_response(status: StatusCode, error: &str, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: message.to_string(),
        }),
    )
        .into_response()
}

fn queue_error_response(err: &QueueError) -> Response {
    let (status, code) = match err {
        QueueError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        QueueError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
        QueueError::InvalidTransition(_) => (StatusCode::CONFLICT, "conflict"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    };
    error_response(status, code, &err.to_string())
}

/// Map an error from the record layer, recovering typed errors where present.
fn anyhow_error_response(err: &anyhow::Error) -> Response {
    match err.downcast_ref::<QueueError>() {
        Some(queue_err) => queue_error_response(queue_err),
        None => {
            tracing::warn!("Request failed: {:#}", err);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                &format!("{:#}", err),
            )
        }
    }
}

pub(super) fn parse_job_id(id: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(id).map_err(|_| {
        error_response(
            StatusCode::BAD_REQUEST,
            "validation_error",
            &format!("'{}' is not a valid job id", id),
        )
    })
}

// ---------------------------------------------------------------------------
// Request bodies and query params
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
pub struct ListRecordsParams {
    pub profile_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordTarget {
    pub content_item_id: String,
    pub profile_id: String,
}

// ---------------------------------------------------------------------------
// Job handlers
// ---------------------------------------------------------------------------

/// GET /api/jobs
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Response {
    match state.scheduler.list_jobs().await {
        Ok(jobs) => (StatusCode::OK, Json(jobs)).into_response(),
        Err(e) => queue_error_response(&e),
    }
}

/// POST /api/jobs
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(mut request): Json<JobRequest>,
) -> Response {
    if request.tool_path.trim().is_empty() {
        if let Some(tool) = &state.config.tool_path {
            request.tool_path = tool.display().to_string();
        }
    }
    match state.scheduler.submit(request).await {
        Ok(snapshot) => {
            tracing::info!(
                "Accepted job {} for item {}",
                snapshot.id,
                snapshot.content_item_id
            );
            (StatusCode::CREATED, Json(snapshot)).into_response()
        }
        Err(e) => {
            tracing::warn!("Rejected job submission: {}", e);
            queue_error_response(&e)
        }
    }
}

/// GET /api/jobs/{id}
pub async fn get_job(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let id = match parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.scheduler.get_job(id).await {
        Ok(Some(snapshot)) => (StatusCode::OK, Json(snapshot)).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            &format!("Job with id '{}' not found", id),
        ),
        Err(e) => queue_error_response(&e),
    }
}

/// POST /api/jobs/{id}/cancel
pub async fn cancel_job(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let id = match parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.scheduler.cancel(id).await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(e) => queue_error_response(&e),
    }
}

// ---------------------------------------------------------------------------
// Record handlers
// ---------------------------------------------------------------------------

/// GET /api/records
pub async fn list_records(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListRecordsParams>,
) -> Response {
    match state.records.list(params.profile_id.as_deref()).await {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(e) => anyhow_error_response(&e),
    }
}

/// POST /api/records/uninstall
pub async fn uninstall_record(
    State(state): State<Arc<AppState>>,
    Json(target): Json<RecordTarget>,
) -> Response {
    match state
        .records
        .uninstall(&target.content_item_id, &target.profile_id)
        .await
    {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(e) => anyhow_error_response(&e),
    }
}

async fn set_enabled(state: &AppState, target: &RecordTarget, enabled: bool) -> Response {
    match state
        .records
        .set_enabled(&target.content_item_id, &target.profile_id, enabled)
        .await
    {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(e) => anyhow_error_response(&e),
    }
}

/// POST /api/records/enable
pub async fn enable_record(
    State(state): State<Arc<AppState>>,
    Json(target): Json<RecordTarget>,
) -> Response {
    set_enabled(&state, &target, true).await
}

/// POST /api/records/disable
pub async fn disable_record(
    State(state): State<Arc<AppState>>,
    Json(target): Json<RecordTarget>,
) -> Response {
    set_enabled(&state, &target, false).await
}
