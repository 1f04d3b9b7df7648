use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

use super::routes::parse_job_id;
use super::AppState;
use crate::daemon::events::Subscription;
use crate::daemon::scheduler::Scheduler;
use crate::models::JobSnapshot;

#[derive(Debug, Deserialize, Default)]
pub struct SseParams {
    pub job_id: Option<String>,
}

/// Forward every scheduler publish into `event_tx`. Sends never block; with no
/// SSE client connected the snapshot is simply dropped.
pub fn bridge_events(
    scheduler: &Scheduler,
    event_tx: broadcast::Sender<JobSnapshot>,
) -> Subscription {
    scheduler.subscribe(move |snapshot| {
        let _ = event_tx.send(snapshot.clone());
    })
}

/// Guard that logs at debug level when the SSE stream is dropped (client disconnects).
struct SseDropGuard;

impl Drop for SseDropGuard {
    fn drop(&mut self) {
        tracing::debug!("SSE client disconnected");
    }
}

/// Streams job snapshots until the client goes away or the daemon shuts down.
pub async fn sse_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SseParams>,
) -> Response {
    let filter_job_id: Option<Uuid> = match params.job_id.as_deref().map(parse_job_id) {
        Some(Ok(id)) => Some(id),
        Some(Err(resp)) => return resp,
        None => None,
    };

    tracing::info!("SSE client connected");

    let rx = state.event_tx.subscribe();
    let mut shutdown_rx = state.shutdown.subscribe();
    let stopping = async move {
        // A dropped sender also ends the stream.
        let _ = shutdown_rx.wait_for(|stopping| *stopping).await;
    };

    let _drop_guard = SseDropGuard;

    let stream = BroadcastStream::new(rx).filter_map(move |result| {
        let _ = &_drop_guard;
        match result {
            Ok(snapshot) => {
                if filter_job_id.is_some_and(|id| id != snapshot.id) {
                    return None;
                }
                match serde_json::to_string(&snapshot) {
                    Ok(data) => Some(Ok::<_, Infallible>(
                        Event::default().event("job").data(data),
                    )),
                    Err(_) => None,
                }
            }
            // Lagged: tell the client and keep going.
            Err(_) => Some(Ok(
                Event::default().comment("lagged: some events were missed")
            )),
        }
    });
    let stream = futures_util::StreamExt::take_until(stream, stopping);

    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keepalive"),
        )
        .into_response()
}
