//! Handlers for the `/tasks` resource.

use std::convert::Infallible;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::{Stream, StreamExt};
use jobline_core::error::CoreError;
use jobline_core::types::JobId;
use jobline_db::models::JobListQuery;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Status string returned on acceptance; the job itself is `PENDING`.
const ACCEPTED_STATUS: &str = "Processing";

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub task_id: JobId,
    pub status: &'static str,
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/tasks
///
/// Submit a new job. Returns 202 once the job is persisted; execution is
/// asynchronous.
pub async fn submit_task(
    State(state): State<AppState>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(input) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let job = state.dispatcher.submit(input).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: SubmitResponse {
                task_id: job.id,
                status: ACCEPTED_STATUS,
            },
        }),
    ))
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// GET /api/v1/tasks
///
/// Newest first. Supports `offset` (alias `skip`) and `limit` (default 10,
/// max 100).
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<JobListQuery>,
) -> AppResult<impl IntoResponse> {
    let tasks = state.status.list_statuses(&params).await?;
    Ok(Json(DataResponse { data: tasks }))
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

/// GET /api/v1/tasks/{id}
pub async fn get_task(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let task = state.status.get_status(job_id).await?;
    Ok(Json(DataResponse { data: task }))
}

/// GET /api/v1/tasks/{id}/logs
pub async fn get_task_logs(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let logs = state.status.get_logs(job_id).await?;
    Ok(Json(DataResponse { data: logs }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// DELETE /api/v1/tasks/{id}
///
/// Cancel a pending or running job. Returns 204 on success, 409 if the
/// job is already in a terminal state.
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<StatusCode> {
    state.dispatcher.cancel(job_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Stream
// ---------------------------------------------------------------------------

/// GET /api/v1/tasks/{id}/stream
///
/// Server-sent events, one `data: {task_id, status, result}` frame per
/// snapshot. The stream closes after the terminal status, or when the
/// server shuts down.
pub async fn stream_task(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    // 404 up front rather than an empty stream.
    if state.status.snapshot(job_id).await?.is_none() {
        return Err(CoreError::job_not_found(job_id).into());
    }

    let events = state
        .status
        .stream_status(job_id)
        .take_until(state.shutdown.clone().cancelled_owned())
        .filter_map(|snapshot| async move {
            match Event::default().json_data(&snapshot) {
                Ok(event) => Some(Ok(event)),
                Err(e) => {
                    tracing::error!(job_id = %snapshot.task_id, error = %e, "Failed to encode status event");
                    None
                }
            }
        });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
