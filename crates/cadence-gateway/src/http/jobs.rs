//! `/jobs` routes, one per facade operation.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use cadence_scheduler::{JobDefinition, JobStatusReport, NewJob, SchedulerError};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::error;

use crate::app::AppState;

pub(crate) type ApiError = (StatusCode, Json<Value>);
pub(crate) type ApiResult<T> = Result<T, ApiError>;

pub(crate) fn error_body(status: StatusCode, code: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(json!({
            "error": { "code": code, "message": message.into() }
        })),
    )
}

/// Malformed or mistyped request bodies keep axum's status but use the
/// common error envelope.
pub(crate) fn rejection_error(rejection: JsonRejection) -> ApiError {
    error_body(rejection.status(), "INVALID_REQUEST", rejection.body_text())
}

/// Map a scheduler error onto `{"error": {"code", "message"}}` with a matching status.
fn api_error(err: SchedulerError) -> ApiError {
    let status = match &err {
        SchedulerError::JobNotFound { .. } => StatusCode::NOT_FOUND,
        SchedulerError::InvalidSchedule(_) | SchedulerError::UnknownHandler { .. } => {
            StatusCode::BAD_REQUEST
        }
        SchedulerError::DuplicateName { .. }
        | SchedulerError::InvalidTransition { .. }
        | SchedulerError::ClaimConflict { .. } => StatusCode::CONFLICT,
        SchedulerError::Degraded(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => {
            error!("job request failed: {err}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_body(status, err.code(), err.to_string())
}

/// GET /jobs
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<JobDefinition>>> {
    state.jobs.list().await.map(Json).map_err(api_error)
}

/// POST /jobs
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewJob>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<JobDefinition>)> {
    let Json(new) = payload.map_err(rejection_error)?;
    let job = state.jobs.register(new).await.map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /jobs/{id}
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobStatusReport>> {
    state.jobs.get_status(&id).await.map(Json).map_err(api_error)
}

/// DELETE /jobs/{id}
pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobDefinition>> {
    state.jobs.delete(&id).await.map(Json).map_err(api_error)
}

/// POST /jobs/{id}/pause
pub async fn pause_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobDefinition>> {
    state.jobs.pause(&id).await.map(Json).map_err(api_error)
}

/// POST /jobs/{id}/resume
pub async fn resume_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobDefinition>> {
    state.jobs.resume(&id).await.map(Json).map_err(api_error)
}

/// POST /jobs/{id}/purge
pub async fn purge_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.jobs.purge(&id).await.map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}
