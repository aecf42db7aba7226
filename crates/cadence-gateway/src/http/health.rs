use axum::{extract::State, http::StatusCode, Json};
use cadence_scheduler::HealthStatus;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: 200 while the job store is reachable, 503 in degraded mode.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let health = state.jobs.health();
    let code = match health.status {
        HealthStatus::Ok => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };
    (
        code,
        Json(json!({
            "status": health.status,
            "consecutive_failures": health.consecutive_failures,
            "last_error": health.last_error,
            "version": env!("CARGO_PKG_VERSION"),
            "git_sha": env!("CADENCE_GIT_SHA"),
            "instance": state.jobs.instance(),
        })),
    )
}
