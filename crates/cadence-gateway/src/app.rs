use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use cadence_scheduler::JobService;

use crate::rates::RateBook;

/// Central shared state, passed as `Arc<AppState>` to all Axum handlers.
pub struct AppState {
    pub jobs: JobService,
    pub rates: Arc<RateBook>,
}

impl AppState {
    pub fn new(jobs: JobService, rates: Arc<RateBook>) -> Self {
        Self { jobs, rates }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    use crate::http::{currencies, health, jobs};

    Router::new()
        .route("/health", get(health::health_handler))
        .route("/jobs", get(jobs::list_jobs).post(jobs::create_job))
        .route("/jobs/{id}", get(jobs::get_job).delete(jobs::delete_job))
        .route("/jobs/{id}/pause", post(jobs::pause_job))
        .route("/jobs/{id}/resume", post(jobs::resume_job))
        .route("/jobs/{id}/purge", post(jobs::purge_job))
        .route("/api/currencies", get(currencies::list_currencies))
        .route(
            "/api/currencies/{code}",
            get(currencies::get_rate).post(currencies::add_currency),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
