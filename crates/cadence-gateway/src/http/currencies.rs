//! `/api/currencies` routes over the rate book.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::error;

use crate::app::AppState;
use crate::http::jobs::{error_body, ApiError, ApiResult};
use crate::rates::{Currency, RatesError};

fn api_error(err: RatesError) -> ApiError {
    let status = match &err {
        RatesError::InvalidCode(_) => StatusCode::BAD_REQUEST,
        _ => {
            error!("currency request failed: {err}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_body(status, err.code(), err.to_string())
}

/// GET /api/currencies
pub async fn list_currencies(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Currency>>> {
    state.rates.list().map(Json).map_err(api_error)
}

/// GET /api/currencies/{code}: the latest refreshed rate.
pub async fn get_rate(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> ApiResult<Json<Currency>> {
    state.rates.cached(&code).map(Json).ok_or_else(|| {
        error_body(
            StatusCode::NOT_FOUND,
            "CURRENCY_NOT_FOUND",
            format!("no refreshed rate for '{code}'"),
        )
    })
}

/// POST /api/currencies/{code}
pub async fn add_currency(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> ApiResult<(StatusCode, Json<Currency>)> {
    let currency = state.rates.add(&code).map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(currency)))
}
