//! Routes owned by the resilience layer.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;
use taskhub_db::health::{HealthSnapshot, elapsed_ms};

use crate::middleware::HealthCheckState;
use crate::types::ApiResponse;

/// Connection state plus the middleware's last liveness check.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub database: HealthSnapshot,
    /// `None` until the first request triggers a check.
    pub ms_since_last_check: Option<u64>,
}

/// `GET /health`
pub async fn health(State(state): State<Arc<HealthCheckState>>) -> Json<ApiResponse<HealthReport>> {
    let report = HealthReport {
        database: state.health().snapshot(),
        ms_since_last_check: state.last_check().map(elapsed_ms),
    };
    Json(ApiResponse::success(report))
}

/// Fallback for unmatched paths.
pub async fn handler_404() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::error("The requested resource was not found")),
    )
}
