//! Periodic database liveness check in the request pipeline.
//!
//! At most once per interval a request pays for a `SELECT 1`. When it fails
//! the middleware asks [`ConnectionHealth`] for a reset and either lets the
//! request through or answers 503. Requests that find a reset already in
//! flight wait one settle period and continue without confirming the
//! outcome.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::Json;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use taskhub_config::HealthSettings;
use taskhub_db::health::{ConnectionHealth, ResetOutcome};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::types::ApiResponse;

/// Body of the 503 sent when the database cannot be reached after a reset.
pub const UNAVAILABLE_MESSAGE: &str =
    "Database connection is currently unavailable. Please try again shortly.";

/// Shared state for [`health_check_middleware`].
pub struct HealthCheckState {
    health: Arc<ConnectionHealth>,
    interval: Duration,
    settle: Duration,
    last_check: Mutex<Option<Instant>>,
}

impl HealthCheckState {
    pub fn new(health: Arc<ConnectionHealth>, settings: &HealthSettings) -> Self {
        Self::with_timing(
            health,
            settings.check_interval(),
            settings.middleware_settle(),
        )
    }

    pub const fn with_timing(
        health: Arc<ConnectionHealth>,
        interval: Duration,
        settle: Duration,
    ) -> Self {
        Self {
            health,
            interval,
            settle,
            last_check: Mutex::new(None),
        }
    }

    #[must_use]
    pub const fn health(&self) -> &Arc<ConnectionHealth> {
        &self.health
    }

    #[must_use]
    pub fn last_check(&self) -> Option<Instant> {
        *self.last_check.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the next liveness check if the interval has passed.
    ///
    /// Stamps the check time before the ping runs, so concurrent requests in
    /// the same window do not ping again.
    fn claim_check(&self) -> bool {
        let mut last_check = self.last_check.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let due = last_check.is_none_or(|at| now.duration_since(at) > self.interval);
        if due {
            *last_check = Some(now);
        }
        due
    }
}

/// axum middleware: `from_fn_with_state(state, health_check_middleware)`.
pub async fn health_check_middleware(
    State(state): State<Arc<HealthCheckState>>,
    request: Request,
    next: Next,
) -> Response {
    if !state.claim_check() {
        return next.run(request).await;
    }

    let Err(ping_error) = state.health.ping().await else {
        debug!("database liveness check passed");
        return next.run(request).await;
    };
    warn!(error = %ping_error, "database liveness check failed");

    match state.health.try_reset(state.settle).await {
        ResetOutcome::Completed => next.run(request).await,
        ResetOutcome::Failed => {
            error!("database unreachable after reset, rejecting request");
            unavailable()
        }
        ResetOutcome::AlreadyInProgress => {
            tokio::time::sleep(state.settle).await;
            next.run(request).await
        }
    }
}

fn unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ApiResponse::error(UNAVAILABLE_MESSAGE)),
    )
        .into_response()
}
