//! # taskhub-server
//!
//! HTTP surface of the Taskhub connection-resilience layer: the periodic
//! health-check middleware, a `/health` status route, and the server loop.
//! Application routers are nested under [`router`] so every request passes
//! through the liveness check first.

pub mod error;
pub mod middleware;
pub mod routes;
pub mod types;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use taskhub_config::ServerConfig;
use tokio::net::TcpListener;
use tracing::info;

pub use error::ServerError;
use middleware::{HealthCheckState, health_check_middleware};

/// Wrap `app` with the health-check middleware and add `/health`.
pub fn router(state: Arc<HealthCheckState>, app: Router) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .with_state(state.clone())
        .merge(app)
        .fallback(routes::handler_404)
        .layer(axum::middleware::from_fn_with_state(
            state,
            health_check_middleware,
        ))
}

/// Bind the configured address.
///
/// # Errors
///
/// Returns `ServerError::Bind` if the address is unavailable.
pub async fn bind(config: &ServerConfig) -> Result<(SocketAddr, TcpListener), ServerError> {
    let address = config.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| ServerError::Bind {
            address: address.clone(),
            source,
        })?;
    let local = listener.local_addr().map_err(|source| ServerError::Bind { address, source })?;
    Ok((local, listener))
}

/// Serve `app` until `shutdown` resolves, then drain in-flight requests.
///
/// # Errors
///
/// Returns `ServerError::Serve` if the accept loop fails.
pub async fn serve<S>(listener: TcpListener, app: Router, shutdown: S) -> Result<(), ServerError>
where
    S: Future<Output = ()> + Send + 'static,
{
    if let Ok(address) = listener.local_addr() {
        info!(%address, "taskhub listening");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(ServerError::Serve)
}
