//! System endpoints: health check.

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;

use crate::app_state::AppState;

/// `GET /health` — Broker health.
///
/// Answers within the broker's health check timeout.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    description = "Reports whether the message broker backend is reachable.",
    responses(
        (status = 204, description = "Broker is healthy"),
        (status = 503, description = "Broker is unreachable or closed"),
    )
)]
pub async fn health_handler(State(state): State<AppState>) -> StatusCode {
    if state.broker.is_healthy().await {
        StatusCode::NO_CONTENT
    } else {
        tracing::warn!("health check failed: broker unhealthy");
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// System routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_handler))
}
