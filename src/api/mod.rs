//! HTTP layer: router composition and the OpenAPI document.

pub mod handlers;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::app_state::AppState;
use crate::error::{ErrorBody, ErrorResponse};

/// OpenAPI document of the HTTP surface.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "retro-realtime",
        description = "Realtime event delivery for retrospective boards."
    ),
    paths(
        handlers::system::health_handler,
        crate::ws::handler::open_board_socket,
        crate::ws::handler::open_session_request_socket,
    ),
    components(schemas(ErrorResponse, ErrorBody)),
    tags(
        (name = "System", description = "Service health"),
        (name = "Realtime", description = "WebSocket event streams"),
    )
)]
pub struct ApiDoc;

/// Builds the complete application router with tracing and CORS layers.
pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .merge(handlers::system::routes())
        .merge(crate::ws::routes());

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
