//! WebSocket layer: upgrade handlers, connection loops and the
//! session-request bridge.
//!
//! Two push-only endpoints:
//!
//! - `/boards/{board_id}/ws` streams every event of a board.
//! - `/boards/{board_id}/requests/{user_id}` waits for the moderator's
//!   decision on a join request.

pub mod connection;
pub mod handler;
pub mod subscription;

pub use subscription::{SessionRequestBridge, SessionRequestLease};

use axum::Router;
use axum::routing::get;

use crate::app_state::AppState;

/// WebSocket routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/boards/{board_id}/ws", get(handler::open_board_socket))
        .route(
            "/boards/{board_id}/requests/{user_id}",
            get(handler::open_session_request_socket),
        )
}
