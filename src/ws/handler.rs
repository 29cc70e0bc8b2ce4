//! Axum WebSocket upgrade handlers.
//!
//! Both handlers register with the broker before upgrading, so anything
//! published after the handshake response is already routed to the socket.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::response::Response;

use super::connection::{run_board_connection, run_session_request_connection};
use crate::app_state::AppState;
use crate::domain::{BoardId, UserId};
use crate::error::RealtimeError;

fn parse_id<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T, RealtimeError> {
    raw.parse()
        .map_err(|_| RealtimeError::InvalidRequest(format!("invalid {what}: {raw}")))
}

/// `GET /boards/{board_id}/requests/{user_id}` — Wait for a join decision.
///
/// Opening a second socket for the same user and board shares the existing
/// private subscription.
///
/// # Errors
///
/// Returns [`RealtimeError::InvalidRequest`] for malformed ids and
/// [`RealtimeError::Broker`] if the private channel cannot be subscribed.
#[utoipa::path(
    get,
    path = "/boards/{board_id}/requests/{user_id}",
    tag = "Realtime",
    summary = "Session request socket",
    description = "Upgrades to a WebSocket that receives the moderator's decision (\"ACCEPTED\" or \"REJECTED\") on the user's join request.",
    params(
        ("board_id" = uuid::Uuid, Path, description = "Board UUID"),
        ("user_id" = uuid::Uuid, Path, description = "Requesting user UUID"),
    ),
    responses(
        (status = 101, description = "Switching to WebSocket"),
        (status = 400, description = "Malformed id", body = crate::error::ErrorResponse),
        (status = 503, description = "Broker unavailable", body = crate::error::ErrorResponse),
    )
)]
pub async fn open_session_request_socket(
    ws: WebSocketUpgrade,
    Path((board_id, user_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Response, RealtimeError> {
    let board_id: BoardId = parse_id(&board_id, "board id")?;
    let user_id: UserId = parse_id(&user_id, "user id")?;

    let lease = state.session_requests.connect(board_id, user_id).await?;

    Ok(ws.on_upgrade(move |socket| run_session_request_connection(socket, lease)))
}

/// `GET /boards/{board_id}/ws` — Stream all events of a board.
///
/// # Errors
///
/// Returns [`RealtimeError::InvalidRequest`] for a malformed board id and
/// [`RealtimeError::Broker`] if the board channel cannot be subscribed.
#[utoipa::path(
    get,
    path = "/boards/{board_id}/ws",
    tag = "Realtime",
    summary = "Board event socket",
    description = "Upgrades to a WebSocket that receives every board event as {\"type\": ..., \"data\": ...}.",
    params(
        ("board_id" = uuid::Uuid, Path, description = "Board UUID"),
    ),
    responses(
        (status = 101, description = "Switching to WebSocket"),
        (status = 400, description = "Malformed id", body = crate::error::ErrorResponse),
        (status = 503, description = "Broker unavailable", body = crate::error::ErrorResponse),
    )
)]
pub async fn open_board_socket(
    ws: WebSocketUpgrade,
    Path(board_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Response, RealtimeError> {
    let board_id: BoardId = parse_id(&board_id, "board id")?;
    let listener = state.broker.get_board_channel(board_id).await?;

    Ok(ws.on_upgrade(move |socket| run_board_connection(socket, board_id, listener)))
}
