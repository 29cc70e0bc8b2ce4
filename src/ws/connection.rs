//! WebSocket connection loops.
//!
//! Both sockets are push-only: inbound text and binary frames are read and
//! ignored, and the loop ends on a close frame, a read error or the end of
//! the feeding channel.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};

use super::subscription::SessionRequestLease;
use crate::broker::Listener;
use crate::domain::{BoardEvent, BoardId};

/// Runs a session-request socket until the client leaves, then releases its
/// registration.
///
/// Frames are the JSON-encoded admission status (`"ACCEPTED"`, ...). The
/// server never closes the socket after a decision; the client does.
pub async fn run_session_request_connection(socket: WebSocket, mut lease: SessionRequestLease) {
    let board_id = lease.board_id();
    let user_id = lease.user_id();
    let connection_id = lease.connection_id();

    let Some(mut outbound) = lease.take_outbound() else {
        tracing::warn!(%board_id, %user_id, connection_id, "session request socket without outbound queue");
        lease.release().await;
        return;
    };

    let (mut ws_tx, mut ws_rx) = socket.split();
    tracing::debug!(%board_id, %user_id, connection_id, "session request socket opened");

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!(%board_id, %user_id, connection_id, %err, "session request socket read failed");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    break;
                };
                if let Err(err) = ws_tx.send(Message::text(frame)).await {
                    tracing::warn!(%board_id, %user_id, connection_id, %err, "failed to write session request frame");
                }
            }
        }
    }

    lease.release().await;
    let _ = ws_tx.close().await;
    tracing::debug!(%board_id, %user_id, connection_id, "session request socket closed");
}

/// Forwards every event of `board_id` to the socket as a JSON text frame.
pub async fn run_board_connection(
    socket: WebSocket,
    board_id: BoardId,
    mut listener: Listener<BoardEvent>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    tracing::debug!(%board_id, "board socket opened");

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!(%board_id, %err, "board socket read failed");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
            event = listener.recv() => {
                let Some(event) = event else {
                    tracing::warn!(%board_id, "board channel ended");
                    break;
                };
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(err) => {
                        tracing::warn!(%board_id, %err, "failed to encode board event");
                        continue;
                    }
                };
                if ws_tx.send(Message::text(json)).await.is_err() {
                    break;
                }
            }
        }
    }

    drop(listener);
    let _ = ws_tx.close().await;
    tracing::debug!(%board_id, "board socket closed");
}
