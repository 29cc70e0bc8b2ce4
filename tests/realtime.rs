//! End-to-end tests: a real server on a loopback port with the in-process
//! transport, driven by WebSocket and HTTP clients.

#![allow(clippy::panic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use retro_realtime::api;
use retro_realtime::app_state::AppState;
use retro_realtime::broker::Broker;
use retro_realtime::domain::{BoardEvent, BoardEventType, BoardId, SessionRequestStatus, UserId};
use retro_realtime::service::BoardNotifier;
use retro_realtime::transport::{MemoryTransport, Transport};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server() -> (SocketAddr, AppState) {
    let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new(64));
    let broker = Arc::new(Broker::new(transport, 16));
    let state = AppState::new(broker, 8);
    let app = api::build_router(state.clone());

    let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
        panic!("failed to bind loopback port");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("no local address");
    };
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, state)
}

async fn open(addr: SocketAddr, path: &str) -> Client {
    let url = format!("ws://{addr}{path}");
    let Ok((client, _response)) = connect_async(url.as_str()).await else {
        panic!("websocket handshake failed for {url}");
    };
    client
}

async fn next_text(client: &mut Client) -> String {
    loop {
        let Ok(next) = tokio::time::timeout(Duration::from_secs(2), client.next()).await else {
            panic!("timed out waiting for a frame");
        };
        match next {
            Some(Ok(Message::Text(text))) => return text.as_str().to_owned(),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn session_request_socket_receives_decision() {
    let (addr, state) = spawn_server().await;
    let board = BoardId::new();
    let user = UserId::new();

    let mut client = open(addr, &format!("/boards/{board}/requests/{user}")).await;
    tokio_test::assert_ok!(
        state
            .broker
            .broadcast_update_on_board_session_request(board, user, SessionRequestStatus::Accepted)
            .await
    );

    assert_eq!(next_text(&mut client).await, "\"ACCEPTED\"");
}

#[tokio::test]
async fn second_socket_shares_the_subscription() {
    let (addr, state) = spawn_server().await;
    let board = BoardId::new();
    let user = UserId::new();
    let path = format!("/boards/{board}/requests/{user}");

    let mut first = open(addr, &path).await;
    let mut second = open(addr, &path).await;

    assert_eq!(state.session_requests.forwarder_count(board).await, 1);
    assert_eq!(state.session_requests.connection_count(board, user).await, 2);
    assert_eq!(
        state.broker.session_request_listener_count(board, user).await,
        1
    );

    let notifier = BoardNotifier::new(Arc::clone(&state.broker));
    notifier
        .session_request_decided(board, user, SessionRequestStatus::Rejected)
        .await;

    assert_eq!(next_text(&mut first).await, "\"REJECTED\"");
    assert_eq!(next_text(&mut second).await, "\"REJECTED\"");
}

#[tokio::test]
async fn closing_sockets_releases_the_subscription() {
    let (addr, state) = spawn_server().await;
    let board = BoardId::new();
    let user = UserId::new();

    let mut client = open(addr, &format!("/boards/{board}/requests/{user}")).await;
    assert_eq!(state.session_requests.board_count(), 1);

    tokio_test::assert_ok!(client.close(None).await);
    drop(client);

    let bridge = &state.session_requests;
    let broker = &state.broker;
    wait_until(|| async move { bridge.board_count() == 0 }).await;
    wait_until(|| async move { broker.active_subjects().await == 0 }).await;
}

#[tokio::test]
async fn board_socket_streams_events_in_order() {
    let (addr, state) = spawn_server().await;
    let board = BoardId::new();
    let mut client = open(addr, &format!("/boards/{board}/ws")).await;

    let notifier = BoardNotifier::new(Arc::clone(&state.broker));
    notifier
        .publish(board, BoardEventType::NotesUpdated, &json!({"note": 1}))
        .await;
    notifier
        .publish_event(board, &BoardEvent::empty(BoardEventType::BoardDeleted))
        .await;

    let first: serde_json::Value = match serde_json::from_str(&next_text(&mut client).await) {
        Ok(value) => value,
        Err(err) => panic!("invalid frame: {err}"),
    };
    assert_eq!(first, json!({"type": "NOTES_UPDATED", "data": {"note": 1}}));

    let Ok(second) = serde_json::from_str::<BoardEvent>(&next_text(&mut client).await) else {
        panic!("invalid frame");
    };
    assert_eq!(second.event_type, BoardEventType::BoardDeleted);
}

#[tokio::test]
async fn board_socket_ignores_other_boards() {
    let (addr, state) = spawn_server().await;
    let board = BoardId::new();
    let mut client = open(addr, &format!("/boards/{board}/ws")).await;

    let notifier = BoardNotifier::new(Arc::clone(&state.broker));
    notifier
        .publish(BoardId::new(), BoardEventType::ColumnDeleted, &json!({}))
        .await;
    notifier
        .publish(board, BoardEventType::ColumnsUpdated, &json!([]))
        .await;

    let Ok(event) = serde_json::from_str::<BoardEvent>(&next_text(&mut client).await) else {
        panic!("invalid frame");
    };
    assert_eq!(event.event_type, BoardEventType::ColumnsUpdated);
}

#[tokio::test]
async fn malformed_board_id_is_rejected() {
    let (addr, _state) = spawn_server().await;
    let url = format!("ws://{addr}/boards/not-a-uuid/ws");
    assert!(connect_async(url.as_str()).await.is_err());
}

#[tokio::test]
async fn health_follows_broker_state() {
    let (addr, state) = spawn_server().await;
    let url = format!("http://{addr}/health");

    let Ok(response) = reqwest::get(url.as_str()).await else {
        panic!("health request failed");
    };
    assert_eq!(response.status().as_u16(), 204);

    state.broker.close().await;
    let Ok(response) = reqwest::get(url.as_str()).await else {
        panic!("health request failed");
    };
    assert_eq!(response.status().as_u16(), 503);
}

#[tokio::test]
async fn socket_open_fails_when_broker_is_closed() {
    let (addr, state) = spawn_server().await;
    state.broker.close().await;

    let url = format!("ws://{addr}/boards/{}/requests/{}", BoardId::new(), UserId::new());
    assert!(connect_async(url.as_str()).await.is_err());
    assert_eq!(state.session_requests.board_count(), 0);
}

#[tokio::test]
async fn waiting_socket_closes_when_broker_goes_away() {
    let (addr, state) = spawn_server().await;
    let board = BoardId::new();
    let user = UserId::new();
    let mut client = open(addr, &format!("/boards/{board}/requests/{user}")).await;

    state.broker.close().await;

    loop {
        let Ok(next) = tokio::time::timeout(Duration::from_secs(2), client.next()).await else {
            panic!("socket still open after the broker closed");
        };
        match next {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
    let bridge = &state.session_requests;
    wait_until(|| async move { bridge.board_count() == 0 }).await;
}
