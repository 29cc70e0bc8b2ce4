//! Session-request bridge: per-board registry of waiting users.
//!
//! For every board with at least one waiting socket the bridge keeps a
//! [`BoardSessionRequestSubscription`]: the live connections of each user
//! and, per user, exactly one forwarding task that moves admission decisions
//! from the user's private broker channel onto those connections.
//!
//! # Locking
//!
//! The outer board map is a plain mutex held only for lookups and removal.
//! Each board entry has its own async mutex, held while a user's private
//! channel is being subscribed, so two sockets of the same user can never
//! both create a forwarder. A board entry is marked `retired` before it
//! leaves the map; a connect that raced with the removal retries on a fresh
//! entry.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, Weak};

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::broker::{Broker, Listener};
use crate::domain::{BoardId, SessionRequestStatus, UserId};
use crate::error::BrokerError;

/// Server-side identifier of one WebSocket connection.
pub type ConnectionId = u64;

/// Forwarding task of one (board, user) pair.
struct Forwarder {
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Forwarder {
    fn spawn(
        bridge: Weak<SessionRequestBridge>,
        board: Arc<BoardSessionRequestSubscription>,
        user_id: UserId,
        listener: Listener<SessionRequestStatus>,
    ) -> Self {
        let (cancel, cancelled) = oneshot::channel();
        let task = tokio::spawn(forward(bridge, board, user_id, listener, cancelled));
        Self {
            cancel: Some(cancel),
            task,
        }
    }

    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    fn stop(mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

#[derive(Default)]
struct BoardState {
    /// user → (connection → outbound frame queue)
    clients: HashMap<UserId, HashMap<ConnectionId, mpsc::Sender<String>>>,
    /// user → the single forwarder feeding that user's connections
    subscriptions: HashMap<UserId, Forwarder>,
    retired: bool,
}

/// Waiting users of one board.
pub struct BoardSessionRequestSubscription {
    board_id: BoardId,
    state: Mutex<BoardState>,
}

impl fmt::Debug for BoardSessionRequestSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoardSessionRequestSubscription")
            .field("board_id", &self.board_id)
            .finish_non_exhaustive()
    }
}

impl BoardSessionRequestSubscription {
    fn new(board_id: BoardId) -> Self {
        Self {
            board_id,
            state: Mutex::new(BoardState::default()),
        }
    }

    /// Queues `status` on every live connection of `user_id`. A full or
    /// closed connection is logged and skipped.
    async fn deliver(&self, user_id: UserId, status: SessionRequestStatus) {
        let frame = match serde_json::to_string(&status) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(board_id = %self.board_id, %user_id, %err, "failed to encode status");
                return;
            }
        };

        let state = self.state.lock().await;
        let Some(connections) = state.clients.get(&user_id) else {
            return;
        };
        for (connection_id, outbound) in connections {
            if let Err(err) = outbound.try_send(frame.clone()) {
                tracing::warn!(
                    board_id = %self.board_id,
                    %user_id,
                    connection_id,
                    %err,
                    "failed to queue session request frame"
                );
            }
        }
    }
}

/// Moves decisions from the private channel to the user's sockets until
/// cancelled. If the channel itself ends, the user's sockets are evicted so
/// their clients reconnect.
async fn forward(
    bridge: Weak<SessionRequestBridge>,
    board: Arc<BoardSessionRequestSubscription>,
    user_id: UserId,
    mut listener: Listener<SessionRequestStatus>,
    mut cancelled: oneshot::Receiver<()>,
) {
    let channel_ended = loop {
        tokio::select! {
            _ = &mut cancelled => break false,
            status = listener.recv() => {
                let Some(status) = status else {
                    tracing::warn!(board_id = %board.board_id, %user_id, "session request channel ended");
                    break true;
                };
                board.deliver(user_id, status).await;
            }
        }
    };
    drop(listener);

    if channel_ended && let Some(bridge) = bridge.upgrade() {
        bridge.evict(&board, user_id).await;
    }
    tracing::debug!(board_id = %board.board_id, %user_id, "session request forwarder stopped");
}

/// Registry bridging private broker channels to waiting sockets.
pub struct SessionRequestBridge {
    broker: Arc<Broker>,
    boards: std::sync::Mutex<HashMap<BoardId, Arc<BoardSessionRequestSubscription>>>,
    outbound_capacity: usize,
    next_connection: AtomicU64,
}

impl fmt::Debug for SessionRequestBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRequestBridge")
            .field("boards", &self.board_count())
            .field("outbound_capacity", &self.outbound_capacity)
            .finish_non_exhaustive()
    }
}

impl SessionRequestBridge {
    /// Creates an empty bridge. Each connection buffers at most
    /// `outbound_capacity` frames the socket has not written yet.
    #[must_use]
    pub fn new(broker: Arc<Broker>, outbound_capacity: usize) -> Self {
        Self {
            broker,
            boards: std::sync::Mutex::new(HashMap::new()),
            outbound_capacity: outbound_capacity.max(1),
            next_connection: AtomicU64::new(0),
        }
    }

    /// Registers a new connection of `user_id` waiting on `board_id`.
    ///
    /// When this returns, the user's private channel and forwarder exist and
    /// the connection's outbound queue is registered, so a decision
    /// published from now on reaches the returned lease even if the socket
    /// is not writable yet. A second connection of the same user reuses the
    /// existing forwarder.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] if the private channel could not be
    /// subscribed.
    pub async fn connect(
        self: &Arc<Self>,
        board_id: BoardId,
        user_id: UserId,
    ) -> Result<SessionRequestLease, BrokerError> {
        loop {
            let board = self.board(board_id);
            let mut state = board.state.lock().await;
            if state.retired {
                drop(state);
                tokio::task::yield_now().await;
                continue;
            }

            let subscribed = state
                .subscriptions
                .get(&user_id)
                .is_some_and(Forwarder::is_running);
            if !subscribed {
                let listener = match self
                    .broker
                    .get_board_session_request_channel(board_id, user_id)
                    .await
                {
                    Ok(listener) => listener,
                    Err(err) => {
                        drop(state);
                        self.prune(board_id, &board).await;
                        return Err(err);
                    }
                };
                let forwarder =
                    Forwarder::spawn(Arc::downgrade(self), Arc::clone(&board), user_id, listener);
                if let Some(stale) = state.subscriptions.insert(user_id, forwarder) {
                    stale.stop();
                }
            }

            let connection_id = self.next_connection.fetch_add(1, Ordering::Relaxed);
            let (outbound_tx, outbound_rx) = mpsc::channel(self.outbound_capacity);
            state
                .clients
                .entry(user_id)
                .or_default()
                .insert(connection_id, outbound_tx);
            tracing::debug!(%board_id, %user_id, connection_id, "session request socket registered");

            return Ok(SessionRequestLease {
                bridge: Arc::clone(self),
                board_id,
                user_id,
                connection_id,
                outbound: Some(outbound_rx),
                released: false,
            });
        }
    }

    /// Removes one connection. The user's forwarder and private
    /// subscription stop with their last connection; the board entry goes
    /// with its last user.
    async fn disconnect(&self, board_id: BoardId, user_id: UserId, connection_id: ConnectionId) {
        let Some(board) = self.lookup(board_id) else {
            return;
        };

        let board_empty = {
            let mut state = board.state.lock().await;
            if let Some(connections) = state.clients.get_mut(&user_id) {
                connections.remove(&connection_id);
                if connections.is_empty() {
                    state.clients.remove(&user_id);
                    if let Some(forwarder) = state.subscriptions.remove(&user_id) {
                        forwarder.stop();
                    }
                }
            }
            state.clients.is_empty()
        };
        tracing::debug!(%board_id, %user_id, connection_id, "session request socket deregistered");

        if board_empty {
            self.prune(board_id, &board).await;
        }
    }

    /// Deregisters every connection of `user_id` on `board`, closing their
    /// outbound queues. Called by a forwarder whose channel ended.
    async fn evict(&self, board: &Arc<BoardSessionRequestSubscription>, user_id: UserId) {
        let board_empty = {
            let mut state = board.state.lock().await;
            let evicted = state.clients.remove(&user_id).map_or(0, |connections| connections.len());
            // the entry is the calling forwarder itself
            state.subscriptions.remove(&user_id);
            tracing::debug!(board_id = %board.board_id, %user_id, evicted, "session request sockets evicted");
            state.clients.is_empty()
        };

        if board_empty {
            self.prune(board.board_id, board).await;
        }
    }

    /// Drops the entry of `board_id` if it is still `board` and has no
    /// clients.
    async fn prune(&self, board_id: BoardId, board: &Arc<BoardSessionRequestSubscription>) {
        {
            let mut state = board.state.lock().await;
            if state.retired || !state.clients.is_empty() {
                return;
            }
            state.retired = true;
            for (_, forwarder) in state.subscriptions.drain() {
                forwarder.stop();
            }
        }

        let mut boards = self.boards.lock().unwrap_or_else(PoisonError::into_inner);
        if boards
            .get(&board_id)
            .is_some_and(|current| Arc::ptr_eq(current, board))
        {
            boards.remove(&board_id);
        }
    }

    fn board(&self, board_id: BoardId) -> Arc<BoardSessionRequestSubscription> {
        let mut boards = self.boards.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            boards
                .entry(board_id)
                .or_insert_with(|| Arc::new(BoardSessionRequestSubscription::new(board_id))),
        )
    }

    fn lookup(&self, board_id: BoardId) -> Option<Arc<BoardSessionRequestSubscription>> {
        self.boards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&board_id)
            .map(Arc::clone)
    }

    /// Number of boards with at least one registered socket.
    #[must_use]
    pub fn board_count(&self) -> usize {
        self.boards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of running forwarders on `board_id`.
    pub async fn forwarder_count(&self, board_id: BoardId) -> usize {
        let Some(board) = self.lookup(board_id) else {
            return 0;
        };
        let state = board.state.lock().await;
        state
            .subscriptions
            .values()
            .filter(|forwarder| forwarder.is_running())
            .count()
    }

    /// Number of registered connections of `user_id` on `board_id`.
    pub async fn connection_count(&self, board_id: BoardId, user_id: UserId) -> usize {
        let Some(board) = self.lookup(board_id) else {
            return 0;
        };
        let state = board.state.lock().await;
        state.clients.get(&user_id).map_or(0, HashMap::len)
    }
}

/// Registration of one session-request socket.
///
/// Holds the connection's outbound frame queue. Call
/// [`SessionRequestLease::release`] when the socket closes; a lease dropped
/// without release is deregistered in the background.
pub struct SessionRequestLease {
    bridge: Arc<SessionRequestBridge>,
    board_id: BoardId,
    user_id: UserId,
    connection_id: ConnectionId,
    outbound: Option<mpsc::Receiver<String>>,
    released: bool,
}

impl SessionRequestLease {
    /// Board the socket waits on.
    #[must_use]
    pub const fn board_id(&self) -> BoardId {
        self.board_id
    }

    /// User the socket belongs to.
    #[must_use]
    pub const fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Server-side connection identifier.
    #[must_use]
    pub const fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Takes the queue of JSON frames to write to the socket. Returns
    /// `None` after the first call.
    pub fn take_outbound(&mut self) -> Option<mpsc::Receiver<String>> {
        self.outbound.take()
    }

    /// Deregisters the connection. The outbound queue closes once the
    /// bridge has let go of it.
    pub async fn release(mut self) {
        self.released = true;
        self.bridge
            .disconnect(self.board_id, self.user_id, self.connection_id)
            .await;
    }
}

impl Drop for SessionRequestLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let bridge = Arc::clone(&self.bridge);
        let (board_id, user_id, connection_id) = (self.board_id, self.user_id, self.connection_id);
        runtime.spawn(async move {
            bridge.disconnect(board_id, user_id, connection_id).await;
        });
    }
}

impl fmt::Debug for SessionRequestLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRequestLease")
            .field("board_id", &self.board_id)
            .field("user_id", &self.user_id)
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}
