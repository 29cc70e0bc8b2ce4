//! Broker: board-level publish/subscribe over an interchangeable transport.
//!
//! [`Broker`] turns domain calls ("broadcast this event to board B", "give me
//! a channel for user U's join decision") into transport operations. It
//! derives the [`Subject`], JSON-encodes the envelope and hands subscribers a
//! [`Listener`] from the local [`ChannelRegistry`], so each process holds at
//! most one backend subscription per subject no matter how many sockets are
//! listening.
//!
//! Publishing is fire-and-forget. Callers run after their mutation has
//! committed and treat an error as "event not delivered"; see
//! [`crate::service::BoardNotifier`].

pub mod registry;
pub mod subject;

use std::sync::Arc;

pub use registry::{ChannelRegistry, Listener};
pub use subject::Subject;

use crate::config::BrokerConfig;
use crate::domain::{BoardEvent, BoardId, SessionRequestStatus, UserId};
use crate::error::BrokerError;
use crate::transport::{self, Transport};

/// Board event broker.
#[derive(Debug)]
pub struct Broker {
    transport: Arc<dyn Transport>,
    boards: ChannelRegistry<BoardEvent>,
    session_requests: ChannelRegistry<SessionRequestStatus>,
}

impl Broker {
    /// Creates a broker over an already-connected transport. Every listener
    /// buffers at most `listener_capacity` events.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, listener_capacity: usize) -> Self {
        Self {
            boards: ChannelRegistry::new(Arc::clone(&transport), listener_capacity),
            session_requests: ChannelRegistry::new(Arc::clone(&transport), listener_capacity),
            transport,
        }
    }

    /// Connects the configured transport and wraps it in a broker.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Transport`] if the backend is unreachable
    /// within the configured connect timeout.
    pub async fn connect(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let transport = transport::connect(config).await?;
        Ok(Self::new(transport, config.listener_capacity))
    }

    /// Publishes `event` to every listener of `board_id`, in every process.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Encode`] if the event cannot be serialized and
    /// [`BrokerError::Transport`] if the publish fails. The event is then
    /// lost; nothing is retried.
    pub async fn broadcast_to_board(
        &self,
        board_id: BoardId,
        event: &BoardEvent,
    ) -> Result<(), BrokerError> {
        let payload = serde_json::to_vec(event)?;
        let subject = Subject::board(board_id);
        self.transport.publish(subject.as_str(), payload).await?;
        tracing::trace!(%subject, kind = event.event_type.as_str(), "board event published");
        Ok(())
    }

    /// Returns a new listener for the events of `board_id`.
    ///
    /// Every call yields an independent listener; all of them receive every
    /// event published after they were created. There is no backlog.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Transport`] if the board had no local
    /// subscription yet and the backend refused one.
    pub async fn get_board_channel(
        &self,
        board_id: BoardId,
    ) -> Result<Listener<BoardEvent>, BrokerError> {
        Ok(self.boards.attach(Subject::board(board_id)).await?)
    }

    /// Publishes an admission decision to the private channel of `user_id`
    /// on `board_id`.
    ///
    /// # Errors
    ///
    /// Same as [`Broker::broadcast_to_board`].
    pub async fn broadcast_update_on_board_session_request(
        &self,
        board_id: BoardId,
        user_id: UserId,
        status: SessionRequestStatus,
    ) -> Result<(), BrokerError> {
        let payload = serde_json::to_vec(&status)?;
        let subject = Subject::session_request(board_id, user_id);
        self.transport.publish(subject.as_str(), payload).await?;
        tracing::debug!(%subject, %status, "session request update published");
        Ok(())
    }

    /// Returns a new listener for admission decisions of `user_id` on
    /// `board_id`.
    ///
    /// # Errors
    ///
    /// Same as [`Broker::get_board_channel`].
    pub async fn get_board_session_request_channel(
        &self,
        board_id: BoardId,
        user_id: UserId,
    ) -> Result<Listener<SessionRequestStatus>, BrokerError> {
        Ok(self
            .session_requests
            .attach(Subject::session_request(board_id, user_id))
            .await?)
    }

    /// Bounded connectivity check of the backing transport.
    pub async fn is_healthy(&self) -> bool {
        self.transport.healthy().await
    }

    /// Closes the transport. Open listeners see end-of-stream.
    pub async fn close(&self) {
        self.transport.close().await;
    }

    /// Number of local listeners on the board subject of `board_id`.
    pub async fn board_listener_count(&self, board_id: BoardId) -> usize {
        self.boards.listener_count(&Subject::board(board_id)).await
    }

    /// Number of local listeners on the private subject of
    /// (`board_id`, `user_id`).
    pub async fn session_request_listener_count(&self, board_id: BoardId, user_id: UserId) -> usize {
        self.session_requests
            .listener_count(&Subject::session_request(board_id, user_id))
            .await
    }

    /// Number of subjects this process currently holds a backend
    /// subscription for.
    pub async fn active_subjects(&self) -> usize {
        self.boards.active_subjects().await + self.session_requests.active_subjects().await
    }
}
