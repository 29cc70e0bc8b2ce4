//! Board notifier: the publishing side used by application services.

use std::sync::Arc;

use serde::Serialize;

use crate::broker::Broker;
use crate::domain::{BoardEvent, BoardEventType, BoardId, SessionRequestStatus, UserId};

/// Publishes board events on behalf of services that have just committed a
/// mutation.
///
/// None of the methods return an error. Events are a best-effort side
/// channel: a failed render or publish is logged and the caller's mutation
/// stands. Clients resynchronize from the REST read endpoints on reconnect.
#[derive(Debug, Clone)]
pub struct BoardNotifier {
    broker: Arc<Broker>,
}

impl BoardNotifier {
    /// Creates a notifier publishing through `broker`.
    #[must_use]
    pub fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }

    /// Returns the underlying broker.
    #[must_use]
    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Renders `payload` and broadcasts it as a `kind` event to `board_id`.
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        board_id: BoardId,
        kind: BoardEventType,
        payload: &T,
    ) {
        match BoardEvent::from_payload(kind, payload) {
            Ok(event) => self.publish_event(board_id, &event).await,
            Err(err) => {
                tracing::warn!(%board_id, kind = kind.as_str(), %err, "failed to render board event");
            }
        }
    }

    /// Broadcasts an already-built event to `board_id`.
    pub async fn publish_event(&self, board_id: BoardId, event: &BoardEvent) {
        if let Err(err) = self.broker.broadcast_to_board(board_id, event).await {
            tracing::warn!(
                %board_id,
                kind = event.event_type.as_str(),
                %err,
                "failed to broadcast board event"
            );
        }
    }

    /// Tells a waiting user the moderator's decision on their join request,
    /// and lets the board know the request changed.
    pub async fn session_request_decided(
        &self,
        board_id: BoardId,
        user_id: UserId,
        status: SessionRequestStatus,
    ) {
        if let Err(err) = self
            .broker
            .broadcast_update_on_board_session_request(board_id, user_id, status)
            .await
        {
            tracing::warn!(%board_id, %user_id, %status, %err, "failed to deliver session request decision");
        }

        #[derive(Serialize)]
        struct RequestUpdate {
            user: UserId,
            status: SessionRequestStatus,
        }
        self.publish(
            board_id,
            BoardEventType::SessionRequestUpdated,
            &RequestUpdate {
                user: user_id,
                status,
            },
        )
        .await;
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::transport::{MemoryTransport, Transport};

    fn notifier() -> (Arc<MemoryTransport>, BoardNotifier) {
        let transport = Arc::new(MemoryTransport::new(64));
        let as_dyn: Arc<dyn Transport> = Arc::clone(&transport) as Arc<dyn Transport>;
        let broker = Arc::new(Broker::new(as_dyn, 16));
        (transport, BoardNotifier::new(broker))
    }

    #[tokio::test]
    async fn publish_renders_typed_payload() {
        let (_transport, notifier) = notifier();
        let board = BoardId::new();
        let Ok(mut listener) = notifier.broker().get_board_channel(board).await else {
            panic!("channel refused");
        };

        let votes: HashMap<u8, u32> = HashMap::from([(4, 2)]);
        notifier.publish(board, BoardEventType::VotesUpdated, &votes).await;

        let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(1), listener.recv()).await
        else {
            panic!("no event received");
        };
        assert_eq!(event.event_type, BoardEventType::VotesUpdated);
        assert_eq!(event.data, json!({"4": 2}));
    }

    #[tokio::test]
    async fn failed_publish_is_swallowed() {
        let (transport, notifier) = notifier();
        transport.close().await;
        // must neither panic nor surface an error
        notifier
            .publish(BoardId::new(), BoardEventType::NoteDeleted, &json!({"note": "n1"}))
            .await;
        notifier
            .session_request_decided(BoardId::new(), UserId::new(), SessionRequestStatus::Accepted)
            .await;
    }

    #[tokio::test]
    async fn decision_reaches_user_and_board() {
        let (_transport, notifier) = notifier();
        let board = BoardId::new();
        let user = UserId::new();
        let broker = notifier.broker();
        let Ok(mut private) = broker.get_board_session_request_channel(board, user).await else {
            panic!("channel refused");
        };
        let Ok(mut board_listener) = broker.get_board_channel(board).await else {
            panic!("channel refused");
        };

        notifier
            .session_request_decided(board, user, SessionRequestStatus::Rejected)
            .await;

        let Ok(Some(status)) = tokio::time::timeout(Duration::from_secs(1), private.recv()).await
        else {
            panic!("no decision received");
        };
        assert_eq!(status, SessionRequestStatus::Rejected);

        let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_secs(1), board_listener.recv()).await
        else {
            panic!("no board event received");
        };
        assert_eq!(event.event_type, BoardEventType::SessionRequestUpdated);
        assert_eq!(
            event.data,
            json!({"user": user.to_string(), "status": "REJECTED"})
        );
    }
}
