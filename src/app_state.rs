//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::broker::Broker;
use crate::ws::SessionRequestBridge;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Broker for board channels and health.
    pub broker: Arc<Broker>,
    /// Registry of sockets waiting on a join decision.
    pub session_requests: Arc<SessionRequestBridge>,
}

impl AppState {
    /// Builds the state around `broker`, with `outbound_capacity` frames of
    /// buffering per session-request socket.
    #[must_use]
    pub fn new(broker: Arc<Broker>, outbound_capacity: usize) -> Self {
        let session_requests = Arc::new(SessionRequestBridge::new(
            Arc::clone(&broker),
            outbound_capacity,
        ));
        Self {
            broker,
            session_requests,
        }
    }
}
