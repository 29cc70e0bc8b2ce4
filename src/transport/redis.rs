//! Redis pub/sub transport.
//!
//! Publishing goes through a shared [`ConnectionManager`], which reconnects
//! on its own. Every subscription needs a dedicated connection in RESP2
//! subscribe mode, so [`Transport::subscribe`] opens one per subject; the
//! broker keeps that to one per subject per process.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use super::{CloseSignal, MessageStream, Transport, TransportError, millis};
use crate::config::BrokerConfig;

/// Transport backed by Redis `PUBLISH` / `SUBSCRIBE`.
///
/// Closing ends every subscriber stream, which drops its pub/sub
/// connection, and fails all later operations.
pub struct RedisTransport {
    client: redis::Client,
    manager: ConnectionManager,
    connect_timeout: Duration,
    health_timeout: Duration,
    closed: CloseSignal,
}

impl std::fmt::Debug for RedisTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisTransport")
            .field("addr", &self.client.get_connection_info().addr)
            .field("health_timeout", &self.health_timeout)
            .field("closed", &self.closed.is_closed())
            .finish_non_exhaustive()
    }
}

impl RedisTransport {
    /// Connects to the Redis server at `url` (e.g. `redis://localhost:6379`).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] if the URL is invalid or the
    /// server refuses, and [`TransportError::Timeout`] if no connection is
    /// made within [`BrokerConfig::connect_timeout`].
    pub async fn connect(url: &str, config: &BrokerConfig) -> Result<Self, TransportError> {
        let client = redis::Client::open(url).map_err(|e| TransportError::Connect(e.to_string()))?;

        let manager = tokio::time::timeout(
            config.connect_timeout,
            ConnectionManager::new(client.clone()),
        )
        .await
        .map_err(|_| TransportError::Timeout(millis(config.connect_timeout)))?
        .map_err(|e| TransportError::Connect(e.to_string()))?;

        Ok(Self {
            client,
            manager,
            connect_timeout: config.connect_timeout,
            health_timeout: config.health_timeout,
            closed: CloseSignal::new(),
        })
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.closed.check()?;
        let mut conn = self.manager.clone();
        let _receivers: i64 = conn
            .publish(subject, payload)
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<MessageStream, TransportError> {
        self.closed.check()?;
        let mut pubsub = tokio::time::timeout(self.connect_timeout, self.client.get_async_pubsub())
            .await
            .map_err(|_| TransportError::Timeout(millis(self.connect_timeout)))?
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;

        pubsub
            .subscribe(subject)
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;

        let payloads = pubsub
            .into_on_message()
            .map(|message| message.get_payload_bytes().to_vec())
            .boxed();
        Ok(self.closed.guard(payloads))
    }

    async fn healthy(&self) -> bool {
        if self.closed.is_closed() {
            return false;
        }
        let mut conn = self.manager.clone();
        let ping = async move {
            let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
            pong
        };
        matches!(
            tokio::time::timeout(self.health_timeout, ping).await,
            Ok(Ok(_))
        )
    }

    async fn close(&self) {
        if self.closed.close() {
            tracing::debug!("redis transport closed");
        }
    }
}
