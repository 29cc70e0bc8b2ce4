//! NATS core pub/sub transport.

use std::time::Duration;

use async_nats::connection::State;
use async_trait::async_trait;
use futures_util::StreamExt;

use super::{CloseSignal, MessageStream, Transport, TransportError, millis};
use crate::config::BrokerConfig;

/// Transport backed by a single multiplexed NATS client connection.
///
/// Health is read from the client's connection state, so the check never
/// touches the network. After [`Transport::close`] every operation fails and
/// open subscriber streams end.
#[derive(Debug)]
pub struct NatsTransport {
    client: async_nats::Client,
    health_timeout: Duration,
    closed: CloseSignal,
}

impl NatsTransport {
    /// Connects to the NATS server at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] if the server refuses or cannot
    /// be reached, and [`TransportError::Timeout`] if the handshake does not
    /// finish within [`BrokerConfig::connect_timeout`].
    pub async fn connect(url: &str, config: &BrokerConfig) -> Result<Self, TransportError> {
        let options = async_nats::ConnectOptions::new()
            .name("retro-realtime")
            .connection_timeout(config.connect_timeout);

        let client = tokio::time::timeout(config.connect_timeout, options.connect(url))
            .await
            .map_err(|_| TransportError::Timeout(millis(config.connect_timeout)))?
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        Ok(Self {
            client,
            health_timeout: config.health_timeout,
            closed: CloseSignal::new(),
        })
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.closed.check()?;
        self.client
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    async fn subscribe(&self, subject: &str) -> Result<MessageStream, TransportError> {
        self.closed.check()?;
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;
        let payloads = subscriber.map(|message| message.payload.to_vec()).boxed();
        Ok(self.closed.guard(payloads))
    }

    async fn healthy(&self) -> bool {
        !self.closed.is_closed() && matches!(self.client.connection_state(), State::Connected)
    }

    async fn close(&self) {
        if !self.closed.close() {
            return;
        }
        // dropping the guarded subscribers unsubscribes them
        match tokio::time::timeout(self.health_timeout, self.client.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(%err, "nats flush on close failed"),
            Err(_) => tracing::warn!("nats flush on close timed out"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::config::BrokerBackend;

    #[tokio::test]
    async fn unreachable_server_fails_within_bound() {
        let config = BrokerConfig {
            backend: BrokerBackend::Nats {
                url: "nats://127.0.0.1:1".to_string(),
            },
            connect_timeout: Duration::from_millis(500),
            ..BrokerConfig::default()
        };

        let started = Instant::now();
        let result = NatsTransport::connect("nats://127.0.0.1:1", &config).await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
