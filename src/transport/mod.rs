//! Pub/sub transports: the byte-moving layer beneath the broker.
//!
//! A [`Transport`] publishes opaque payloads under a subject and hands out
//! live streams of payloads for a subject. Delivery is best effort and at
//! most once; nothing is persisted. A stream ends only when the transport is
//! closed or the backend connection behind it is lost, after which a fresh
//! [`Transport::subscribe`] is required.
//!
//! Adapters:
//!
//! - [`NatsTransport`]: NATS core pub/sub (`async-nats`)
//! - [`RedisTransport`]: Redis `PUBLISH`/`SUBSCRIBE` (`redis`)
//! - [`MemoryTransport`]: in-process, for single-node deployments and tests

pub mod memory;
pub mod nats;
pub mod redis;

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::watch;

use crate::config::{BrokerBackend, BrokerConfig};

pub use memory::MemoryTransport;
pub use nats::NatsTransport;
pub use redis::RedisTransport;

/// Stream of raw payloads received on one subject.
pub type MessageStream = BoxStream<'static, Vec<u8>>;

/// Transport-level failure.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The backend could not be reached or refused the connection.
    #[error("connect failed: {0}")]
    Connect(String),

    /// A publish was not accepted by the backend.
    #[error("publish failed: {0}")]
    Publish(String),

    /// A subscription could not be established.
    #[error("subscribe failed: {0}")]
    Subscribe(String),

    /// The backend did not answer in time.
    #[error("timed out after {0} ms")]
    Timeout(u64),

    /// The transport was closed.
    #[error("transport closed")]
    Closed,
}

/// Minimal pub/sub capability the broker is written against.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Publishes `payload` on `subject`.
    ///
    /// A failure means "not delivered"; callers do not retry.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the backend rejects the message or
    /// the connection is gone.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Subscribes to `subject`, returning every payload published after the
    /// subscription is established.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the subscription cannot be set up.
    async fn subscribe(&self, subject: &str) -> Result<MessageStream, TransportError>;

    /// Bounded connectivity check. Never waits longer than the configured
    /// health timeout.
    async fn healthy(&self) -> bool;

    /// Releases backend resources. Open streams end.
    async fn close(&self);
}

/// Connects the transport selected by `config`.
///
/// # Errors
///
/// Returns a [`TransportError`] if the backend cannot be reached within
/// [`BrokerConfig::connect_timeout`].
pub async fn connect(config: &BrokerConfig) -> Result<Arc<dyn Transport>, TransportError> {
    let transport: Arc<dyn Transport> = match &config.backend {
        BrokerBackend::Nats { url } => Arc::new(NatsTransport::connect(url, config).await?),
        BrokerBackend::Redis { url } => Arc::new(RedisTransport::connect(url, config).await?),
        BrokerBackend::Memory => Arc::new(MemoryTransport::new(config.memory_topic_capacity)),
    };
    tracing::info!(backend = config.backend.name(), "transport connected");
    Ok(transport)
}

/// Closed flag of a networked transport. Streams wrapped with
/// [`CloseSignal::guard`] end as soon as the transport is closed.
#[derive(Debug)]
pub(crate) struct CloseSignal {
    closed: watch::Sender<bool>,
}

impl CloseSignal {
    pub(crate) fn new() -> Self {
        Self {
            closed: watch::Sender::new(false),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Fails with [`TransportError::Closed`] once closed.
    pub(crate) fn check(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    /// Marks the transport closed. Returns `false` if it already was.
    pub(crate) fn close(&self) -> bool {
        !self.closed.send_replace(true)
    }

    pub(crate) fn guard(&self, stream: MessageStream) -> MessageStream {
        let mut closed = self.closed.subscribe();
        stream
            .take_until(async move {
                // a dropped sender means the transport itself is gone
                let _ = closed.wait_for(|closed| *closed).await;
            })
            .boxed()
    }
}

/// Milliseconds of a duration, saturating, for error messages.
pub(crate) fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
