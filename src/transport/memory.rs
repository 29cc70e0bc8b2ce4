//! In-process transport over `tokio::sync::broadcast`.
//!
//! One broadcast channel per subject, created on first subscribe and removed
//! when its last subscriber stream is dropped. Messages published to a
//! subject nobody subscribed to are dropped, exactly like a real pub/sub
//! backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::broadcast;

use super::{MessageStream, Transport, TransportError};

type Topics = Arc<Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>>;

/// In-memory pub/sub.
#[derive(Debug)]
pub struct MemoryTransport {
    /// Subject → broadcast sender.
    topics: Topics,
    /// Ring size of each topic channel.
    buffer_size: usize,
    /// Number of `subscribe` calls served.
    subscriptions: AtomicUsize,
    closed: AtomicBool,
}

impl MemoryTransport {
    /// Creates an empty transport whose topics buffer `buffer_size`
    /// messages for slow subscribers.
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            buffer_size: buffer_size.max(1),
            subscriptions: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Total number of backend subscriptions ever opened.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// Number of subjects with at least one live subscriber stream.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of live subscriber streams on `subject`.
    #[must_use]
    pub fn subscriber_count(&self, subject: &str) -> usize {
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(subject)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

/// One subscriber stream's receiver. Dropping the last subscriber of a
/// subject removes its topic.
struct Subscriber {
    subject: String,
    receiver: Option<broadcast::Receiver<Vec<u8>>>,
    topics: Topics,
}

impl Subscriber {
    async fn next(&mut self) -> Option<Vec<u8>> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(payload) => return Some(payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(subject = %self.subject, skipped, "memory subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        drop(self.receiver.take());
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        if topics
            .get(&self.subject)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            topics.remove(&self.subject);
        }
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(1_024)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = topics.get(subject) {
            // no receivers left is the same as no subscription
            let _ = sender.send(payload);
        }
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<MessageStream, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let receiver = {
            let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
            topics
                .entry(subject.to_string())
                .or_insert_with(|| broadcast::channel(self.buffer_size).0)
                .subscribe()
        };
        self.subscriptions.fetch_add(1, Ordering::SeqCst);

        let subscriber = Subscriber {
            subject: subject.to_string(),
            receiver: Some(receiver),
            topics: Arc::clone(&self.topics),
        };
        let stream = futures_util::stream::unfold(subscriber, |mut subscriber| async move {
            let payload = subscriber.next().await?;
            Some((payload, subscriber))
        });
        Ok(stream.boxed())
    }

    async fn healthy(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // dropping the senders ends every open stream
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
