//! Local channel registry: one backend subscription per subject, fanned out
//! to any number of in-process listeners.
//!
//! The first [`ChannelRegistry::attach`] for a subject subscribes on the
//! transport and spawns a dispatch task that owns the resulting stream and
//! the list of listener senders. Later attaches for the same subject only
//! hand the dispatch task a new sender through its command queue. Subscribes
//! for one subject are serialized by a per-subject gate; the shared map lock
//! is never held while the transport subscribes.
//!
//! # Delivery
//!
//! Each message is decoded once and cloned into every listener before the
//! next message is read, so all listeners of a subject observe the same
//! order. Listener channels are bounded; a listener whose buffer is full
//! misses the event (drop-newest) and the loop moves on. A slow socket must
//! never stall the other clients of a board, and the board state converges
//! again on the next mutation.
//!
//! # Lifetime
//!
//! Dropping a [`Listener`] detaches it. When the last listener is gone the
//! dispatch task removes the subject and drops the backend stream, which
//! unsubscribes. If the backend stream ends, the subject is removed and
//! every listener sees end-of-stream.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};

use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc};

use super::Subject;
use crate::transport::{MessageStream, Transport, TransportError};

/// Instruction for a dispatch task.
enum Command<T> {
    Attach { id: u64, sender: mpsc::Sender<T> },
    Detach(u64),
}

/// Registry-side handle of a running dispatch task.
struct SubjectEntry<T> {
    /// Distinguishes successive dispatch tasks of the same subject.
    generation: u64,
    commands: mpsc::UnboundedSender<Command<T>>,
    listeners: Arc<AtomicUsize>,
}

type SubjectMap<T> = Arc<Mutex<HashMap<Subject, SubjectEntry<T>>>>;

/// Per-process map from subject to its single backend subscription.
///
/// Backend subscribes run outside the map lock, serialized per subject by a
/// gate, so a slow subscribe only holds up attaches to that same subject.
pub struct ChannelRegistry<T> {
    transport: Arc<dyn Transport>,
    subjects: SubjectMap<T>,
    gates: std::sync::Mutex<HashMap<Subject, Arc<Mutex<()>>>>,
    capacity: usize,
    next_id: AtomicU64,
}

impl<T> fmt::Debug for ChannelRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("transport", &self.transport)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl<T> ChannelRegistry<T>
where
    T: DeserializeOwned + Clone + Send + 'static,
{
    /// Creates an empty registry over `transport`. Each listener buffers at
    /// most `capacity` undelivered events.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, capacity: usize) -> Self {
        Self {
            transport,
            subjects: Arc::new(Mutex::new(HashMap::new())),
            gates: std::sync::Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            next_id: AtomicU64::new(0),
        }
    }

    /// Attaches a new listener to `subject`, subscribing on the transport if
    /// this process has no subscription for it yet.
    ///
    /// Every message published after this returns is delivered to the
    /// listener (subject to the overflow policy).
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if a backend subscription was needed and
    /// could not be established.
    pub async fn attach(&self, subject: Subject) -> Result<Listener<T>, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.capacity);

        if let Some(commands) = self.join(&subject, id, &sender).await {
            return Ok(Listener {
                id,
                subject,
                receiver,
                commands,
            });
        }

        let gate = self.gate(&subject);
        let result = {
            let _turn = gate.lock().await;
            // a subscribe for this subject may have finished while we waited
            match self.join(&subject, id, &sender).await {
                Some(commands) => Ok(commands),
                None => self.open(&subject, id, sender).await,
            }
        };
        self.release_gate(&subject, &gate);

        Ok(Listener {
            id,
            subject,
            receiver,
            commands: result?,
        })
    }

    /// Hands `sender` to the running dispatch task of `subject`, if any.
    async fn join(
        &self,
        subject: &Subject,
        id: u64,
        sender: &mpsc::Sender<T>,
    ) -> Option<mpsc::UnboundedSender<Command<T>>> {
        let mut subjects = self.subjects.lock().await;
        let entry = subjects.get(subject)?;
        let attach = Command::Attach {
            id,
            sender: sender.clone(),
        };
        if entry.commands.send(attach).is_ok() {
            entry.listeners.fetch_add(1, Ordering::SeqCst);
            return Some(entry.commands.clone());
        }
        // dispatch task died without deregistering
        subjects.remove(subject);
        None
    }

    /// Subscribes on the transport and starts the dispatch task of
    /// `subject`. Callers hold the subject's gate.
    async fn open(
        &self,
        subject: &Subject,
        id: u64,
        sender: mpsc::Sender<T>,
    ) -> Result<mpsc::UnboundedSender<Command<T>>, TransportError> {
        let stream = self.transport.subscribe(subject.as_str()).await?;
        let (commands, command_rx) = mpsc::unbounded_channel();
        let listeners = Arc::new(AtomicUsize::new(1));

        let mut subjects = self.subjects.lock().await;
        let dispatcher = Dispatcher {
            subject: subject.clone(),
            generation: id,
            stream,
            commands: command_rx,
            listeners: vec![(id, sender)],
            count: Arc::clone(&listeners),
            subjects: Arc::clone(&self.subjects),
        };
        tokio::spawn(dispatcher.run());

        subjects.insert(
            subject.clone(),
            SubjectEntry {
                generation: id,
                commands: commands.clone(),
                listeners,
            },
        );
        tracing::debug!(%subject, "backend subscription opened");
        Ok(commands)
    }

    fn gate(&self, subject: &Subject) -> Arc<Mutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(gates.entry(subject.clone()).or_default())
    }

    /// Drops the gate of `subject` once nobody else is waiting on it.
    fn release_gate(&self, subject: &Subject, gate: &Arc<Mutex<()>>) {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        let idle = gates
            .get(subject)
            .is_some_and(|current| Arc::ptr_eq(current, gate) && Arc::strong_count(gate) == 2);
        if idle {
            gates.remove(subject);
        }
    }

    /// Number of subjects with a backend subscribe in flight or queued.
    #[must_use]
    pub fn pending_subjects(&self) -> usize {
        self.gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of listeners currently attached to `subject`.
    ///
    /// Detaching is processed by the dispatch task, so a just-dropped
    /// listener may still be counted for a moment.
    pub async fn listener_count(&self, subject: &Subject) -> usize {
        self.subjects
            .lock()
            .await
            .get(subject)
            .map_or(0, |entry| entry.listeners.load(Ordering::SeqCst))
    }

    /// Number of subjects with a live backend subscription.
    pub async fn active_subjects(&self) -> usize {
        self.subjects.lock().await.len()
    }
}

/// Receiving end of one local subscription.
///
/// Dropping the listener detaches it from its subject.
pub struct Listener<T> {
    id: u64,
    subject: Subject,
    receiver: mpsc::Receiver<T>,
    commands: mpsc::UnboundedSender<Command<T>>,
}

impl<T> Listener<T> {
    /// Waits for the next event. Returns `None` once the backend
    /// subscription has ended; callers should then reconnect.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Returns an already-buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Subject this listener is attached to.
    #[must_use]
    pub fn subject(&self) -> &Subject {
        &self.subject
    }
}

impl<T> Drop for Listener<T> {
    fn drop(&mut self) {
        // the dispatch task may already be gone
        let _ = self.commands.send(Command::Detach(self.id));
    }
}

impl<T> fmt::Debug for Listener<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

/// Owns one backend stream and the listeners of its subject.
struct Dispatcher<T> {
    subject: Subject,
    generation: u64,
    stream: MessageStream,
    commands: mpsc::UnboundedReceiver<Command<T>>,
    listeners: Vec<(u64, mpsc::Sender<T>)>,
    count: Arc<AtomicUsize>,
    subjects: SubjectMap<T>,
}

impl<T> Dispatcher<T>
where
    T: DeserializeOwned + Clone + Send + 'static,
{
    async fn run(mut self) {
        loop {
            tokio::select! {
                // attaches queued before a publish must be applied before
                // the published message is fanned out
                biased;

                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    self.apply(command);
                }
                message = self.stream.next() => {
                    let Some(payload) = message else {
                        tracing::warn!(subject = %self.subject, "backend subscription ended");
                        self.retire(true).await;
                        break;
                    };
                    self.dispatch(&payload);
                }
            }

            if self.listeners.is_empty() && self.retire(false).await {
                break;
            }
        }
        tracing::debug!(subject = %self.subject, "dispatch loop stopped");
    }

    fn apply(&mut self, command: Command<T>) {
        match command {
            Command::Attach { id, sender } => self.listeners.push((id, sender)),
            Command::Detach(id) => {
                let before = self.listeners.len();
                self.listeners.retain(|(listener, _)| *listener != id);
                self.forget(before.saturating_sub(self.listeners.len()));
            }
        }
    }

    fn dispatch(&mut self, payload: &[u8]) {
        let event = match serde_json::from_slice::<T>(payload) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(subject = %self.subject, %err, "dropping undecodable message");
                return;
            }
        };

        let before = self.listeners.len();
        let subject = &self.subject;
        self.listeners
            .retain(|(id, sender)| match sender.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(%subject, listener = id, "listener buffer full, event dropped");
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            });
        self.forget(before.saturating_sub(self.listeners.len()));
    }

    fn forget(&self, removed: usize) {
        if removed > 0 {
            self.count.fetch_sub(removed, Ordering::SeqCst);
        }
    }

    /// Removes this task's subject entry. Unless `force`d, gives up (and
    /// returns `false`) when an attach raced in.
    async fn retire(&mut self, force: bool) -> bool {
        let map = Arc::clone(&self.subjects);
        let mut subjects = map.lock().await;
        if !force {
            while let Ok(command) = self.commands.try_recv() {
                self.apply(command);
            }
            if !self.listeners.is_empty() {
                return false;
            }
        }
        if subjects
            .get(&self.subject)
            .is_some_and(|entry| entry.generation == self.generation)
        {
            subjects.remove(&self.subject);
        }
        true
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::{Duration, Instant};

    use async_trait::async_trait;
    use futures_util::future::join_all;

    use super::*;
    use crate::domain::BoardId;
    use crate::transport::MemoryTransport;

    /// Memory transport whose subscribes to one subject take `delay`.
    #[derive(Debug)]
    struct SlowSubscribe {
        inner: MemoryTransport,
        slow: Option<String>,
        delay: Duration,
    }

    #[async_trait]
    impl Transport for SlowSubscribe {
        async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), TransportError> {
            self.inner.publish(subject, payload).await
        }

        async fn subscribe(&self, subject: &str) -> Result<MessageStream, TransportError> {
            if self.slow.as_deref().is_none_or(|slow| slow == subject) {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.subscribe(subject).await
        }

        async fn healthy(&self) -> bool {
            self.inner.healthy().await
        }

        async fn close(&self) {
            self.inner.close().await;
        }
    }

    fn slow_registry(
        slow: Option<&Subject>,
        delay: Duration,
    ) -> (Arc<SlowSubscribe>, Arc<ChannelRegistry<u32>>) {
        let transport = Arc::new(SlowSubscribe {
            inner: MemoryTransport::new(64),
            slow: slow.map(|subject| subject.as_str().to_string()),
            delay,
        });
        let as_dyn: Arc<dyn Transport> = Arc::clone(&transport) as Arc<dyn Transport>;
        (transport, Arc::new(ChannelRegistry::new(as_dyn, 8)))
    }

    fn registry(capacity: usize) -> (Arc<MemoryTransport>, ChannelRegistry<u32>) {
        let transport = Arc::new(MemoryTransport::new(64));
        let as_dyn: Arc<dyn Transport> = Arc::clone(&transport) as Arc<dyn Transport>;
        (transport, ChannelRegistry::new(as_dyn, capacity))
    }

    async fn attach(registry: &ChannelRegistry<u32>, subject: &Subject) -> Listener<u32> {
        let Ok(listener) = registry.attach(subject.clone()).await else {
            panic!("attach to {subject} failed");
        };
        listener
    }

    async fn recv(listener: &mut Listener<u32>) -> Option<u32> {
        let Ok(received) = tokio::time::timeout(Duration::from_secs(1), listener.recv()).await
        else {
            panic!("timed out waiting on {}", listener.subject());
        };
        received
    }

    #[tokio::test]
    async fn one_backend_subscription_per_subject() {
        let (transport, registry) = registry(8);
        let subject = Subject::board(BoardId::new());
        let mut listeners = Vec::new();
        for _ in 0..5 {
            listeners.push(attach(&registry, &subject).await);
        }
        assert_eq!(transport.subscription_count(), 1);
        assert_eq!(registry.listener_count(&subject).await, 5);
        assert_eq!(registry.active_subjects().await, 1);
    }

    #[tokio::test]
    async fn late_listener_gets_no_backlog() {
        let (transport, registry) = registry(8);
        let subject = Subject::board(BoardId::new());
        let mut early = attach(&registry, &subject).await;
        tokio_test::assert_ok!(transport.publish(subject.as_str(), b"1".to_vec()).await);
        assert_eq!(recv(&mut early).await, Some(1));

        let mut late = attach(&registry, &subject).await;
        tokio_test::assert_ok!(transport.publish(subject.as_str(), b"2".to_vec()).await);
        assert_eq!(recv(&mut early).await, Some(2));
        assert_eq!(recv(&mut late).await, Some(2));
    }

    #[tokio::test]
    async fn full_listener_drops_newest_without_stalling_others() {
        let (transport, registry) = registry(2);
        let subject = Subject::board(BoardId::new());
        let mut slow = attach(&registry, &subject).await;
        let mut fast = attach(&registry, &subject).await;

        for n in 1..=5_u32 {
            let payload = n.to_string().into_bytes();
            tokio_test::assert_ok!(transport.publish(subject.as_str(), payload).await);
            assert_eq!(recv(&mut fast).await, Some(n));
        }

        assert_eq!(slow.try_recv(), Some(1));
        assert_eq!(slow.try_recv(), Some(2));
        assert_eq!(slow.try_recv(), None);
    }

    #[tokio::test]
    async fn undecodable_message_is_skipped() {
        let (transport, registry) = registry(8);
        let subject = Subject::board(BoardId::new());
        let mut listener = attach(&registry, &subject).await;
        tokio_test::assert_ok!(transport.publish(subject.as_str(), b"not json".to_vec()).await);
        tokio_test::assert_ok!(transport.publish(subject.as_str(), b"7".to_vec()).await);
        assert_eq!(recv(&mut listener).await, Some(7));
    }

    #[tokio::test]
    async fn last_detach_drops_backend_subscription() {
        let (transport, registry) = registry(8);
        let subject = Subject::board(BoardId::new());
        let a = attach(&registry, &subject).await;
        let b = attach(&registry, &subject).await;

        drop(a);
        settle!(registry.listener_count(&subject).await == 1);
        assert_eq!(transport.subscriber_count(subject.as_str()), 1);

        drop(b);
        settle!(registry.active_subjects().await == 0);
        settle!(transport.subscriber_count(subject.as_str()) == 0);

        // a fresh attach resubscribes
        let _c = attach(&registry, &subject).await;
        assert_eq!(transport.subscription_count(), 2);
    }

    #[tokio::test]
    async fn backend_end_closes_listeners() {
        let (transport, registry) = registry(8);
        let subject = Subject::board(BoardId::new());
        let mut listener = attach(&registry, &subject).await;
        transport.close().await;
        assert_eq!(recv(&mut listener).await, None);
        settle!(registry.active_subjects().await == 0);
    }

    #[tokio::test]
    async fn subscribe_failure_is_reported() {
        let (transport, registry) = registry(8);
        transport.close().await;
        let result = registry.attach(Subject::board(BoardId::new())).await;
        assert!(matches!(result, Err(TransportError::Closed)));
        assert_eq!(registry.active_subjects().await, 0);
    }

    #[tokio::test]
    async fn concurrent_attaches_share_one_subscription() {
        let (transport, registry) = slow_registry(None, Duration::from_millis(50));
        let subject = Subject::board(BoardId::new());

        let attaches = (0..16).map(|_| registry.attach(subject.clone()));
        let mut listeners = Vec::new();
        for result in join_all(attaches).await {
            let Ok(listener) = result else {
                panic!("concurrent attach failed");
            };
            listeners.push(listener);
        }

        assert_eq!(transport.inner.subscription_count(), 1);
        assert_eq!(registry.listener_count(&subject).await, 16);
        assert_eq!(registry.pending_subjects(), 0);

        tokio_test::assert_ok!(transport.publish(subject.as_str(), b"3".to_vec()).await);
        for listener in &mut listeners {
            assert_eq!(recv(listener).await, Some(3));
        }
    }

    #[tokio::test]
    async fn slow_subscribe_does_not_block_other_subjects() {
        let slow = Subject::board(BoardId::new());
        let (_transport, registry) = slow_registry(Some(&slow), Duration::from_millis(800));

        let pending = tokio::spawn({
            let registry = Arc::clone(&registry);
            let slow = slow.clone();
            async move { registry.attach(slow).await.is_ok() }
        });
        settle!(registry.pending_subjects() == 1);

        let started = Instant::now();
        let other = Subject::board(BoardId::new());
        let Ok(_listener) = registry.attach(other.clone()).await else {
            panic!("attach to {other} failed");
        };
        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(registry.listener_count(&other).await, 1);

        let Ok(attached) = pending.await else {
            panic!("slow attach panicked");
        };
        assert!(attached);
    }
}
