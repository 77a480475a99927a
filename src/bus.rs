//! Publish/subscribe fanout of deltas, one topic per session.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::common::SessionId;
use crate::delta::Delta;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("event bus backend failure: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// The subscriber fell behind and `0` deltas were dropped. Recover with
    /// a fresh snapshot.
    #[error("subscriber lagged behind by {0} deltas")]
    Lagged(u64),
    #[error("topic closed")]
    Closed,
}

/// Live feed of one session's deltas. Starts at the moment of subscription;
/// nothing is replayed.
#[derive(Debug)]
pub struct Subscription {
    session_id: SessionId,
    rx: broadcast::Receiver<Delta>,
}

impl Subscription {
    pub fn new(session_id: SessionId, rx: broadcast::Receiver<Delta>) -> Self {
        Self { session_id, rx }
    }

    /// A feed that is already over. `recv` reports `Closed` straight away.
    pub fn closed(session_id: SessionId) -> Self {
        let (tx, rx) = broadcast::channel(1);
        drop(tx);
        Self { session_id, rx }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Next delta. Cancel safe.
    pub async fn recv(&mut self) -> Result<Delta, SubscriptionError> {
        match self.rx.recv().await {
            Ok(delta) => Ok(delta),
            Err(broadcast::error::RecvError::Lagged(n)) => Err(SubscriptionError::Lagged(n)),
            Err(broadcast::error::RecvError::Closed) => Err(SubscriptionError::Closed),
        }
    }
}

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Fan `delta` out to every current subscriber of its session. Returns
    /// how many subscribers it reached.
    async fn publish(&self, delta: Delta) -> Result<usize, BusError>;

    async fn subscribe(&self, session_id: &SessionId) -> Result<Subscription, BusError>;

    /// Drop the topic. Open subscriptions end with `Closed`.
    async fn close(&self, session_id: &SessionId);
}

/// In-process bus built on `tokio::sync::broadcast`, one channel per topic.
#[derive(Debug)]
pub struct BroadcastBus {
    topics: DashMap<SessionId, broadcast::Sender<Delta>>,
    capacity: usize,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, session_id: &SessionId) -> broadcast::Sender<Delta> {
        self.topics
            .entry(session_id.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EventBus for BroadcastBus {
    async fn publish(&self, delta: Delta) -> Result<usize, BusError> {
        let tx = self.sender(&delta.session_id);
        // No receivers is not a failure: the delta simply has no audience.
        Ok(tx.send(delta).unwrap_or(0))
    }

    async fn subscribe(&self, session_id: &SessionId) -> Result<Subscription, BusError> {
        let rx = self.sender(session_id).subscribe();
        Ok(Subscription::new(session_id.clone(), rx))
    }

    async fn close(&self, session_id: &SessionId) {
        self.topics.remove(session_id);
    }
}
