//! Broker seam and in-process transport.
//!
//! The bus talks to its durable log through two small traits: [`Broker`]
//! (a pooled, long-lived connection handle) and [`ProducerLease`] (a scoped
//! acquisition for a single publish). Consumers attach through
//! [`Broker::subscribe`] with a [`TopicSelector`], either an exact topic or
//! the `*:delayed` wildcard used by the redelivery buffer.
//!
//! Deliveries carry an explicit [`Delivery::ack`] so consumers control when
//! a message is considered processed; the bus acknowledges only after the
//! work that makes redelivery unnecessary has completed (at-least-once).
//!
//! [`MemoryBroker`] is the in-process implementation bundled with the crate,
//! used by the tests and by single-node deployments. Networked transports
//! (Kafka-style log brokers) implement the same traits and plug into the
//! rest of the bus unchanged.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::{BusError, Result};
use crate::types::DELAYED_SUFFIX;

/// Default per-subscription delivery buffer.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Most recent sends kept in the retained log; older entries are dropped so
/// a long-running process does not accumulate every payload it ever routed.
pub const RETAINED_LOG_CAPACITY: usize = 1024;

/// Selects which topics a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicSelector {
    /// A single named topic.
    Exact(String),

    /// Every holding topic: any topic name ending in `:delayed`.
    ///
    /// Tenant separation is not enforced at the topic level, so this matches
    /// delayed traffic across all tenants and base topics.
    AllDelayed,
}

impl TopicSelector {
    /// Creates an exact-topic selector.
    pub fn exact(topic: impl Into<String>) -> Self {
        Self::Exact(topic.into())
    }

    /// Returns `true` if `topic` falls under this selector.
    ///
    /// # Example
    ///
    /// ```rust
    /// use conveyor_bus::broker::TopicSelector;
    ///
    /// assert!(TopicSelector::exact("event:test").matches("event:test"));
    /// assert!(TopicSelector::AllDelayed.matches("event:test:delayed"));
    /// assert!(!TopicSelector::AllDelayed.matches("event:test"));
    /// ```
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        match self {
            Self::Exact(name) => name == topic,
            Self::AllDelayed => topic.ends_with(DELAYED_SUFFIX),
        }
    }
}

/// A single message handed to a consumer.
///
/// The delivery stays in-flight until [`Delivery::ack`] is called; an
/// unacknowledged delivery is the transport's signal to redeliver after a
/// crash or shutdown.
#[derive(Debug)]
pub struct Delivery {
    id: Uuid,
    topic: String,
    payload: Vec<u8>,
    acked: Arc<AtomicBool>,
}

impl Delivery {
    /// Builds a delivery for `topic`, returning the shared acknowledgement
    /// flag the transport keeps for its in-flight ledger.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> (Self, Arc<AtomicBool>) {
        let acked = Arc::new(AtomicBool::new(false));
        let delivery = Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            payload,
            acked: Arc::clone(&acked),
        };
        (delivery, acked)
    }

    /// Transport-assigned message id, recorded in trace spans.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The topic this message arrived on.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The raw wire body.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Marks the delivery processed.
    ///
    /// Idempotent; acknowledging twice has no further effect.
    pub fn ack(&self) {
        self.acked.store(true, Ordering::SeqCst);
        trace!(delivery_id = %self.id, topic = %self.topic, "Delivery acknowledged");
    }

    /// Whether the delivery has been acknowledged.
    #[must_use]
    pub fn is_acked(&self) -> bool {
        self.acked.load(Ordering::SeqCst)
    }
}

/// A consumer's attachment to the broker.
///
/// Transports feed deliveries into the paired sender obtained from
/// [`Subscription::channel`]; consumers pull them here in arrival order.
#[derive(Debug)]
pub struct Subscription {
    selector: TopicSelector,
    rx: mpsc::Receiver<Delivery>,
}

impl Subscription {
    /// Creates a subscription and the sender a transport feeds it through.
    #[must_use]
    pub fn channel(selector: TopicSelector, capacity: usize) -> (mpsc::Sender<Delivery>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { selector, rx })
    }

    /// The selector this subscription was created with.
    #[must_use]
    pub fn selector(&self) -> &TopicSelector {
        &self.selector
    }

    /// Receives the next delivery, or `None` once the transport has closed
    /// the subscription.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }
}

/// A scoped producer acquisition for a single publish.
///
/// Callers must invoke [`ProducerLease::release`] on every exit path once
/// acquired, including after a failed send.
#[async_trait]
pub trait ProducerLease: Send {
    /// Sends one wire body to `topic`.
    async fn send(&mut self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Returns the lease to the pooled connection.
    async fn release(self: Box<Self>) -> Result<()>;
}

/// A pooled, long-lived connection to the durable log broker.
///
/// Constructed explicitly and owned by the process-wide
/// [`BusContext`](crate::context::BusContext); there is no module-level
/// shared client.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Acquires a scoped producer lease for one publish.
    async fn acquire(&self) -> Result<Box<dyn ProducerLease>>;

    /// Attaches a consumer matching `selector`.
    async fn subscribe(&self, selector: TopicSelector) -> Result<Subscription>;
}

/// Record of one send retained by the in-process log.
#[derive(Debug, Clone)]
pub struct PublishedRecord {
    /// Topic the body was sent to.
    pub topic: String,
    /// The wire body.
    pub payload: Vec<u8>,
}

/// In-flight bookkeeping for one delivery.
#[derive(Debug)]
struct DeliveryRecord {
    topic: String,
    acked: Arc<AtomicBool>,
}

#[derive(Debug)]
struct SubscriptionEntry {
    selector: TopicSelector,
    tx: mpsc::Sender<Delivery>,
}

#[derive(Debug, Default)]
struct MemoryBrokerInner {
    subscriptions: Vec<SubscriptionEntry>,
    published: VecDeque<PublishedRecord>,
    deliveries: Vec<DeliveryRecord>,
    active_leases: usize,
}

/// In-process broker backed by per-subscription channels.
///
/// Sends are appended to a bounded retained log (the most recent
/// [`RETAINED_LOG_CAPACITY`] sends) and fanned out to every matching
/// subscription. Unacknowledged deliveries stay visible through
/// [`MemoryBroker::unacked_count`]; acknowledged ledger entries are pruned
/// on the next send, so memory use is proportional to in-flight work, not
/// lifetime throughput. This transport surfaces ack state but leaves
/// crash-redelivery to networked implementations.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    inner: Arc<Mutex<MemoryBrokerInner>>,
    capacity: usize,
}

impl MemoryBroker {
    /// Creates a broker with the default per-subscription buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a broker with a custom per-subscription buffer.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        debug!(capacity, "Created in-process broker");
        Self {
            inner: Arc::new(Mutex::new(MemoryBrokerInner::default())),
            capacity,
        }
    }

    /// Routes one body to the retained log and all matching subscriptions.
    async fn route(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let mut pending = Vec::new();

        {
            let mut inner = self.inner.lock().await;
            inner.subscriptions.retain(|entry| !entry.tx.is_closed());
            inner
                .deliveries
                .retain(|record| !record.acked.load(Ordering::SeqCst));
            if inner.published.len() == RETAINED_LOG_CAPACITY {
                inner.published.pop_front();
            }
            inner.published.push_back(PublishedRecord {
                topic: topic.to_string(),
                payload: payload.clone(),
            });

            let matching: Vec<mpsc::Sender<Delivery>> = inner
                .subscriptions
                .iter()
                .filter(|entry| entry.selector.matches(topic))
                .map(|entry| entry.tx.clone())
                .collect();

            // Ledger entries are created under the lock so unacked_count
            // never under-reports an in-flight delivery.
            for tx in matching {
                let (delivery, acked) = Delivery::new(topic, payload.clone());
                inner.deliveries.push(DeliveryRecord {
                    topic: topic.to_string(),
                    acked,
                });
                pending.push((tx, delivery));
            }
        }

        let mut receivers = 0usize;
        for (tx, delivery) in pending {
            if tx.send(delivery).await.is_ok() {
                receivers += 1;
            }
        }

        if receivers == 0 {
            warn!(topic, "No active subscribers for topic; body retained in log only");
        } else {
            trace!(topic, receivers, "Body routed to subscribers");
        }

        Ok(())
    }

    /// Snapshot of the retained log, oldest first.
    pub async fn published(&self) -> Vec<PublishedRecord> {
        self.inner.lock().await.published.iter().cloned().collect()
    }

    /// Sends retained for `topic`, in order.
    pub async fn published_to(&self, topic: &str) -> Vec<Vec<u8>> {
        self.inner
            .lock()
            .await
            .published
            .iter()
            .filter(|record| record.topic == topic)
            .map(|record| record.payload.clone())
            .collect()
    }

    /// Number of deliveries handed out and not yet acknowledged.
    pub async fn unacked_count(&self) -> usize {
        self.inner
            .lock()
            .await
            .deliveries
            .iter()
            .filter(|record| !record.acked.load(Ordering::SeqCst))
            .count()
    }

    /// Unacknowledged deliveries for `topic`.
    pub async fn unacked_on(&self, topic: &str) -> usize {
        self.inner
            .lock()
            .await
            .deliveries
            .iter()
            .filter(|record| record.topic == topic && !record.acked.load(Ordering::SeqCst))
            .count()
    }

    /// Ledger entries currently held, acknowledged or not.
    ///
    /// Acknowledged entries linger only until the next send prunes them.
    pub async fn delivery_ledger_len(&self) -> usize {
        self.inner.lock().await.deliveries.len()
    }

    /// Producer leases currently held.
    pub async fn active_leases(&self) -> usize {
        self.inner.lock().await.active_leases
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn acquire(&self) -> Result<Box<dyn ProducerLease>> {
        let mut inner = self.inner.lock().await;
        inner.active_leases += 1;
        trace!(active_leases = inner.active_leases, "Producer lease acquired");
        Ok(Box::new(MemoryLease {
            broker: self.clone(),
        }))
    }

    async fn subscribe(&self, selector: TopicSelector) -> Result<Subscription> {
        let (tx, subscription) = Subscription::channel(selector.clone(), self.capacity);
        let mut inner = self.inner.lock().await;
        inner.subscriptions.push(SubscriptionEntry { selector, tx });
        debug!(
            subscriber_count = inner.subscriptions.len(),
            selector = ?subscription.selector(),
            "New subscription attached"
        );
        Ok(subscription)
    }
}

/// Lease handed out by [`MemoryBroker`].
struct MemoryLease {
    broker: MemoryBroker,
}

#[async_trait]
impl ProducerLease for MemoryLease {
    async fn send(&mut self, topic: &str, payload: Vec<u8>) -> Result<()> {
        if topic.is_empty() {
            return Err(BusError::broker("topic name cannot be empty"));
        }
        self.broker.route(topic, payload).await
    }

    async fn release(self: Box<Self>) -> Result<()> {
        let mut inner = self.broker.inner.lock().await;
        inner.active_leases = inner.active_leases.saturating_sub(1);
        trace!(active_leases = inner.active_leases, "Producer lease released");
        Ok(())
    }
}
