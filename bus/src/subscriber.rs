//! Generic long-lived topic consumer.
//!
//! [`Subscriber::subscribe`] attaches a callback to a topic and invokes it
//! once per message, awaiting each invocation before pulling the next, so a
//! single consumer never overlaps callbacks (strict arrival order within the
//! subscription).
//!
//! # Callback error policy
//!
//! Log-and-continue, uniformly: a failing callback is logged inside the
//! message span, the delivery is still acknowledged, and the loop moves on.
//! The consumer never dies because one handler failed, and a poison message
//! cannot wedge the topic.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, trace, warn, Instrument};

use crate::broker::{Broker, Delivery, TopicSelector};
use crate::error::{BusError, Result};
use crate::types::EventEnvelope;

/// Long-lived consumer binding callbacks to topics.
#[derive(Clone)]
pub struct Subscriber {
    broker: Arc<dyn Broker>,
    shutdown: watch::Receiver<bool>,
}

impl Subscriber {
    /// Creates a subscriber over `broker`, stopping when `shutdown` fires.
    pub fn new(broker: Arc<dyn Broker>, shutdown: watch::Receiver<bool>) -> Self {
        Self { broker, shutdown }
    }

    /// Consumes `topic`, invoking `callback` per message until shutdown.
    ///
    /// Does not return while the subscription is healthy. Messages without a
    /// payload are skipped with a warning; callback failures are logged and
    /// the loop continues.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be established or the
    /// transport closes it.
    pub async fn subscribe<F, Fut>(&self, topic: &str, callback: F) -> Result<()>
    where
        F: Fn(EventEnvelope) -> Fut + Send + Sync,
        Fut: Future<Output = anyhow::Result<()>> + Send,
    {
        let mut subscription = self
            .broker
            .subscribe(TopicSelector::exact(topic))
            .await?;
        let mut shutdown = self.shutdown.clone();
        info!(topic, "Subscriber attached");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(topic, "Subscriber shutting down");
                        return Ok(());
                    }
                }
                delivery = subscription.recv() => {
                    match delivery {
                        Some(delivery) => self.handle_delivery(&callback, delivery).await,
                        None => return Err(BusError::SubscriptionClosed(topic.to_string())),
                    }
                }
            }
        }
    }

    /// Processes one delivery inside its own span.
    async fn handle_delivery<F, Fut>(&self, callback: &F, delivery: Delivery)
    where
        F: Fn(EventEnvelope) -> Fut + Send + Sync,
        Fut: Future<Output = anyhow::Result<()>> + Send,
    {
        let span = tracing::info_span!(
            "bus.consume",
            delivery_id = %delivery.id(),
            topic = delivery.topic(),
        );

        async {
            if delivery.payload().is_empty() {
                warn!("Message without payload, skipping");
                delivery.ack();
                return;
            }

            let envelope = match EventEnvelope::from_bytes(delivery.payload()) {
                Ok(envelope) => envelope,
                Err(err) => {
                    warn!(error = %err, "Malformed message, skipping");
                    delivery.ack();
                    return;
                }
            };

            if envelope.is_empty() {
                warn!("Message with no payload fields, skipping");
                delivery.ack();
                return;
            }

            match callback(envelope).await {
                Ok(()) => trace!("Callback completed"),
                Err(err) => error!(error = %err, "Callback failed, continuing"),
            }

            // Acknowledged either way: a failing handler is not retried.
            delivery.ack();
        }
        .instrument(span)
        .await;
    }
}
