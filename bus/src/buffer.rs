//! Delayed-redelivery buffer.
//!
//! A long-running consumer that drains every `{topic}:delayed` holding topic,
//! holds each event for a fixed cooldown, and republishes it undecorated to
//! its original topic. One message is in flight at a time per instance, so
//! throughput is bounded by `cooldown / number-of-instances`.
//!
//! Per-message state machine:
//!
//! ```text
//! RECEIVED -> VALID   -> HELD -> REPUBLISHED (ack)
//!          -> INVALID -> SKIPPED (ack, log, continue)
//! ```
//!
//! Acknowledgement is deliberately late: a delivery is acked only after a
//! successful republish, so a crash or shutdown during the cooldown leaves it
//! unacknowledged and the transport redelivers it. Duplicates are possible,
//! loss is not (at-least-once).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};

use crate::broker::{Broker, Delivery, TopicSelector};
use crate::error::{BusError, Result};
use crate::types::{original_topic, EventEnvelope};

/// Outcome of handling one holding-topic delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handled {
    /// Republished to the original topic and acknowledged.
    Republished,
    /// Invalid or empty; acknowledged and dropped.
    Skipped,
    /// Shutdown arrived during the cooldown; left unacknowledged.
    Interrupted,
}

/// Background consumer for the `*:delayed` holding topics.
pub struct RedeliveryBuffer {
    broker: Arc<dyn Broker>,
    cooldown: Duration,
    shutdown: watch::Receiver<bool>,
}

impl RedeliveryBuffer {
    /// Creates a buffer over `broker` holding each event for `cooldown`.
    ///
    /// `shutdown` is the bus-wide signal; a pending cooldown wait is
    /// abandoned when it fires, leaving the delivery unacknowledged for
    /// redelivery after restart.
    pub fn new(
        broker: Arc<dyn Broker>,
        cooldown: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            broker,
            cooldown,
            shutdown,
        }
    }

    /// Runs the consumption loop until shutdown.
    ///
    /// # Errors
    ///
    /// A republish failure propagates out of the loop; the caller (the
    /// daemon) decides whether to log-and-exit or restart the buffer. The
    /// failed delivery stays unacknowledged either way.
    pub async fn run(&self) -> Result<()> {
        let mut subscription = self.broker.subscribe(TopicSelector::AllDelayed).await?;
        let mut shutdown = self.shutdown.clone();
        info!(cooldown_secs = self.cooldown.as_secs(), "Redelivery buffer started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Redelivery buffer shutting down");
                        return Ok(());
                    }
                }
                delivery = subscription.recv() => {
                    match delivery {
                        Some(delivery) => {
                            if self.handle_delivery(delivery).await? == Handled::Interrupted {
                                info!("Redelivery buffer shutting down mid-hold");
                                return Ok(());
                            }
                        }
                        None => {
                            return Err(BusError::SubscriptionClosed("*:delayed".to_string()));
                        }
                    }
                }
            }
        }
    }

    /// Handles one holding-topic delivery end to end.
    async fn handle_delivery(&self, delivery: Delivery) -> Result<Handled> {
        let span = tracing::info_span!(
            "bus.redeliver",
            delivery_id = %delivery.id(),
            holding_topic = delivery.topic(),
            original_topic = tracing::field::Empty,
        );

        async {
            let Some(envelope) = parse_delayed(&delivery) else {
                // Soft skip: acknowledged so it is never redelivered.
                delivery.ack();
                return Ok(Handled::Skipped);
            };

            // The holding-topic tag is authoritative for the original name;
            // the topic the delivery arrived on is only used as a fallback.
            let tagged = envelope.event_type.as_deref().unwrap_or(delivery.topic());
            let Some(topic) = original_topic(tagged) else {
                warn!(tagged, "Holding-topic tag has no :delayed suffix, skipping");
                delivery.ack();
                return Ok(Handled::Skipped);
            };
            let topic = topic.to_string();
            tracing::Span::current().record("original_topic", topic.as_str());

            if !self.hold().await {
                // Not acknowledged: the transport redelivers after restart.
                return Ok(Handled::Interrupted);
            }

            let bytes = envelope.into_redelivered().to_bytes()?;
            let mut lease = self.broker.acquire().await?;
            let sent = lease.send(&topic, bytes).await;
            let released = lease.release().await;
            sent?;
            released?;

            // Ack strictly after the republish succeeded (at-least-once).
            delivery.ack();
            debug!(topic = %topic, "Delayed event republished");
            Ok(Handled::Republished)
        }
        .instrument(span)
        .await
    }

    /// Waits out the cooldown; returns `false` if shutdown arrived first.
    async fn hold(&self) -> bool {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(self.cooldown) => true,
            changed = shutdown.changed() => {
                !(changed.is_err() || *shutdown.borrow())
            }
        }
    }
}

/// Parses a holding-topic body, logging and returning `None` on anything
/// empty or malformed.
fn parse_delayed(delivery: &Delivery) -> Option<EventEnvelope> {
    if delivery.payload().is_empty() {
        warn!("Empty delayed message, skipping");
        return None;
    }

    match EventEnvelope::from_bytes(delivery.payload()) {
        Ok(envelope) if envelope.is_empty() => {
            warn!("Delayed message with no payload fields, skipping");
            None
        }
        Ok(envelope) => Some(envelope),
        Err(err) => {
            warn!(error = %err, "Malformed delayed message, skipping");
            None
        }
    }
}
