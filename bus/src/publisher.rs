//! Publishing side of the bus.
//!
//! [`Publisher::publish`] routes one event either to its real topic or, when
//! the high-traffic path is throttled, to the paired `{topic}:delayed`
//! holding topic. Each call acquires exactly one scoped producer lease from
//! the pooled broker connection and releases it on every exit path; the
//! whole operation runs inside one trace span opened before any broker
//! interaction.
//!
//! Rate-limit policy on the high-traffic path is fail-closed: if the shared
//! counter store is unreachable the error propagates and nothing is
//! published to either topic.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn, Instrument};

use crate::broker::Broker;
use crate::config::Config;
use crate::error::Result;
use crate::rate_limit::{Decision, RateLimiter};
use crate::types::{delayed_topic, EventEnvelope};

/// Publishes events with optional rate-limited diversion.
#[derive(Clone)]
pub struct Publisher {
    broker: Arc<dyn Broker>,
    limiter: RateLimiter,
    rate_limit: u64,
    rate_window: std::time::Duration,
}

impl Publisher {
    /// Creates a publisher over `broker`, consulting `limiter` on the
    /// high-traffic path with the limits from `config`.
    pub fn new(broker: Arc<dyn Broker>, limiter: RateLimiter, config: &Config) -> Self {
        Self {
            broker,
            limiter,
            rate_limit: config.rate_limit,
            rate_window: config.rate_window,
        }
    }

    /// Publishes `message` for `tenant_id` on `topic`.
    ///
    /// With `high_traffic` set, the rate limiter is consulted first; a
    /// throttled event is published once to `{topic}:delayed` with
    /// `delayed: true` and `event_type: "{topic}:delayed"`, and is not also
    /// sent to the real topic on this call. Otherwise the body is the
    /// message with `tenantId` merged in, sent to `topic` directly.
    ///
    /// # Errors
    ///
    /// - counter-store outage on the high-traffic path (fail-closed, nothing
    ///   published)
    /// - broker acquire/send failure, surfaced after the lease is released
    ///   and the span closed; no internal retry
    pub async fn publish(
        &self,
        topic: &str,
        tenant_id: &str,
        message: Map<String, Value>,
        high_traffic: bool,
    ) -> Result<()> {
        let span = tracing::info_span!(
            "bus.publish",
            topic,
            tenant_id,
            high_traffic,
            delayed = tracing::field::Empty,
        );

        async {
            let envelope = EventEnvelope::direct(tenant_id, message);

            let (wire_topic, body) = if high_traffic {
                match self
                    .limiter
                    .admit(topic, self.rate_limit, self.rate_window)
                    .await?
                {
                    Decision::Admitted => (topic.to_string(), envelope),
                    Decision::Throttled { retry_after_secs } => {
                        warn!(
                            topic,
                            tenant_id,
                            retry_after_secs,
                            "Rate limit exhausted, diverting to holding topic"
                        );
                        (delayed_topic(topic), envelope.into_delayed(topic))
                    }
                }
            } else {
                (topic.to_string(), envelope)
            };

            tracing::Span::current().record("delayed", body.delayed);
            let bytes = body.to_bytes()?;

            let mut lease = self.broker.acquire().await?;
            let sent = lease.send(&wire_topic, bytes).await;
            let released = lease.release().await;

            // A send failure takes precedence; either way the lease is back.
            sent?;
            released?;

            debug!(topic = %wire_topic, tenant_id, "Event published");
            Ok(())
        }
        .instrument(span)
        .await
    }
}
