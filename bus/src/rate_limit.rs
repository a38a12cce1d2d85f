//! Tenant/topic-scoped sliding-window rate limiting.
//!
//! The limiter decides admit-or-throttle for each high-traffic publish
//! attempt. Counts live in the shared [`CounterStore`] under
//! `rate_limit:{event_type}`, so every publisher instance for an event type
//! shares one window.
//!
//! # Algorithm
//!
//! A single read followed by a single conditional increment, non-blocking
//! and without internal retries:
//!
//! - read the current count (a missing key counts as zero)
//! - at or above the limit: throttle, without mutating the counter
//! - below the limit: atomically increment and (re)set the window expiry
//!
//! # Failure policy
//!
//! A counter-store outage is surfaced as
//! [`BusError::CounterUnavailable`](crate::error::BusError::CounterUnavailable),
//! never a silent admit or reject. The publisher treats it as fail-closed
//! and propagates the error without publishing.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::counter::CounterStore;
use crate::error::Result;

/// Key prefix for rate-limit counters in the shared store.
pub const RATE_LIMIT_KEY_PREFIX: &str = "rate_limit:";

/// Result of an admit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The event is admitted; the window counter was incremented.
    Admitted,

    /// The window is exhausted; the event should be diverted.
    Throttled {
        /// Upper bound on seconds until the window resets. Useful for
        /// `Retry-After`-style hints at the edges.
        retry_after_secs: u64,
    },
}

impl Decision {
    /// Returns `true` if the event was admitted.
    #[inline]
    #[must_use]
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }

    /// Returns `true` if the event was throttled.
    #[inline]
    #[must_use]
    pub fn is_throttled(&self) -> bool {
        matches!(self, Self::Throttled { .. })
    }

    /// The retry-after hint if throttled, or `None` if admitted.
    #[inline]
    #[must_use]
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::Admitted => None,
            Self::Throttled { retry_after_secs } => Some(*retry_after_secs),
        }
    }
}

/// Sliding-window limiter over a shared counter store.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
}

impl RateLimiter {
    /// Creates a limiter over `store`.
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// Checks whether one event of `event_type` fits in the current window.
    ///
    /// `limit` is the number of events admitted per `window`. On admit the
    /// counter is incremented and its expiry reset to the window length; on
    /// throttle the counter is left untouched, so the count parks at the
    /// limit instead of creeping past it.
    ///
    /// # Errors
    ///
    /// Propagates counter-store failures; callers choose fail-open or
    /// fail-closed.
    pub async fn admit(
        &self,
        event_type: &str,
        limit: u64,
        window: Duration,
    ) -> Result<Decision> {
        let key = format!("{RATE_LIMIT_KEY_PREFIX}{event_type}");

        let count = self.store.get(&key).await?.unwrap_or(0);
        if count >= limit {
            debug!(event_type, count, limit, "Rate limit exhausted, throttling");
            return Ok(Decision::Throttled {
                retry_after_secs: window.as_secs().max(1),
            });
        }

        let count = self.store.incr_with_expiry(&key, window).await?;
        trace!(event_type, count, limit, "Event admitted");
        Ok(Decision::Admitted)
    }
}
