//! Error types for the Conveyor bus.
//!
//! Transient transport failures (broker or counter store unreachable) are
//! surfaced to the immediate caller without retry; retry and backoff policy
//! belongs to the edges. Malformed or empty messages are never errors at this
//! level: the subscriber and the redelivery buffer treat them as soft skips.

use thiserror::Error;

use crate::config::ConfigError;

/// Top-level error type for bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    /// Broker transport failure (acquire, send, or subscribe).
    #[error("broker error: {0}")]
    Broker(String),

    /// The shared counter store is unreachable.
    ///
    /// Surfaced as its own variant so callers can apply an explicit
    /// fail-open or fail-closed policy instead of a silent admit. The
    /// publisher fails closed: nothing is published while the store is down.
    #[error("counter store unavailable: {0}")]
    CounterUnavailable(String),

    /// Failed to encode or decode a wire body.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The underlying subscription ended (broker dropped or shut down).
    #[error("subscription closed for {0}")]
    SubscriptionClosed(String),
}

impl BusError {
    /// Creates a new broker transport error.
    pub fn broker(message: impl Into<String>) -> Self {
        Self::Broker(message.into())
    }

    /// Creates a new counter-store unavailability error.
    pub fn counter_unavailable(message: impl Into<String>) -> Self {
        Self::CounterUnavailable(message.into())
    }

    /// True when the failure is a transient transport condition that an
    /// edge caller may retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Broker(_) | Self::CounterUnavailable(_))
    }
}

/// A specialized Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
