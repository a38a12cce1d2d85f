//! Event envelope and topic naming conventions.
//!
//! This module defines the unit of transport on the bus and the `{topic}` /
//! `{topic}:delayed` pairing used to park throttled events. The payload is an
//! open JSON object: the bus never validates its shape, only carries it.
//!
//! # Wire format
//!
//! Messages are UTF-8 JSON objects. On the direct path the body is the
//! caller's message with `tenantId` merged in. On the delayed path the body
//! additionally carries `delayed: true` and an `event_type` field equal to
//! `{topic}:delayed`, from which the redelivery buffer recovers the original
//! topic.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{BusError, Result};

/// Suffix that marks a holding topic for throttled events.
pub const DELAYED_SUFFIX: &str = ":delayed";

/// Returns the holding topic paired with `topic`.
///
/// # Example
///
/// ```rust
/// use conveyor_bus::types::delayed_topic;
///
/// assert_eq!(delayed_topic("event:test"), "event:test:delayed");
/// ```
#[must_use]
pub fn delayed_topic(topic: &str) -> String {
    format!("{topic}{DELAYED_SUFFIX}")
}

/// Recovers the original topic from a holding topic name.
///
/// Returns `None` if `topic` does not end in `:delayed`.
///
/// # Example
///
/// ```rust
/// use conveyor_bus::types::original_topic;
///
/// assert_eq!(original_topic("event:test:delayed"), Some("event:test"));
/// assert_eq!(original_topic("event:test"), None);
/// ```
#[must_use]
pub fn original_topic(topic: &str) -> Option<&str> {
    topic.strip_suffix(DELAYED_SUFFIX)
}

/// The unit of transport on the bus.
///
/// `tenant_id` identifies the owning tenant and travels in every published
/// body so downstream consumers can enforce isolation; topics are shared
/// across tenants. `payload` is flattened into the body, so the serialized
/// form is the caller's message with the bus fields merged in.
///
/// `event_type` and `delayed` are only present on the delayed path; a
/// direct-publish body carries neither.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Owning tenant, merged into every published body.
    #[serde(rename = "tenantId")]
    pub tenant_id: String,

    /// Holding-topic tag (`{topic}:delayed`); absent on the direct path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,

    /// Set only when the event was diverted into a holding topic.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub delayed: bool,

    /// Caller-supplied message fields, carried as-is.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl EventEnvelope {
    /// Creates the direct-publish form: tenant merged in, no bus decoration.
    #[must_use]
    pub fn direct(tenant_id: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            event_type: None,
            delayed: false,
            payload,
        }
    }

    /// Converts into the holding-topic form for `topic`.
    ///
    /// The result carries `delayed: true` and `event_type` set to
    /// `{topic}:delayed`, satisfying the holding-topic invariant.
    #[must_use]
    pub fn into_delayed(mut self, topic: &str) -> Self {
        self.event_type = Some(delayed_topic(topic));
        self.delayed = true;
        self
    }

    /// Strips the holding-topic decoration for republish.
    ///
    /// The result has the same shape a direct publish would have produced.
    #[must_use]
    pub fn into_redelivered(mut self) -> Self {
        self.event_type = None;
        self.delayed = false;
        self
    }

    /// True when the caller-supplied payload carries no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Serializes to the UTF-8 JSON wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(BusError::from)
    }

    /// Parses the UTF-8 JSON wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(BusError::from)
    }
}
