//! Conveyor - Durable event bus with tenant-scoped throttling.
//!
//! This crate provides the event-bus subsystem of Conveyor, responsible for:
//! - Publishing tenant-scoped events to a durable log broker
//! - Rate limiting high-traffic event types per fixed window
//! - Diverting throttled events to `{topic}:delayed` holding topics
//! - Redelivering held events to their original topics after a cooldown
//!
//! # Architecture
//!
//! Producers publish through [`publisher::Publisher`], which on high-traffic
//! paths consults a windowed counter before sending. Throttled events are not
//! dropped: they land on a per-topic holding topic, where the
//! [`buffer::RedeliveryBuffer`] daemon holds each one for a cooldown and then
//! republishes it to the real topic. Consumers attach callbacks through
//! [`subscriber::Subscriber`] and never see the detour.
//!
//! All components are wired through [`context::BusContext`], which owns the
//! pooled broker connection, the counter store, and the bus-wide shutdown
//! signal.

pub mod broker;
pub mod buffer;
pub mod config;
pub mod context;
pub mod counter;
pub mod error;
pub mod publisher;
pub mod rate_limit;
pub mod subscriber;
pub mod types;

pub use broker::{Broker, Delivery, MemoryBroker, ProducerLease, Subscription, TopicSelector};
pub use buffer::RedeliveryBuffer;
pub use config::Config;
pub use context::BusContext;
pub use counter::{CounterStore, MemoryCounterStore};
pub use error::{BusError, Result};
pub use publisher::Publisher;
pub use rate_limit::{Decision, RateLimiter};
pub use subscriber::Subscriber;
pub use types::{delayed_topic, original_topic, EventEnvelope, DELAYED_SUFFIX};
