//! Wiring for a complete bus instance.
//!
//! [`BusContext`] owns the broker, the counter store, the configuration, and
//! the bus-wide shutdown signal, and hands out the components built on top of
//! them. Every component created through the context observes the same
//! shutdown channel, so one [`BusContext::shutdown`] call winds the whole
//! subsystem down.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::broker::{Broker, MemoryBroker};
use crate::buffer::RedeliveryBuffer;
use crate::config::Config;
use crate::counter::{CounterStore, MemoryCounterStore};
use crate::publisher::Publisher;
use crate::rate_limit::RateLimiter;
use crate::subscriber::Subscriber;

/// Shared backbone for publishers, subscribers, and the redelivery buffer.
pub struct BusContext {
    broker: Arc<dyn Broker>,
    counters: Arc<dyn CounterStore>,
    config: Config,
    shutdown_tx: watch::Sender<bool>,
    sweep_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl BusContext {
    /// Builds a context over externally supplied stores.
    pub fn new(
        broker: Arc<dyn Broker>,
        counters: Arc<dyn CounterStore>,
        config: Config,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            broker,
            counters,
            config,
            shutdown_tx,
            sweep_handle: std::sync::Mutex::new(None),
        }
    }

    /// Builds a fully in-memory bus: [`MemoryBroker`], [`MemoryCounterStore`],
    /// and a background sweep task pruning expired counter windows.
    pub fn in_memory(config: Config) -> Self {
        let counters = MemoryCounterStore::new();
        let sweep = counters.spawn_sweep_task(config.counter_sweep_interval);
        let context = Self::new(
            Arc::new(MemoryBroker::with_capacity(config.channel_capacity)),
            Arc::new(counters),
            config,
        );
        if let Ok(mut handle) = context.sweep_handle.lock() {
            *handle = Some(sweep);
        }
        context
    }

    /// The broker backing this bus.
    pub fn broker(&self) -> Arc<dyn Broker> {
        Arc::clone(&self.broker)
    }

    /// The counter store backing rate limiting.
    pub fn counters(&self) -> Arc<dyn CounterStore> {
        Arc::clone(&self.counters)
    }

    /// The effective configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A receiver for the bus-wide shutdown signal.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Creates a publisher sharing this context's broker and limiter state.
    pub fn publisher(&self) -> Publisher {
        let limiter = RateLimiter::new(Arc::clone(&self.counters));
        Publisher::new(Arc::clone(&self.broker), limiter, &self.config)
    }

    /// Creates a subscriber bound to this context's shutdown signal.
    pub fn subscriber(&self) -> Subscriber {
        Subscriber::new(Arc::clone(&self.broker), self.shutdown_signal())
    }

    /// Creates the redelivery buffer for the `*:delayed` holding topics.
    pub fn redelivery_buffer(&self) -> RedeliveryBuffer {
        RedeliveryBuffer::new(
            Arc::clone(&self.broker),
            self.config.redelivery_cooldown,
            self.shutdown_signal(),
        )
    }

    /// Signals shutdown to every component created through this context and
    /// stops the counter sweep task.
    pub fn shutdown(&self) {
        info!("Bus shutting down");
        // Receivers may all be gone already; nothing to signal then.
        let _ = self.shutdown_tx.send(true);
        if let Ok(mut handle) = self.sweep_handle.lock() {
            if let Some(handle) = handle.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for BusContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
