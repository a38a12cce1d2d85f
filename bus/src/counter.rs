//! Counter-store seam and in-process implementation.
//!
//! The rate limiter keeps its sliding-window counts in a store shared across
//! every publisher instance for an event type. The [`CounterStore`] trait is
//! the narrow contract the bus relies on: `get`, an atomic `incr`, `expire`,
//! and [`CounterStore::incr_with_expiry`] as the increment-plus-expiry
//! primitive issued on admit.
//!
//! The increment itself must be atomic at the store; the increment+expiry
//! pair is best-effort back-to-back. A counter briefly existing without its
//! expiry is tolerable and self-heals on the next admit.
//!
//! [`MemoryCounterStore`] is the in-process implementation: a keyed map with
//! TTL entries, lazy expiry on access, and a periodic sweep so abandoned
//! keys do not accumulate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::Result;

/// Shared atomic counter store.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Reads the current count for `key`, `None` if the key does not exist
    /// (or has expired).
    async fn get(&self, key: &str) -> Result<Option<u64>>;

    /// Atomically increments `key`, creating it at 1 if absent. Returns the
    /// new count.
    async fn incr(&self, key: &str) -> Result<u64>;

    /// (Re)sets the TTL for `key`. A no-op if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Increment and expiry issued together.
    ///
    /// The default implementation sends the two commands back-to-back;
    /// stores with a multi-command primitive override this to make the pair
    /// atomic.
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64> {
        let count = self.incr(key).await?;
        self.expire(key, ttl).await?;
        Ok(count)
    }
}

/// One counter with its expiry deadline.
#[derive(Debug, Clone)]
struct CounterEntry {
    count: u64,
    expires_at: Option<Instant>,
}

impl CounterEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// In-process counter store with TTL bookkeeping.
///
/// Safe to share across tasks; clone the handle freely, all clones see the
/// same counters.
#[derive(Debug, Clone, Default)]
pub struct MemoryCounterStore {
    entries: Arc<Mutex<HashMap<String, CounterEntry>>>,
}

impl MemoryCounterStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every expired entry. Returns the number removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Number of live (unexpired) keys.
    pub async fn key_count(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    /// Spawns a background task sweeping expired entries every `interval`.
    ///
    /// The task runs until the returned handle is aborted.
    pub fn spawn_sweep_task(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;
                let removed = store.sweep_expired().await;
                if removed > 0 {
                    debug!(removed_count = removed, "Swept expired counters");
                }
            }
        })
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<u64>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.count)),
            None => Ok(None),
        }
    }

    async fn incr(&self, key: &str) -> Result<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        let entry = entries
            .entry(key.to_string())
            .and_modify(|entry| {
                if entry.is_expired(now) {
                    entry.count = 0;
                    entry.expires_at = None;
                }
                entry.count += 1;
            })
            .or_insert(CounterEntry {
                count: 1,
                expires_at: None,
            });

        Ok(entry.count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64> {
        // Single lock acquisition makes the pair atomic here, matching the
        // multi-command primitive of a networked store.
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        let entry = entries
            .entry(key.to_string())
            .and_modify(|entry| {
                if entry.is_expired(now) {
                    entry.count = 0;
                }
                entry.count += 1;
            })
            .or_insert(CounterEntry {
                count: 1,
                expires_at: None,
            });
        entry.expires_at = Some(now + ttl);

        Ok(entry.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_reads_as_none() {
        let store = MemoryCounterStore::new();
        assert_eq!(store.get("rate_limit:event:test").await.unwrap(), None);
    }

    #[tokio::test]
    async fn incr_creates_at_one_and_counts_up() {
        let store = MemoryCounterStore::new();
        assert_eq!(store.incr("k").await.unwrap(), 1);
        assert_eq!(store.incr("k").await.unwrap(), 2);
        assert_eq!(store.incr("k").await.unwrap(), 3);
        assert_eq!(store.get("k").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let store = MemoryCounterStore::new();
        store.incr("a").await.unwrap();
        store.incr("a").await.unwrap();
        store.incr("b").await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some(2));
        assert_eq!(store.get("b").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn expired_key_reads_as_none() {
        tokio::time::pause();
        let store = MemoryCounterStore::new();

        store
            .incr_with_expiry("k", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(1));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn incr_after_expiry_restarts_from_one() {
        tokio::time::pause();
        let store = MemoryCounterStore::new();

        for _ in 0..5 {
            store
                .incr_with_expiry("k", Duration::from_secs(10))
                .await
                .unwrap();
        }
        assert_eq!(store.get("k").await.unwrap(), Some(5));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(
            store
                .incr_with_expiry("k", Duration::from_secs(10))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn incr_with_expiry_resets_ttl_each_call() {
        tokio::time::pause();
        let store = MemoryCounterStore::new();

        store
            .incr_with_expiry("k", Duration::from_secs(10))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;
        store
            .incr_with_expiry("k", Duration::from_secs(10))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;

        // 16s after creation but only 8s after the last increment.
        assert_eq!(store.get("k").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn expire_on_missing_key_is_noop() {
        let store = MemoryCounterStore::new();
        store.expire("k", Duration::from_secs(1)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_entries() {
        tokio::time::pause();
        let store = MemoryCounterStore::new();

        store
            .incr_with_expiry("old", Duration::from_secs(5))
            .await
            .unwrap();
        store
            .incr_with_expiry("fresh", Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        let removed = store.sweep_expired().await;

        assert_eq!(removed, 1);
        assert_eq!(store.key_count().await, 1);
        assert_eq!(store.get("fresh").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn clones_share_state() {
        let store = MemoryCounterStore::new();
        let clone = store.clone();

        store.incr("k").await.unwrap();
        assert_eq!(clone.get("k").await.unwrap(), Some(1));
    }
}
