use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};

use super::store::{CounterStore, CounterStoreError};

#[derive(Debug, Clone, Copy)]
struct Slot {
    value: i64,
    expires_at: Instant,
}

impl Slot {
    fn live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Process-local counters. Used when no Redis is configured and in tests.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    slots: DashMap<String, Slot>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired keys.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.slots.retain(|_, slot| slot.live(now));
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64, CounterStoreError> {
        let now = Instant::now();
        let fresh = Slot {
            value: 1,
            expires_at: now + ttl,
        };
        let value = match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                if slot.live(now) {
                    slot.value += 1;
                } else {
                    *slot = fresh;
                }
                slot.value
            }
            Entry::Vacant(vacant) => vacant.insert(fresh).value,
        };
        Ok(value)
    }

    async fn set_nx(&self, key: &str, ttl: Duration) -> Result<bool, CounterStoreError> {
        let now = Instant::now();
        let fresh = Slot {
            value: 1,
            expires_at: now + ttl,
        };
        let set = match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().live(now) {
                    false
                } else {
                    occupied.insert(fresh);
                    true
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                true
            }
        };
        Ok(set)
    }

    async fn exists(&self, key: &str) -> Result<bool, CounterStoreError> {
        let now = Instant::now();
        Ok(self
            .slots
            .get(key)
            .map(|slot| slot.live(now))
            .unwrap_or(false))
    }

    async fn delete(&self, key: &str) -> Result<(), CounterStoreError> {
        self.slots.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn incr_counts_within_ttl_and_restarts_after_expiry() {
        let store = MemoryCounterStore::new();
        let ttl = Duration::from_millis(40);

        assert_eq!(store.incr("k", ttl).await.unwrap(), 1);
        assert_eq!(store.incr("k", ttl).await.unwrap(), 2);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.incr("k", ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn set_nx_only_sets_absent_or_expired_keys() {
        let store = MemoryCounterStore::new();
        let ttl = Duration::from_millis(40);

        assert!(store.set_nx("flag", ttl).await.unwrap());
        assert!(!store.set_nx("flag", ttl).await.unwrap());
        assert!(store.exists("flag").await.unwrap());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!store.exists("flag").await.unwrap());
        assert!(store.set_nx("flag", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn delete_and_purge() {
        let store = MemoryCounterStore::new();
        store.incr("a", Duration::from_secs(60)).await.unwrap();
        store.incr("b", Duration::from_millis(1)).await.unwrap();
        store.delete("a").await.unwrap();
        assert!(!store.exists("a").await.unwrap());

        tokio::time::sleep(Duration::from_millis(5)).await;
        store.purge_expired();
        assert!(store.slots.is_empty());
    }
}
