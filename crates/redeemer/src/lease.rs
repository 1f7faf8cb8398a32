/// Advisory TTL leases backing the three lock schemes: a pending
/// redemption, a pending refund, and the reservation-token mapping.
/// Absence is the default state; everything here self-heals by expiry,
/// so a crash between acquiring a lease and finishing the protocol
/// never needs explicit cleanup.
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

pub fn redemption_pending_key(commitment: &str) -> String {
    format!("redeem:{}", commitment)
}

pub fn refund_pending_key(commitment: &str) -> String {
    format!("refund:{}", commitment)
}

pub fn reservation_key(token: &str) -> String {
    format!("resv:{}", token)
}

pub fn rate_window_key(partner: &str, window: &str) -> String {
    format!("rate:{}:{}", window, partner)
}

/// The cache-client capability injected into every protocol component.
/// Implementations only promise TTL-bound visibility, not mutual
/// exclusion enforced by the store; callers honor the leases.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Set the key if absent. Returns false when the lease is already
    /// held (the caller lost the race).
    async fn try_acquire(&self, key: &str, ttl: Duration) -> bool;

    /// Explicitly drop a lease before its TTL.
    async fn release(&self, key: &str);

    async fn held(&self, key: &str) -> bool;

    /// Store a value under the key (used for token → commitment).
    async fn put(&self, key: &str, value: &str, ttl: Duration);

    /// Read and delete in one step; a mapping can only ever be
    /// resolved once.
    async fn resolve_and_consume(&self, key: &str) -> Option<String>;

    /// Current value of a TTL counter (0 when expired or absent).
    async fn counter_peek(&self, key: &str) -> u64;

    /// Checked add on a TTL counter, starting the window on first hit.
    /// The check and the add happen under one lock, so concurrent
    /// callers cannot jointly exceed `limit`. Returns false and leaves
    /// the counter untouched when the add would exceed it.
    async fn counter_try_add(&self, key: &str, amount: u64, limit: u64, ttl: Duration) -> bool;

    /// Hand capacity back after a failed operation. The window
    /// deadline is unchanged.
    async fn counter_sub(&self, key: &str, amount: u64);
}

enum Entry {
    Lease,
    Value(String),
    Counter(u64),
}

struct Slot {
    entry: Entry,
    expires_at: Instant,
}

impl Slot {
    fn live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// In-process lease store. Expired slots are treated as absent and
/// purged lazily on write access.
#[derive(Default)]
pub struct MemoryLeaseStore {
    slots: RwLock<HashMap<String, Slot>>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn purge_expired(&self) {
        let mut slots = self.slots.write().await;
        let now = Instant::now();
        slots.retain(|_, slot| now < slot.expires_at);
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> bool {
        self.purge_expired().await;
        let mut slots = self.slots.write().await;
        if slots.get(key).map(Slot::live).unwrap_or(false) {
            return false;
        }
        slots.insert(
            key.to_string(),
            Slot {
                entry: Entry::Lease,
                expires_at: Instant::now() + ttl,
            },
        );
        true
    }

    async fn release(&self, key: &str) {
        self.slots.write().await.remove(key);
    }

    async fn held(&self, key: &str) -> bool {
        self.slots
            .read()
            .await
            .get(key)
            .map(Slot::live)
            .unwrap_or(false)
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) {
        self.purge_expired().await;
        self.slots.write().await.insert(
            key.to_string(),
            Slot {
                entry: Entry::Value(value.to_string()),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    async fn resolve_and_consume(&self, key: &str) -> Option<String> {
        let mut slots = self.slots.write().await;
        let slot = slots.remove(key)?;
        if !slot.live() {
            return None;
        }
        match slot.entry {
            Entry::Value(v) => Some(v),
            _ => None,
        }
    }

    async fn counter_peek(&self, key: &str) -> u64 {
        match self.slots.read().await.get(key) {
            Some(slot) if slot.live() => match slot.entry {
                Entry::Counter(n) => n,
                _ => 0,
            },
            _ => 0,
        }
    }

    async fn counter_try_add(&self, key: &str, amount: u64, limit: u64, ttl: Duration) -> bool {
        self.purge_expired().await;
        let mut slots = self.slots.write().await;
        match slots.get_mut(key) {
            Some(slot) if slot.live() => {
                // Window keeps its original deadline
                if let Entry::Counter(n) = &mut slot.entry {
                    if n.saturating_add(amount) > limit {
                        return false;
                    }
                    *n += amount;
                    return true;
                }
                // Key collision with a non-counter entry; start over
                if amount > limit {
                    return false;
                }
                slot.entry = Entry::Counter(amount);
                slot.expires_at = Instant::now() + ttl;
                true
            }
            _ => {
                if amount > limit {
                    return false;
                }
                slots.insert(
                    key.to_string(),
                    Slot {
                        entry: Entry::Counter(amount),
                        expires_at: Instant::now() + ttl,
                    },
                );
                true
            }
        }
    }

    async fn counter_sub(&self, key: &str, amount: u64) {
        let mut slots = self.slots.write().await;
        if let Some(slot) = slots.get_mut(key) {
            if let Entry::Counter(n) = &mut slot.entry {
                *n = n.saturating_sub(amount);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_is_exclusive_until_release() {
        let store = MemoryLeaseStore::new();
        let ttl = Duration::from_secs(60);

        assert!(store.try_acquire("redeem:abc", ttl).await);
        assert!(!store.try_acquire("redeem:abc", ttl).await);
        assert!(store.held("redeem:abc").await);

        store.release("redeem:abc").await;
        assert!(!store.held("redeem:abc").await);
        assert!(store.try_acquire("redeem:abc", ttl).await);
    }

    #[tokio::test]
    async fn test_lease_expires() {
        let store = MemoryLeaseStore::new();
        assert!(store.try_acquire("k", Duration::from_millis(30)).await);
        assert!(store.held("k").await);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!store.held("k").await);
        assert!(store.try_acquire("k", Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_resolve_and_consume_is_single_use() {
        let store = MemoryLeaseStore::new();
        store
            .put("resv:tok", "commitment-hex", Duration::from_secs(60))
            .await;

        assert_eq!(
            store.resolve_and_consume("resv:tok").await.as_deref(),
            Some("commitment-hex")
        );
        assert_eq!(store.resolve_and_consume("resv:tok").await, None);
    }

    #[tokio::test]
    async fn test_expired_mapping_does_not_resolve() {
        let store = MemoryLeaseStore::new();
        store.put("resv:tok", "c", Duration::from_millis(20)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.resolve_and_consume("resv:tok").await, None);
    }

    #[tokio::test]
    async fn test_counter_window() {
        let store = MemoryLeaseStore::new();
        let ttl = Duration::from_millis(50);

        assert_eq!(store.counter_peek("rate:h:p1").await, 0);
        assert!(store.counter_try_add("rate:h:p1", 3, 10, ttl).await);
        assert!(store.counter_try_add("rate:h:p1", 2, 10, ttl).await);
        assert_eq!(store.counter_peek("rate:h:p1").await, 5);

        // Window resets after expiry
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(store.counter_peek("rate:h:p1").await, 0);
        assert!(store.counter_try_add("rate:h:p1", 1, 10, ttl).await);
    }

    #[tokio::test]
    async fn test_counter_try_add_enforces_limit() {
        let store = MemoryLeaseStore::new();
        let ttl = Duration::from_secs(60);

        assert!(store.counter_try_add("rate:h:p1", 8, 10, ttl).await);
        assert!(!store.counter_try_add("rate:h:p1", 3, 10, ttl).await);
        // A rejected add leaves the counter untouched
        assert_eq!(store.counter_peek("rate:h:p1").await, 8);
        assert!(store.counter_try_add("rate:h:p1", 2, 10, ttl).await);

        store.counter_sub("rate:h:p1", 2).await;
        assert_eq!(store.counter_peek("rate:h:p1").await, 8);
        assert!(store.counter_try_add("rate:h:p1", 2, 10, ttl).await);
    }

    #[tokio::test]
    async fn test_concurrent_try_adds_respect_limit() {
        let store = std::sync::Arc::new(MemoryLeaseStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .counter_try_add("rate:h:p1", 3, 10, Duration::from_secs(60))
                    .await
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 3);
        assert_eq!(store.counter_peek("rate:h:p1").await, 9);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_has_one_winner() {
        let store = std::sync::Arc::new(MemoryLeaseStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.try_acquire("redeem:same", Duration::from_secs(60)).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
