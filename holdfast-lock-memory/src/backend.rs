use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use holdfast_lock::{LockError, LockStrategy};

/// Internal entry representing a held lease.
#[derive(Debug, Clone)]
struct LeaseEntry {
    owner: String,
    expires_at: Instant,
}

impl LeaseEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-memory lease table shared by every [`MemoryLockStrategy`] handle.
///
/// Lease expiry is lazy: expired entries are evicted on the next acquire
/// attempt for the same lock name. Useful for tests and single-process
/// deployments; it provides no durability.
#[derive(Debug, Clone, Default)]
pub struct MemoryLockBackend {
    leases: Arc<DashMap<String, LeaseEntry>>,
}

impl MemoryLockBackend {
    /// Create a new, empty in-memory lease table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a strategy handle bound to the lock named `lock_name`.
    pub fn strategy(&self, lock_name: impl Into<String>) -> MemoryLockStrategy {
        MemoryLockStrategy {
            leases: Arc::clone(&self.leases),
            lock_name: lock_name.into(),
        }
    }

    /// Current holder of `lock_name`, if any non-expired lease exists.
    pub fn holder(&self, lock_name: &str) -> Option<String> {
        self.leases
            .get(lock_name)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.owner.clone())
    }
}

/// [`LockStrategy`] handle for a single named lock in a [`MemoryLockBackend`].
#[derive(Debug, Clone)]
pub struct MemoryLockStrategy {
    leases: Arc<DashMap<String, LeaseEntry>>,
    lock_name: String,
}

#[async_trait]
impl LockStrategy for MemoryLockStrategy {
    async fn acquire(&self, ttl: Duration, owner_id: &str) -> Result<(), LockError> {
        assert!(!owner_id.is_empty(), "owner_id must not be empty");

        // Evict a stale lease lazily before deciding.
        self.leases
            .remove_if(&self.lock_name, |_, entry| entry.is_expired());

        match self.leases.entry(self.lock_name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if occupied.get().owner == owner_id {
                    occupied.get_mut().expires_at = Instant::now() + ttl;
                    Ok(())
                } else {
                    Err(LockError::HeldByOther)
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(LeaseEntry {
                    owner: owner_id.to_owned(),
                    expires_at: Instant::now() + ttl,
                });
                Ok(())
            }
        }
    }

    async fn release(&self, owner_id: &str) -> Result<(), LockError> {
        // Only remove if we are still the owner; anything else is a no-op.
        self.leases
            .remove_if(&self.lock_name, |_, entry| entry.owner == owner_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use holdfast_lock::testing::run_strategy_conformance_tests;

    #[tokio::test]
    async fn conformance() {
        let backend = MemoryLockBackend::new();
        let strategy = backend.strategy("conformance-lock");
        run_strategy_conformance_tests(&strategy)
            .await
            .expect("strategy conformance tests should pass");
    }

    #[tokio::test(start_paused = true)]
    async fn lease_expires_after_ttl() {
        let backend = MemoryLockBackend::new();
        let strategy = backend.strategy("expire-lock");

        strategy
            .acquire(Duration::from_secs(2), "owner-1")
            .await
            .expect("should acquire");
        assert_eq!(backend.holder("expire-lock").as_deref(), Some("owner-1"));

        // Advance past TTL; the lease is gone and another owner may take it.
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(backend.holder("expire-lock"), None);

        strategy
            .acquire(Duration::from_secs(2), "owner-2")
            .await
            .expect("should acquire after expiry");
        assert_eq!(backend.holder("expire-lock").as_deref(), Some("owner-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn renewal_extends_the_lease() {
        let backend = MemoryLockBackend::new();
        let strategy = backend.strategy("renew-lock");

        strategy
            .acquire(Duration::from_secs(2), "owner-1")
            .await
            .expect("should acquire");

        // Renew just before expiry; the lease must survive the original TTL.
        tokio::time::advance(Duration::from_millis(1_500)).await;
        strategy
            .acquire(Duration::from_secs(2), "owner-1")
            .await
            .expect("renewal should succeed");

        tokio::time::advance(Duration::from_millis(1_000)).await;
        assert_eq!(backend.holder("renew-lock").as_deref(), Some("owner-1"));
    }

    #[tokio::test]
    async fn locks_are_independent_per_name() {
        let backend = MemoryLockBackend::new();
        let first = backend.strategy("lock-a");
        let second = backend.strategy("lock-b");

        first
            .acquire(Duration::from_secs(10), "owner-1")
            .await
            .expect("should acquire lock-a");
        second
            .acquire(Duration::from_secs(10), "owner-2")
            .await
            .expect("lock-b should be free");

        assert_eq!(backend.holder("lock-a").as_deref(), Some("owner-1"));
        assert_eq!(backend.holder("lock-b").as_deref(), Some("owner-2"));
    }

    #[tokio::test]
    #[should_panic(expected = "owner_id must not be empty")]
    async fn empty_owner_is_rejected() {
        let backend = MemoryLockBackend::new();
        let strategy = backend.strategy("bad-owner");
        let _ = strategy.acquire(Duration::from_secs(1), "").await;
    }
}
