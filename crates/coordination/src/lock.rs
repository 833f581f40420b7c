//! Cross-process per-order mutex.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::OrderId;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Errors that can occur acquiring or releasing a lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// The retry budget ran out while another holder kept the lock.
    #[error("could not acquire lock for order {0} within the retry budget")]
    AcquireTimeout(OrderId),

    /// This process does not hold the lock it is trying to release.
    #[error("lock for order {0} is not held by this process")]
    NotHeld(OrderId),

    /// The lease expired and was taken over before release.
    #[error("lease for order {0} expired before release")]
    LeaseExpired(OrderId),
}

/// Lease and retry tuning for lock acquisition.
#[derive(Debug, Clone, Copy)]
pub struct LockConfig {
    /// How long a holder may keep the lock before it can be stolen.
    pub lease: Duration,
    /// Pause between acquisition attempts.
    pub retry_interval: Duration,
    /// Number of acquisition attempts before giving up.
    pub retry_budget: u32,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(8),
            retry_interval: Duration::from_millis(50),
            retry_budget: 32,
        }
    }
}

/// A named mutex per order id, shared across all process instances.
///
/// Acquisition blocks up to a bounded retry budget, then fails rather than
/// blocking forever. Leases expire so a crashed holder cannot permanently
/// block an order.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Acquires the lock for an order, waiting within the retry budget.
    async fn lock(&self, order_id: OrderId) -> Result<(), LockError>;

    /// Releases the lock for an order.
    ///
    /// Releasing a lock this process never acquired, or already released,
    /// is a reported error so calling-code bugs surface in tests.
    async fn unlock(&self, order_id: OrderId) -> Result<(), LockError>;
}

#[derive(Debug, Clone, Copy)]
struct Lease {
    token: Uuid,
    expires_at: Instant,
}

/// In-memory distributed lock.
///
/// The lease table is shared between the primary instance and any
/// [`replica`](InMemoryDistributedLock::replica) handles, modeling multiple
/// worker processes contending on the same backend; the held-token map is
/// per instance, so a replica can never release a lease it did not acquire.
#[derive(Debug, Clone)]
pub struct InMemoryDistributedLock {
    leases: Arc<Mutex<HashMap<OrderId, Lease>>>,
    held: Arc<std::sync::Mutex<HashMap<OrderId, Uuid>>>,
    config: LockConfig,
}

impl InMemoryDistributedLock {
    /// Creates a lock backend with the given tuning.
    pub fn new(config: LockConfig) -> Self {
        Self {
            leases: Arc::new(Mutex::new(HashMap::new())),
            held: Arc::new(std::sync::Mutex::new(HashMap::new())),
            config,
        }
    }

    /// A handle for a second "process" against the same lease table.
    pub fn replica(&self) -> Self {
        Self {
            leases: self.leases.clone(),
            held: Arc::new(std::sync::Mutex::new(HashMap::new())),
            config: self.config,
        }
    }
}

impl Default for InMemoryDistributedLock {
    fn default() -> Self {
        Self::new(LockConfig::default())
    }
}

#[async_trait]
impl DistributedLock for InMemoryDistributedLock {
    async fn lock(&self, order_id: OrderId) -> Result<(), LockError> {
        for attempt in 0..self.config.retry_budget {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_interval).await;
            }

            let mut leases = self.leases.lock().await;
            let now = Instant::now();
            let taken = matches!(leases.get(&order_id), Some(l) if l.expires_at > now);
            if taken {
                continue;
            }

            let token = Uuid::new_v4();
            leases.insert(
                order_id,
                Lease {
                    token,
                    expires_at: now + self.config.lease,
                },
            );
            self.held.lock().unwrap().insert(order_id, token);
            return Ok(());
        }

        Err(LockError::AcquireTimeout(order_id))
    }

    async fn unlock(&self, order_id: OrderId) -> Result<(), LockError> {
        let token = self
            .held
            .lock()
            .unwrap()
            .remove(&order_id)
            .ok_or(LockError::NotHeld(order_id))?;

        let mut leases = self.leases.lock().await;
        match leases.get(&order_id) {
            Some(lease) if lease.token == token => {
                leases.remove(&order_id);
                Ok(())
            }
            // The lease timed out and may already belong to someone else.
            _ => Err(LockError::LeaseExpired(order_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> LockConfig {
        LockConfig {
            lease: Duration::from_millis(200),
            retry_interval: Duration::from_millis(5),
            retry_budget: 4,
        }
    }

    #[tokio::test]
    async fn lock_and_unlock() {
        let lock = InMemoryDistributedLock::new(fast_config());
        let id = OrderId::from_raw(1);

        lock.lock(id).await.unwrap();
        lock.unlock(id).await.unwrap();
        // Re-acquirable after release.
        lock.lock(id).await.unwrap();
        lock.unlock(id).await.unwrap();
    }

    #[tokio::test]
    async fn unlock_without_lock_is_an_error() {
        let lock = InMemoryDistributedLock::new(fast_config());
        let result = lock.unlock(OrderId::from_raw(1)).await;
        assert!(matches!(result, Err(LockError::NotHeld(_))));
    }

    #[tokio::test]
    async fn double_unlock_is_an_error() {
        let lock = InMemoryDistributedLock::new(fast_config());
        let id = OrderId::from_raw(1);

        lock.lock(id).await.unwrap();
        lock.unlock(id).await.unwrap();
        assert!(matches!(lock.unlock(id).await, Err(LockError::NotHeld(_))));
    }

    #[tokio::test]
    async fn replica_is_blocked_while_held() {
        let lock = InMemoryDistributedLock::new(fast_config());
        let replica = lock.replica();
        let id = OrderId::from_raw(1);

        lock.lock(id).await.unwrap();
        let result = replica.lock(id).await;
        assert!(matches!(result, Err(LockError::AcquireTimeout(_))));

        lock.unlock(id).await.unwrap();
        replica.lock(id).await.unwrap();
        replica.unlock(id).await.unwrap();
    }

    #[tokio::test]
    async fn replica_cannot_release_anothers_lease() {
        let lock = InMemoryDistributedLock::new(fast_config());
        let replica = lock.replica();
        let id = OrderId::from_raw(1);

        lock.lock(id).await.unwrap();
        assert!(matches!(
            replica.unlock(id).await,
            Err(LockError::NotHeld(_))
        ));
        lock.unlock(id).await.unwrap();
    }

    #[tokio::test]
    async fn expired_lease_can_be_stolen() {
        let config = LockConfig {
            lease: Duration::from_millis(20),
            retry_interval: Duration::from_millis(10),
            retry_budget: 8,
        };
        let lock = InMemoryDistributedLock::new(config);
        let replica = lock.replica();
        let id = OrderId::from_raw(1);

        lock.lock(id).await.unwrap();
        // The crashed-holder case: nobody releases, the lease runs out.
        replica.lock(id).await.unwrap();

        // The original holder's release now reports the takeover.
        assert!(matches!(
            lock.unlock(id).await,
            Err(LockError::LeaseExpired(_))
        ));
        replica.unlock(id).await.unwrap();
    }

    #[tokio::test]
    async fn contended_lock_succeeds_after_release() {
        let lock = InMemoryDistributedLock::new(LockConfig {
            lease: Duration::from_secs(5),
            retry_interval: Duration::from_millis(10),
            retry_budget: 50,
        });
        let replica = lock.replica();
        let id = OrderId::from_raw(1);

        lock.lock(id).await.unwrap();

        let contender = tokio::spawn(async move {
            replica.lock(id).await.unwrap();
            replica.unlock(id).await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        lock.unlock(id).await.unwrap();

        contender.await.unwrap();
    }
}
