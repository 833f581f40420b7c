//! Reconciliation ledger cache.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::OrderId;
use domain::PaymentStatus;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when interacting with the reconciliation cache.
///
/// A missing key is not an error; callers fall back to the order store.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The stored value could not be encoded or decoded.
    #[error("cache codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The cache backend is unavailable.
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// The last known payment status of an order plus its payment deadline.
///
/// A single fixed shape, serialized as JSON in the cache value; there is
/// deliberately no dynamically typed variant of this record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationRecord {
    /// Last payment status the saga computed.
    pub payment_status: PaymentStatus,
    /// When the payment window for this order closes.
    pub expires_at: DateTime<Utc>,
}

impl ReconciliationRecord {
    /// A fresh record for a just-placed order.
    pub fn pending(expires_at: DateTime<Utc>) -> Self {
        Self {
            payment_status: PaymentStatus::Pending,
            expires_at,
        }
    }

    /// The same deadline with a new payment status.
    pub fn with_status(self, payment_status: PaymentStatus) -> Self {
        Self {
            payment_status,
            ..self
        }
    }
}

/// Ephemeral ledger mapping an order id to its reconciliation record.
///
/// Pure cache semantics: entries are overwritten, never transactional with
/// the store, and acceptable to lose — the order store is authoritative on a
/// miss.
#[async_trait]
pub trait ReconciliationCache: Send + Sync {
    /// Writes or overwrites the record for an order.
    async fn set(&self, order_id: OrderId, record: ReconciliationRecord) -> Result<(), CacheError>;

    /// Reads the record for an order; a miss is `Ok(None)`.
    async fn get(&self, order_id: OrderId) -> Result<Option<ReconciliationRecord>, CacheError>;

    /// Drops the record for an order. Deleting a missing key is a no-op.
    async fn delete(&self, order_id: OrderId) -> Result<(), CacheError>;
}

/// In-memory reconciliation cache.
///
/// Values round-trip through the JSON codec the same way a networked
/// key-value backend would, so codec failures surface in tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReconciliationCache {
    entries: Arc<RwLock<HashMap<OrderId, Vec<u8>>>>,
}

impl InMemoryReconciliationCache {
    /// Creates a new empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of cached records.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Returns true if the cache holds no records.
    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }

    /// Drops every record, simulating a cache wipe.
    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }
}

#[async_trait]
impl ReconciliationCache for InMemoryReconciliationCache {
    async fn set(&self, order_id: OrderId, record: ReconciliationRecord) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(&record)?;
        self.entries.write().unwrap().insert(order_id, bytes);
        Ok(())
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<ReconciliationRecord>, CacheError> {
        let bytes = self.entries.read().unwrap().get(&order_id).cloned();
        match bytes {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, order_id: OrderId) -> Result<(), CacheError> {
        self.entries.write().unwrap().remove(&order_id);
        Ok(())
    }
}
