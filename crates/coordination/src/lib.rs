//! Coordination infrastructure for the order fulfillment core.
//!
//! Three independent leaves, each a trait with an in-memory implementation:
//! - [`ReconciliationCache`] — lossy key-value ledger of the last known
//!   payment status per order
//! - [`DistributedLock`] — cross-process per-order mutex with lease expiry
//! - [`DelayedMessageBus`] — delayed publish with at-least-once delivery

mod bus;
mod cache;
mod lock;

pub use bus::{BusError, DelayedMessageBus, InMemoryDelayedBus, MessageHandler};
pub use cache::{CacheError, InMemoryReconciliationCache, ReconciliationCache, ReconciliationRecord};
pub use lock::{DistributedLock, InMemoryDistributedLock, LockConfig, LockError};
