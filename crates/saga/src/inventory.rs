//! Inventory service client.
//!
//! The real deployment talks to a separate stock service. The in-memory
//! client below mirrors that service's semantics closely enough for the
//! saga tests: reservations are tracked per order, release is idempotent,
//! and individual operations can be made to fail on demand.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::OrderId;
use domain::{SkuId, SkuQuantity};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("insufficient stock for sku {sku_id}")]
    InsufficientStock { sku_id: SkuId },

    #[error("inventory service unavailable: {0}")]
    Unavailable(String),
}

/// Stock operations the saga drives.
#[async_trait]
pub trait InventoryClient: Send + Sync {
    /// Place a hold on stock for the order. Fails atomically: either every
    /// line is held or none are.
    async fn reserve(&self, order_id: OrderId, items: &[SkuQuantity]) -> Result<(), InventoryError>;

    /// Return held stock to the pool. Releasing an order with no live
    /// reservation is a no-op, which is what makes retries safe.
    async fn release(&self, order_id: OrderId, items: &[SkuQuantity]) -> Result<(), InventoryError>;

    /// Convert the hold into a permanent deduction after payment.
    async fn confirm(&self, order_id: OrderId, items: &[SkuQuantity]) -> Result<(), InventoryError>;
}

#[derive(Debug, Default)]
struct State {
    /// Available stock per sku. A sku absent from this map is treated as
    /// unlimited, so tests only seed the skus they care about.
    stock: HashMap<SkuId, u32>,
    reserved: HashMap<OrderId, Vec<SkuQuantity>>,
    confirmed: HashMap<OrderId, Vec<SkuQuantity>>,
    reserve_calls: u64,
    release_calls: u64,
    confirm_calls: u64,
    fail_on_reserve: bool,
    fail_on_release: bool,
    fail_on_confirm: bool,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryClient {
    state: Arc<RwLock<State>>,
}

impl InMemoryInventoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stock(&self, sku_id: SkuId, count: u32) {
        self.state.write().unwrap().stock.insert(sku_id, count);
    }

    pub fn available(&self, sku_id: SkuId) -> Option<u32> {
        self.state.read().unwrap().stock.get(&sku_id).copied()
    }

    pub fn reservation_count(&self) -> usize {
        self.state.read().unwrap().reserved.len()
    }

    pub fn confirmed_items(&self, order_id: OrderId) -> Option<Vec<SkuQuantity>> {
        self.state.read().unwrap().confirmed.get(&order_id).cloned()
    }

    pub fn reserve_calls(&self) -> u64 {
        self.state.read().unwrap().reserve_calls
    }

    pub fn release_calls(&self) -> u64 {
        self.state.read().unwrap().release_calls
    }

    pub fn confirm_calls(&self) -> u64 {
        self.state.read().unwrap().confirm_calls
    }

    pub fn set_fail_on_reserve(&self, fail: bool) {
        self.state.write().unwrap().fail_on_reserve = fail;
    }

    pub fn set_fail_on_release(&self, fail: bool) {
        self.state.write().unwrap().fail_on_release = fail;
    }

    pub fn set_fail_on_confirm(&self, fail: bool) {
        self.state.write().unwrap().fail_on_confirm = fail;
    }
}

#[async_trait]
impl InventoryClient for InMemoryInventoryClient {
    async fn reserve(&self, order_id: OrderId, items: &[SkuQuantity]) -> Result<(), InventoryError> {
        let mut state = self.state.write().unwrap();
        state.reserve_calls += 1;
        if state.fail_on_reserve {
            return Err(InventoryError::Unavailable("simulated reserve failure".into()));
        }
        for item in items {
            if let Some(available) = state.stock.get(&item.sku_id) {
                if *available < item.count {
                    return Err(InventoryError::InsufficientStock { sku_id: item.sku_id });
                }
            }
        }
        for item in items {
            if let Some(available) = state.stock.get_mut(&item.sku_id) {
                *available -= item.count;
            }
        }
        state.reserved.insert(order_id, items.to_vec());
        Ok(())
    }

    async fn release(&self, order_id: OrderId, _items: &[SkuQuantity]) -> Result<(), InventoryError> {
        let mut state = self.state.write().unwrap();
        state.release_calls += 1;
        if state.fail_on_release {
            return Err(InventoryError::Unavailable("simulated release failure".into()));
        }
        // Release against the reservation we actually hold so stock never
        // over-credits, and drop out quietly when there is nothing to undo.
        if let Some(held) = state.reserved.remove(&order_id) {
            for item in held {
                if let Some(available) = state.stock.get_mut(&item.sku_id) {
                    *available += item.count;
                }
            }
        }
        Ok(())
    }

    async fn confirm(&self, order_id: OrderId, items: &[SkuQuantity]) -> Result<(), InventoryError> {
        let mut state = self.state.write().unwrap();
        state.confirm_calls += 1;
        if state.fail_on_confirm {
            return Err(InventoryError::Unavailable("simulated confirm failure".into()));
        }
        state.reserved.remove(&order_id);
        state.confirmed.insert(order_id, items.to_vec());
        Ok(())
    }
}
