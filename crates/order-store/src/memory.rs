use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::OrderId;
use domain::{Order, OrderLineItem, OrderStatus, PaymentStatus};
use tokio::sync::RwLock;

use crate::{OrderStore, Result, StoreError};

#[derive(Debug, Clone)]
struct StoredOrder {
    order: Order,
    items: Vec<OrderLineItem>,
}

/// In-memory order store for tests and development.
///
/// Provides the same interface and error behavior as the PostgreSQL
/// implementation.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<OrderId, StoredOrder>>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create(&self, order: &Order, items: &[OrderLineItem]) -> Result<()> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id) {
            return Err(StoreError::DuplicateOrder(order.id));
        }
        orders.insert(
            order.id,
            StoredOrder {
                order: order.clone(),
                items: items.to_vec(),
            },
        );
        Ok(())
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<Order>> {
        let orders = self.orders.read().await;
        Ok(orders.get(&order_id).map(|s| s.order.clone()))
    }

    async fn line_items(&self, order_id: OrderId) -> Result<Vec<OrderLineItem>> {
        let orders = self.orders.read().await;
        Ok(orders
            .get(&order_id)
            .map(|s| s.items.clone())
            .unwrap_or_default())
    }

    async fn update_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        payment_status: PaymentStatus,
    ) -> Result<()> {
        let mut orders = self.orders.write().await;
        let stored = orders
            .get_mut(&order_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;
        stored.order.status = status;
        stored.order.payment_status = payment_status;
        Ok(())
    }

    async fn record_payment(
        &self,
        order_id: OrderId,
        paid_at: DateTime<Utc>,
        method: &str,
    ) -> Result<()> {
        let mut orders = self.orders.write().await;
        let stored = orders
            .get_mut(&order_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;
        stored.order.status = OrderStatus::Paid;
        stored.order.payment_status = PaymentStatus::Succeeded;
        stored.order.pay_time = Some(paid_at);
        stored.order.pay_method = Some(method.to_string());
        Ok(())
    }

    async fn status_and_created_at(
        &self,
        order_id: OrderId,
    ) -> Result<(OrderStatus, PaymentStatus, DateTime<Utc>)> {
        let orders = self.orders.read().await;
        let stored = orders
            .get(&order_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;
        Ok((
            stored.order.status,
            stored.order.payment_status,
            stored.order.created_at,
        ))
    }

    async fn soft_delete(&self, order_id: OrderId) -> Result<()> {
        let mut orders = self.orders.write().await;
        let stored = orders
            .get_mut(&order_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;
        stored.order.deleted_at = Some(Utc::now());
        Ok(())
    }
}
