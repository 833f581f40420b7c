use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::OrderId;
use domain::{Order, OrderLineItem, OrderStatus, PaymentStatus};

use crate::Result;

/// Persistence seam for orders and their line items.
///
/// Implementations must be safe for concurrent use (Send + Sync); the saga
/// serializes mutations per order id with a distributed lock, not with the
/// store, so the store itself only guarantees per-call atomicity.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists an order and its line items atomically.
    ///
    /// Fails with `DuplicateOrder` if the id is already taken; nothing is
    /// written in that case.
    async fn create(&self, order: &Order, items: &[OrderLineItem]) -> Result<()>;

    /// Point lookup of an order. A missing order is `Ok(None)`.
    async fn get(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Returns the line items of an order, empty if the order is unknown.
    async fn line_items(&self, order_id: OrderId) -> Result<Vec<OrderLineItem>>;

    /// Moves the order to the given status pair.
    ///
    /// The two status columns always move together; transition legality is
    /// the saga's responsibility, enforced under the order's lock.
    async fn update_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        payment_status: PaymentStatus,
    ) -> Result<()>;

    /// Marks the order paid: status `Paid`/`Succeeded` plus the payment
    /// timestamp and method.
    async fn record_payment(
        &self,
        order_id: OrderId,
        paid_at: DateTime<Utc>,
        method: &str,
    ) -> Result<()>;

    /// Reads just the columns reconciliation needs to rebuild its record on
    /// a cache miss.
    async fn status_and_created_at(
        &self,
        order_id: OrderId,
    ) -> Result<(OrderStatus, PaymentStatus, DateTime<Utc>)>;

    /// Logically deletes the order. The row stays readable for any rollback
    /// message still in flight.
    async fn soft_delete(&self, order_id: OrderId) -> Result<()>;
}
