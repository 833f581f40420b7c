//! Stock reservation payload for delayed rollback messages.

use common::OrderId;
use serde::{Deserialize, Serialize};

use crate::order::SkuId;

/// A reserved quantity of one SKU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkuQuantity {
    /// The SKU whose stock was locked.
    pub sku_id: SkuId,
    /// Units locked.
    pub count: u32,
}

/// The reservation made for an order, carried inside the delayed rollback
/// message.
///
/// Never persisted as a row of its own: serializing it into the message body
/// lets the rollback worker release stock without re-reading the order's
/// line items, and keeps working even if the order row is soft-deleted in
/// the meantime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReservation {
    /// The order the reservation belongs to.
    pub order_id: OrderId,
    /// Locked SKU quantities.
    pub items: Vec<SkuQuantity>,
}

impl StockReservation {
    /// Creates a reservation payload.
    pub fn new(order_id: OrderId, items: Vec<SkuQuantity>) -> Self {
        Self { order_id, items }
    }
}
