//! Order records and their construction.

mod draft;
mod record;

pub use draft::{LineItemDraft, OrderDraft};
pub use record::{Order, OrderLineItem};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a concrete SKU (style/variant) of a goods listing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SkuId(u64);

impl SkuId {
    /// Creates a SKU id from a raw value.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the underlying numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SkuId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SkuId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Errors that can occur when building or transitioning an order.
#[derive(Debug, Error)]
pub enum OrderError {
    /// A delivery address is required.
    #[error("delivery address is required")]
    AddressRequired,

    /// Order has no line items.
    #[error("order has no line items")]
    NoItems,

    /// A required line-item reference is missing or zero.
    #[error("line item {index}: {field} must be greater than 0")]
    InvalidReference { index: usize, field: &'static str },

    /// Invalid quantity.
    #[error("line item {index}: invalid quantity {quantity} (must be greater than 0)")]
    InvalidQuantity { index: usize, quantity: u32 },

    /// Invalid unit price.
    #[error("line item {index}: invalid price {price} (must be greater than 0 cents)")]
    InvalidPrice { index: usize, price: i64 },

    /// Discount larger than the amount it applies to.
    #[error("line item {index}: discount exceeds the payable amount")]
    DiscountExceedsAmount { index: usize },
}
