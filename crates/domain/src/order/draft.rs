//! Incoming order drafts and their validation.

use serde::{Deserialize, Serialize};

use crate::Money;

use super::{OrderError, SkuId};

/// One line item of an order draft, as submitted by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemDraft {
    /// Merchant selling the goods.
    pub merchant_id: u64,
    /// Goods listing.
    pub goods_id: u64,
    /// Concrete SKU of the listing.
    pub sku_id: SkuId,
    /// Version of the goods record the price was quoted against.
    pub goods_version: u32,
    /// Units ordered.
    pub quantity: u32,
    /// Per-unit list price.
    pub original_price: Money,
    /// Per-unit effective sale price.
    pub sale_price: Money,
    /// Freight charged for this line.
    pub freight: Money,
    /// Discount applied to this line.
    pub discount: Money,
    /// Coupon backing the discount, if any.
    pub coupon_id: Option<u64>,
}

impl LineItemDraft {
    /// The amount payable for this line: `sale_price * quantity + freight -
    /// discount`.
    pub fn payment_amount(&self) -> Money {
        self.sale_price.multiply(self.quantity) + self.freight - self.discount
    }

    fn validate(&self, index: usize) -> Result<(), OrderError> {
        if self.merchant_id == 0 {
            return Err(OrderError::InvalidReference {
                index,
                field: "merchant_id",
            });
        }
        if self.goods_id == 0 {
            return Err(OrderError::InvalidReference {
                index,
                field: "goods_id",
            });
        }
        if self.sku_id.as_u64() == 0 {
            return Err(OrderError::InvalidReference {
                index,
                field: "sku_id",
            });
        }
        if self.goods_version == 0 {
            return Err(OrderError::InvalidReference {
                index,
                field: "goods_version",
            });
        }
        if self.quantity == 0 {
            return Err(OrderError::InvalidQuantity {
                index,
                quantity: self.quantity,
            });
        }
        if !self.sale_price.is_positive() {
            return Err(OrderError::InvalidPrice {
                index,
                price: self.sale_price.cents(),
            });
        }
        if self.payment_amount().is_negative() {
            return Err(OrderError::DiscountExceedsAmount { index });
        }
        Ok(())
    }
}

/// A request to place an order, before any side effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDraft {
    /// Owner of the order.
    pub user_id: u64,
    /// Reference to the delivery address record.
    pub address_id: u64,
    /// Snapshot of the address text at placement time.
    pub address_snapshot: String,
    /// Lines to order.
    pub items: Vec<LineItemDraft>,
}

impl OrderDraft {
    /// Validates the draft: resolvable address, non-empty items, and every
    /// line-item reference, quantity and price strictly positive.
    ///
    /// Runs before any side effect; a rejected draft reserves nothing and
    /// persists nothing.
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.address_id == 0 {
            return Err(OrderError::AddressRequired);
        }
        if self.items.is_empty() {
            return Err(OrderError::NoItems);
        }
        for (index, item) in self.items.iter().enumerate() {
            item.validate(index)?;
        }
        Ok(())
    }
}
