//! Persisted order and line-item records.

use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};

use crate::{Money, OrderStatus, PaymentStatus, SkuQuantity};

use super::{OrderDraft, OrderError, SkuId};

/// A persisted order.
///
/// Created only through [`Order::place`]; mutated only through the store's
/// documented transition operations. Soft-deleted via `deleted_at`, never
/// physically removed while a rollback message may still reference it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Globally unique order id.
    pub id: OrderId,
    /// Owner of the order.
    pub user_id: u64,
    /// Current lifecycle status.
    pub status: OrderStatus,
    /// Current payment status (distinct state machine).
    pub payment_status: PaymentStatus,
    /// Sum of line-item sale prices.
    pub goods_amount: Money,
    /// Sum of line-item freight.
    pub freight_amount: Money,
    /// Sum of line-item discounts.
    pub discount_amount: Money,
    /// Amount payable: always the sum of line-item payment amounts.
    pub payment_amount: Money,
    /// When the payment succeeded.
    pub pay_time: Option<DateTime<Utc>>,
    /// Payment method reported by the payment subsystem.
    pub pay_method: Option<String>,
    /// When the order was placed.
    pub created_at: DateTime<Utc>,
    /// When the order was delivered.
    pub delivery_time: Option<DateTime<Utc>>,
    /// Soft-delete timestamp.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Reference to the delivery address record.
    pub address_id: u64,
    /// Snapshot of the address text at placement time.
    pub address_snapshot: String,
}

/// A line of an order. No lifecycle of its own: created atomically with its
/// order and read back only by order id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineItem {
    /// Owning order.
    pub order_id: OrderId,
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
    /// Amount payable for this line.
    pub payment_amount: Money,
    /// Per-unit effective price: `payment_amount / quantity`.
    pub single_price: Money,
}

impl Order {
    /// Builds an order and its line items from a validated draft.
    ///
    /// Totals are computed by cents summation over the lines, so the order's
    /// payment amount equals the sum of line-item payment amounts by
    /// construction. Status starts at `Unpaid`/`Pending`.
    pub fn place(
        id: OrderId,
        draft: &OrderDraft,
        now: DateTime<Utc>,
    ) -> Result<(Order, Vec<OrderLineItem>), OrderError> {
        draft.validate()?;

        let mut goods_amount = Money::zero();
        let mut freight_amount = Money::zero();
        let mut discount_amount = Money::zero();
        let mut payment_amount = Money::zero();

        let items: Vec<OrderLineItem> = draft
            .items
            .iter()
            .map(|line| {
                let line_payment = line.payment_amount();
                goods_amount += line.sale_price.multiply(line.quantity);
                freight_amount += line.freight;
                discount_amount += line.discount;
                payment_amount += line_payment;

                OrderLineItem {
                    order_id: id,
                    merchant_id: line.merchant_id,
                    goods_id: line.goods_id,
                    sku_id: line.sku_id,
                    goods_version: line.goods_version,
                    quantity: line.quantity,
                    original_price: line.original_price,
                    sale_price: line.sale_price,
                    freight: line.freight,
                    discount: line.discount,
                    coupon_id: line.coupon_id,
                    payment_amount: line_payment,
                    single_price: line_payment.divide(line.quantity),
                }
            })
            .collect();

        let order = Order {
            id,
            user_id: draft.user_id,
            status: OrderStatus::Unpaid,
            payment_status: PaymentStatus::Pending,
            goods_amount,
            freight_amount,
            discount_amount,
            payment_amount,
            pay_time: None,
            pay_method: None,
            created_at: now,
            delivery_time: None,
            deleted_at: None,
            address_id: draft.address_id,
            address_snapshot: draft.address_snapshot.clone(),
        };

        Ok((order, items))
    }
}

impl OrderLineItem {
    /// The locked quantity this line contributes to a reservation.
    pub fn sku_quantity(&self) -> SkuQuantity {
        SkuQuantity {
            sku_id: self.sku_id,
            count: self.quantity,
        }
    }
}
