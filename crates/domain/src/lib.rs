//! Domain layer for the order fulfillment core.
//!
//! This crate provides the data model shared by the saga, the stores and the
//! HTTP surface:
//! - `Money` amounts in integer cents (never floating point)
//! - `OrderStatus` and `PaymentStatus` state machines (deliberately two
//!   distinct enumerations)
//! - `Order`/`OrderLineItem` records, built and validated from an
//!   `OrderDraft`
//! - `StockReservation`, the payload carried inside delayed rollback
//!   messages

pub mod order;

mod money;
mod reservation;
mod status;

pub use money::Money;
pub use order::{LineItemDraft, Order, OrderDraft, OrderError, OrderLineItem, SkuId};
pub use reservation::{SkuQuantity, StockReservation};
pub use status::{OrderStatus, PaymentOutcome, PaymentStatus};
