//! Message bus topics used by the saga.

/// Topic carrying scheduled stock rollback messages.
pub const ORDER_ROLLBACK_TOPIC: &str = "order.stock.rollback";
