//! Order and payment state machines.
//!
//! The two enumerations are intentionally distinct types. The payment status
//! is what the reconciliation ledger keys decisions on; the order status is
//! what the store persists for the rest of the platform. They move together
//! but must never share integer codes or be compared across types.

use serde::{Deserialize, Serialize};

/// The state of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Unpaid ──► Paid ──► Completed
///    │
///    └──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    /// Order created, inventory reserved, awaiting payment.
    #[default]
    Unpaid,

    /// Payment confirmed, reservation converted to a permanent deduction.
    Paid,

    /// Order delivered (terminal state).
    Completed,

    /// Order cancelled by the user or by payment timeout (terminal state).
    Cancelled,
}

impl OrderStatus {
    /// Returns true if a payment outcome may still be applied.
    pub fn can_pay(&self) -> bool {
        matches!(self, OrderStatus::Unpaid)
    }

    /// Returns true if the order can be completed.
    pub fn can_complete(&self) -> bool {
        matches!(self, OrderStatus::Paid)
    }

    /// Returns true if the order can still be cancelled.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Unpaid)
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Unpaid => "Unpaid",
            OrderStatus::Paid => "Paid",
            OrderStatus::Completed => "Completed",
            OrderStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The last known outcome of the payment leg of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PaymentStatus {
    /// No payment outcome yet; the reservation is still compensatable.
    #[default]
    Pending,

    /// Payment succeeded; the reservation was confirmed.
    Succeeded,

    /// Payment cancelled or timed out; the reservation was released.
    Cancelled,
}

impl PaymentStatus {
    /// Returns true if no reconciliation has happened yet.
    pub fn is_pending(&self) -> bool {
        matches!(self, PaymentStatus::Pending)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Succeeded => "Succeeded",
            PaymentStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome reported by the external payment subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentOutcome {
    /// Payment went through; confirm the deduction.
    Success,
    /// Payment was abandoned or rejected; release the reservation.
    Cancel,
}

impl PaymentOutcome {
    /// The payment status this outcome reconciles the order to.
    pub fn target_payment_status(&self) -> PaymentStatus {
        match self {
            PaymentOutcome::Success => PaymentStatus::Succeeded,
            PaymentOutcome::Cancel => PaymentStatus::Cancelled,
        }
    }

    /// The order status this outcome reconciles the order to.
    pub fn target_order_status(&self) -> OrderStatus {
        match self {
            PaymentOutcome::Success => OrderStatus::Paid,
            PaymentOutcome::Cancel => OrderStatus::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_order_status_is_unpaid() {
        assert_eq!(OrderStatus::default(), OrderStatus::Unpaid);
    }

    #[test]
    fn only_unpaid_can_pay_or_cancel() {
        assert!(OrderStatus::Unpaid.can_pay());
        assert!(OrderStatus::Unpaid.can_cancel());
        for s in [
            OrderStatus::Paid,
            OrderStatus::Completed,
            OrderStatus::Cancelled,
        ] {
            assert!(!s.can_pay(), "{s} must not accept payment");
            assert!(!s.can_cancel(), "{s} must not be cancellable");
        }
    }

    #[test]
    fn only_paid_can_complete() {
        assert!(OrderStatus::Paid.can_complete());
        assert!(!OrderStatus::Unpaid.can_complete());
        assert!(!OrderStatus::Completed.can_complete());
        assert!(!OrderStatus::Cancelled.can_complete());
    }

    #[test]
    fn terminal_states() {
        assert!(!OrderStatus::Unpaid.is_terminal());
        assert!(!OrderStatus::Paid.is_terminal());
        assert!(OrderStatus::Completed.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
    }

    #[test]
    fn outcome_targets() {
        assert_eq!(
            PaymentOutcome::Success.target_payment_status(),
            PaymentStatus::Succeeded
        );
        assert_eq!(
            PaymentOutcome::Success.target_order_status(),
            OrderStatus::Paid
        );
        assert_eq!(
            PaymentOutcome::Cancel.target_payment_status(),
            PaymentStatus::Cancelled
        );
        assert_eq!(
            PaymentOutcome::Cancel.target_order_status(),
            OrderStatus::Cancelled
        );
    }

    #[test]
    fn outcome_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&PaymentOutcome::Success).unwrap(),
            "\"success\""
        );
        let back: PaymentOutcome = serde_json::from_str("\"cancel\"").unwrap();
        assert_eq!(back, PaymentOutcome::Cancel);
    }
}
