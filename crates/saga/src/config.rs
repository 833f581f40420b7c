//! Saga timing configuration.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Timing knobs for order reconciliation.
#[derive(Debug, Clone, Copy)]
pub struct SagaConfig {
    /// How long the platform waits for a payment outcome before the
    /// reservation becomes eligible for rollback.
    pub payment_window: Duration,
    /// Extra slack between the payment deadline and the rollback message's
    /// delivery. The worker re-validates status either way; the grace just
    /// keeps a well-behaved payment callback ahead of the timer.
    pub rollback_grace: Duration,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            payment_window: Duration::from_secs(30 * 60),
            rollback_grace: Duration::from_secs(5 * 60),
        }
    }
}

impl SagaConfig {
    /// The instant the payment window closes for an order created at `from`.
    ///
    /// Saturates instead of panicking on absurd window values.
    pub fn payment_deadline(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        TimeDelta::from_std(self.payment_window)
            .ok()
            .and_then(|window| from.checked_add_signed(window))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Delay to schedule the rollback message with. Always exceeds the
    /// payment window.
    pub fn rollback_delay(&self) -> Duration {
        self.payment_window + self.rollback_grace
    }
}
