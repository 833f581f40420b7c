//! Compensating-transaction core for order fulfillment.
//!
//! [`OrderSaga`] places an order: persist the record, reserve stock at the
//! inventory service, and schedule a delayed rollback message. The
//! reservation is then settled exactly once by whichever side arrives first:
//! the payment outcome (`on_payment_result`/`cancel_order`) or the
//! [`RollbackWorker`] consuming the delayed message after the payment window
//! closes. Both sides key their decision on the reconciliation record and
//! serialize per order through the distributed lock, so redelivery, crashes
//! and concurrent workers cannot release or confirm stock twice.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod inventory;
pub mod topics;
pub mod worker;

mod recon;

pub use config::SagaConfig;
pub use coordinator::OrderSaga;
pub use error::SagaError;
pub use inventory::{InMemoryInventoryClient, InventoryClient, InventoryError};
pub use worker::RollbackWorker;
