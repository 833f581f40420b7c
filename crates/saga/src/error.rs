use common::OrderId;
use coordination::{BusError, LockError};
use domain::{OrderError, PaymentStatus};
use order_store::StoreError;
use thiserror::Error;

use crate::inventory::InventoryError;

#[derive(Debug, Error)]
pub enum SagaError {
    #[error(transparent)]
    Order(#[from] OrderError),

    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("order {order_id} is {current}, cannot move to {requested}")]
    IllegalTransition {
        order_id: OrderId,
        current: PaymentStatus,
        requested: PaymentStatus,
    },

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("inventory error: {0}")]
    Inventory(#[from] InventoryError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("order {order_id} is paid but stock confirmation failed: {source}")]
    ConfirmFailed {
        order_id: OrderId,
        source: InventoryError,
    },

    #[error("order {order_id} is cancelled but stock release failed: {source}")]
    ReleaseFailed {
        order_id: OrderId,
        source: InventoryError,
    },
}

impl From<StoreError> for SagaError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::OrderNotFound(id) => SagaError::OrderNotFound(id),
            other => SagaError::Store(other),
        }
    }
}
