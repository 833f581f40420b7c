//! Shared identity types for the order fulfillment core.

mod id;

pub use id::{IdGenerator, OrderId};
