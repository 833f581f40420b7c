//! Order persistence for the fulfillment core.
//!
//! The [`OrderStore`] trait is the seam between the saga and whatever holds
//! the order rows. Two implementations are provided: an in-memory store for
//! tests and development, and a PostgreSQL store backed by sqlx.

mod error;
mod memory;
mod postgres;
mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryOrderStore;
pub use postgres::PostgresOrderStore;
pub use store::OrderStore;
