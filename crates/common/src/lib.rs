//! Shared identifier and value types used across the purchase services.

pub mod types;

pub use types::{Currency, CurrencyPair, OrderId, ProductId, UserId};
