//! Downstream capabilities of the purchase workflow.
//!
//! Each module pairs a capability trait with an in-memory implementation
//! whose failures come from a pluggable [`resilience::FaultInjector`] or
//! from explicit test toggles:
//! - [`store`]: product catalog and sale ledger
//! - [`exchange`]: exchange rates
//! - [`loyalty`]: idempotent bonus awards

pub mod exchange;
pub mod loyalty;
mod simulate;
pub mod store;

pub use exchange::{InMemoryExchange, PricingSource, RATE_LOOKUP};
pub use loyalty::{AwardAck, BONUS_AWARD, BonusRecord, InMemoryLoyaltyLedger, LoyaltyLedger};
pub use store::{InMemoryStore, PRODUCT_LOOKUP, Product, ProductCatalog, SALE, Sale, SaleLedger};
