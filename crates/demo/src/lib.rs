//! Wiring of the purchase demo.
//!
//! Builds the in-memory store, exchange and loyalty services with random
//! fault injection and hands them to an [`OrchestrationEngine`].

pub mod config;

use std::sync::Arc;
use std::time::Duration;

use common::{ProductId, UserId};
use orchestration::{OrchestrationEngine, PurchaseRequest};
use rand::Rng;
use resilience::{DEFAULT_OUTAGE, RandomFaults};
use services::{InMemoryExchange, InMemoryLoyaltyLedger, InMemoryStore};

pub use config::{Config, ConfigError};

/// The engine over the demo's in-memory services.
pub type DemoEngine =
    OrchestrationEngine<InMemoryStore, InMemoryExchange, InMemoryStore, InMemoryLoyaltyLedger>;

/// Currencies the simulated buyers pay in.
pub const CURRENCIES: [&str; 4] = ["USD", "EUR", "GBP", "BRL"];

/// Handles on the services behind a [`DemoEngine`].
#[derive(Clone)]
pub struct DemoServices {
    pub store: InMemoryStore,
    pub exchange: InMemoryExchange,
    pub loyalty: InMemoryLoyaltyLedger,
}

/// Builds the services and the engine.
///
/// Fault rates are multiplied by `config.fault_rate_scale`; a scale of 0
/// turns every injected fault off.
pub fn build(config: &Config) -> (DemoEngine, DemoServices) {
    let scale = config.fault_rate_scale;

    let store = InMemoryStore::with_sample_products()
        .with_lookup_faults(Arc::new(
            RandomFaults::new().with_failure_probability(0.1).scaled(scale),
        ))
        .with_sale_faults(
            Arc::new(RandomFaults::new().with_failure_probability(0.05).scaled(scale)),
            DEFAULT_OUTAGE,
        );
    store.set_lookup_delay(Duration::from_millis(100));

    let exchange = InMemoryExchange::with_sample_rates().with_faults(Arc::new(
        RandomFaults::new()
            .with_failure_probability(0.2)
            .with_delay(0.5, Duration::from_millis(800))
            .scaled(scale),
    ));

    let loyalty = InMemoryLoyaltyLedger::new().with_faults(Arc::new(
        RandomFaults::new()
            .with_failure_probability(0.05)
            .with_delay(0.1, Duration::from_millis(1500))
            .scaled(scale),
    ));

    let engine = OrchestrationEngine::new(
        store.clone(),
        exchange.clone(),
        store.clone(),
        loyalty.clone(),
        config.engine.clone(),
    )
    .with_bonus_faults(Arc::new(
        RandomFaults::new().with_degrade_probability(0.1).scaled(scale),
    ));

    (
        engine,
        DemoServices {
            store,
            exchange,
            loyalty,
        },
    )
}

/// Draws a purchase of one or two units of a sample product.
pub fn random_request<R: Rng>(rng: &mut R, users: u64) -> PurchaseRequest {
    let user_id = UserId::new(rng.random_range(1..=users.max(1)));
    let product_id = ProductId::new(rng.random_range(1..=3));
    let quantity = rng.random_range(1..=2);
    let currency = CURRENCIES[rng.random_range(0..CURRENCIES.len())];
    PurchaseRequest::new(user_id, product_id, quantity, currency)
}
