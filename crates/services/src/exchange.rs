//! Exchange-rate source trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::CurrencyPair;
use parking_lot::RwLock;
use resilience::{FaultInjector, NoFaults, ServiceError};
use rust_decimal::Decimal;

use crate::simulate::simulate_call;

/// Dependency name of rate lookups.
pub const RATE_LOOKUP: &str = "exchange.rate";

/// Supplies live exchange rates.
#[async_trait]
pub trait PricingSource: Send + Sync {
    /// Returns how many units of `pair.to` one unit of `pair.from` buys.
    async fn fetch_rate(&self, pair: &CurrencyPair) -> Result<Decimal, ServiceError>;
}

#[derive(Debug, Default)]
struct InMemoryExchangeState {
    rates: HashMap<CurrencyPair, Decimal>,
    fail_on_fetch: bool,
    fetch_count: u64,
}

/// In-memory rate table for demos and tests.
#[derive(Clone)]
pub struct InMemoryExchange {
    state: Arc<RwLock<InMemoryExchangeState>>,
    faults: Arc<dyn FaultInjector>,
    latency: Duration,
}

impl Default for InMemoryExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryExchange {
    /// Creates an empty rate table without simulated faults.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(InMemoryExchangeState::default())),
            faults: Arc::new(NoFaults),
            latency: Duration::ZERO,
        }
    }

    /// Creates a rate table seeded with the sample USD/EUR/GBP/BRL rates.
    pub fn with_sample_rates() -> Self {
        let exchange = Self::new();
        let rates = [
            ("USD", "EUR", Decimal::new(85, 2)),
            ("USD", "GBP", Decimal::new(73, 2)),
            ("EUR", "USD", Decimal::new(118, 2)),
            ("EUR", "GBP", Decimal::new(86, 2)),
            ("GBP", "USD", Decimal::new(137, 2)),
            ("GBP", "EUR", Decimal::new(116, 2)),
            ("USD", "BRL", Decimal::new(604, 2)),
            ("EUR", "BRL", Decimal::new(629, 2)),
            ("BRL", "USD", Decimal::new(1656, 4)),
            ("BRL", "EUR", Decimal::new(1590, 4)),
        ];
        for (from, to, rate) in rates {
            exchange.set_rate(CurrencyPair::new(from, to), rate);
        }
        exchange
    }

    /// Replaces the fault injector consulted on every fetch.
    pub fn with_faults(mut self, faults: Arc<dyn FaultInjector>) -> Self {
        self.faults = faults;
        self
    }

    /// Sets a fixed latency applied to every fetch.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Adds or replaces a rate.
    pub fn set_rate(&self, pair: CurrencyPair, rate: Decimal) {
        self.state.write().rates.insert(pair, rate);
    }

    /// Configures every fetch to fail.
    pub fn set_fail_on_fetch(&self, fail: bool) {
        self.state.write().fail_on_fetch = fail;
    }

    /// Returns how many fetches reached the rate table.
    pub fn fetch_count(&self) -> u64 {
        self.state.read().fetch_count
    }
}

#[async_trait]
impl PricingSource for InMemoryExchange {
    async fn fetch_rate(&self, pair: &CurrencyPair) -> Result<Decimal, ServiceError> {
        if self.state.read().fail_on_fetch {
            return Err(ServiceError::unavailable(
                RATE_LOOKUP,
                "exchange service temporarily unavailable",
            ));
        }
        simulate_call(RATE_LOOKUP, self.latency, self.faults.as_ref()).await?;

        let mut state = self.state.write();
        state.fetch_count += 1;
        if let Some(rate) = state.rates.get(pair) {
            return Ok(*rate);
        }
        if pair.is_identity() {
            return Ok(Decimal::ONE);
        }
        Err(ServiceError::NotFound(format!("exchange rate {pair}")))
    }
}
