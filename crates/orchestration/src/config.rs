//! Engine tunables.

use std::time::Duration;

use common::Currency;
use resilience::Criticality;
use rust_decimal::Decimal;

/// Timeouts, windows and fallback policy of the purchase engine.
///
/// The defaults reproduce the fail-open demo behaviour: both required
/// remote steps are best-effort and fall back to fabricated values.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Deadline of a product lookup.
    pub product_timeout: Duration,
    /// Deadline of a live rate fetch.
    pub rate_timeout: Duration,
    /// Deadline of a sale.
    pub sale_timeout: Duration,
    /// Deadline of a bonus award, live or replayed.
    pub bonus_timeout: Duration,
    /// Length of a degrade window.
    pub degrade_window: Duration,
    /// Synthetic delay applied to bonus awards while degraded.
    pub degraded_delay: Duration,
    /// Period of the recovery loop.
    pub drain_interval: Duration,
    pub product_criticality: Criticality,
    pub sale_criticality: Criticality,
    /// Whether a best-effort sale also fabricates an order when the ledger
    /// rejects it (insufficient stock, unknown product). Off, rejections
    /// always fail the purchase.
    pub sale_fallback_on_rejection: bool,
    /// Name of the product fabricated when the lookup fails.
    pub fallback_product_name: String,
    /// Price of the product fabricated when the lookup fails.
    pub fallback_product_price: Decimal,
    /// Currency of the fabricated product.
    pub base_currency: Currency,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            product_timeout: Duration::from_millis(500),
            rate_timeout: Duration::from_secs(1),
            sale_timeout: Duration::from_millis(500),
            bonus_timeout: Duration::from_secs(1),
            degrade_window: Duration::from_secs(30),
            degraded_delay: Duration::from_secs(2),
            drain_interval: Duration::from_secs(5),
            product_criticality: Criticality::BestEffort,
            sale_criticality: Criticality::BestEffort,
            sale_fallback_on_rejection: true,
            fallback_product_name: "Default Product".to_string(),
            fallback_product_price: Decimal::new(999999, 2),
            base_currency: Currency::new("USD"),
        }
    }
}
