//! Purchase orchestration engine.

use std::collections::HashMap;
use std::sync::Arc;

use common::{Currency, CurrencyPair, OrderId, ProductId, UserId};
use parking_lot::RwLock;
use resilience::{
    CircuitBreaker, Criticality, DeferredRequestQueue, DegradeModeController, FaultInjector,
    RateCache, ServiceError,
};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use services::{
    LoyaltyLedger, PRODUCT_LOOKUP, PricingSource, Product, ProductCatalog, RATE_LOOKUP, SALE,
    SaleLedger,
};
use tracing::{error, info};

use crate::bonus::{BonusDispatcher, BonusHandle};
use crate::config::EngineConfig;
use crate::model::{PendingBonusRequest, PurchaseRequest, PurchaseResult, UserPoints};
use crate::steps;

/// The result of a purchase together with its bonus award, if one was
/// dispatched.
#[derive(Debug)]
pub struct PurchaseReceipt {
    pub result: PurchaseResult,
    /// Handle to the detached award. Dropping it does not cancel the award.
    pub bonus: Option<BonusHandle>,
}

/// Point-in-time view of the engine's shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineHealth {
    pub degraded: bool,
    pub pending_requests: usize,
    pub cached_rate_pairs: usize,
}

/// Runs purchases against unreliable dependencies.
///
/// Product lookup, rate lookup and sale run sequentially, each behind a
/// [`CircuitBreaker`]. The rate is served through a per-pair [`RateCache`],
/// so it never fails a purchase. The bonus award runs detached and never
/// changes the returned status.
pub struct OrchestrationEngine<C, P, S, L>
where
    C: ProductCatalog,
    P: PricingSource,
    S: SaleLedger,
    L: LoyaltyLedger + 'static,
{
    catalog: C,
    pricing: P,
    sales: S,
    bonus: BonusDispatcher<L>,
    config: EngineConfig,
    product_breaker: CircuitBreaker,
    rate_breaker: CircuitBreaker,
    sale_breaker: CircuitBreaker,
    rate_caches: RwLock<HashMap<CurrencyPair, Arc<RateCache>>>,
}

impl<C, P, S, L> OrchestrationEngine<C, P, S, L>
where
    C: ProductCatalog,
    P: PricingSource,
    S: SaleLedger,
    L: LoyaltyLedger + 'static,
{
    /// Creates an engine with a fresh degrade controller and deferred queue.
    pub fn new(catalog: C, pricing: P, sales: S, loyalty: L, config: EngineConfig) -> Self {
        let controller = Arc::new(DegradeModeController::new());
        let bonus = BonusDispatcher::new(Arc::new(loyalty), controller, &config);
        Self {
            catalog,
            pricing,
            sales,
            bonus,
            product_breaker: CircuitBreaker::new(
                PRODUCT_LOOKUP,
                config.product_timeout,
                config.product_criticality,
            ),
            // No fallback: the rate cache serves the stale value instead.
            rate_breaker: CircuitBreaker::new(
                RATE_LOOKUP,
                config.rate_timeout,
                Criticality::Critical,
            ),
            sale_breaker: CircuitBreaker::new(SALE, config.sale_timeout, config.sale_criticality),
            rate_caches: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Replaces the strategy evaluated once per live bonus award.
    pub fn with_bonus_faults(mut self, faults: Arc<dyn FaultInjector>) -> Self {
        self.bonus = self.bonus.with_faults(faults);
        self
    }

    /// Processes one purchase.
    ///
    /// Never fails: every error ends in a `FAILED` result.
    #[tracing::instrument(
        skip_all,
        fields(
            workflow = steps::WORKFLOW,
            user_id = %request.user_id,
            product_id = %request.product_id,
        )
    )]
    pub async fn submit(&self, request: PurchaseRequest) -> PurchaseReceipt {
        if let Err(err) = request.validate() {
            return Self::fail(&request, steps::STEP_VALIDATE, err);
        }

        let product = match self.lookup_product(request.product_id).await {
            Ok(product) => product,
            Err(err) => return Self::fail(&request, steps::STEP_LOOKUP_PRODUCT, err),
        };

        let pair = CurrencyPair::new(product.currency.clone(), request.currency.clone());
        let rate = self.exchange_rate(&pair).await;
        info!(step = steps::STEP_EXCHANGE_RATE, %pair, %rate, "rate resolved");

        let order_id = match self.execute_sale(&request, rate).await {
            Ok(order_id) => order_id,
            Err(err) => return Self::fail(&request, steps::STEP_EXECUTE_SALE, err),
        };

        let converted_price = product.price * rate;
        let bonus_points = bonus_value(product.price, request.quantity);
        let bonus = (bonus_points > 0)
            .then(|| self.bonus.dispatch(request.user_id, order_id, bonus_points));

        info!(
            %order_id,
            original_price = %product.price,
            %converted_price,
            bonus_points,
            "purchase completed"
        );
        PurchaseReceipt {
            result: PurchaseResult::completed(
                order_id,
                request.product_id,
                request.quantity,
                product.price,
                converted_price,
                bonus_points,
            ),
            bonus,
        }
    }

    /// Processes one purchase and detaches its bonus award.
    pub async fn purchase(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
        currency: impl Into<Currency>,
    ) -> PurchaseResult {
        self.submit(PurchaseRequest::new(user_id, product_id, quantity, currency))
            .await
            .result
    }

    /// Returns confirmed and not-yet-replayed points of a user.
    pub fn user_points(&self, user_id: UserId) -> UserPoints {
        self.bonus.book().user_points(user_id)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn degrade_controller(&self) -> &Arc<DegradeModeController> {
        self.bonus.controller()
    }

    pub fn deferred_queue(&self) -> &Arc<DeferredRequestQueue<PendingBonusRequest>> {
        self.bonus.queue()
    }

    /// Returns the dispatcher, e.g. to hand to the recovery loop.
    pub fn bonus_dispatcher(&self) -> &BonusDispatcher<L> {
        &self.bonus
    }

    /// Returns the cache of a currency pair, if a purchase has used it.
    pub fn rate_cache(&self, pair: &CurrencyPair) -> Option<Arc<RateCache>> {
        self.rate_caches.read().get(pair).cloned()
    }

    pub fn health(&self) -> EngineHealth {
        EngineHealth {
            degraded: self.bonus.controller().is_degraded(),
            pending_requests: self.bonus.queue().len(),
            cached_rate_pairs: self.rate_caches.read().len(),
        }
    }

    async fn lookup_product(&self, product_id: ProductId) -> Result<Product, ServiceError> {
        info!(step = steps::STEP_LOOKUP_PRODUCT, "step started");
        self.product_breaker
            .call_with_fallback(
                || self.catalog.get(product_id),
                |_| {
                    Ok(Product::new(
                        product_id,
                        self.config.fallback_product_name.clone(),
                        self.config.fallback_product_price,
                        self.config.base_currency.clone(),
                    ))
                },
            )
            .await
            .into_result()
    }

    async fn exchange_rate(&self, pair: &CurrencyPair) -> Decimal {
        let cache = self.cache_for(pair);
        cache
            .get_or_refresh(|| async {
                self.rate_breaker
                    .call(|| self.pricing.fetch_rate(pair))
                    .await
                    .into_result()
            })
            .await
    }

    async fn execute_sale(
        &self,
        request: &PurchaseRequest,
        rate: Decimal,
    ) -> Result<OrderId, ServiceError> {
        info!(step = steps::STEP_EXECUTE_SALE, "step started");
        self.sale_breaker
            .call_with_fallback(
                || self.sales.sell(request.product_id, request.quantity, rate),
                |err| {
                    if err.is_rejection() && !self.config.sale_fallback_on_rejection {
                        Err(err.clone())
                    } else {
                        Ok(OrderId::synthetic())
                    }
                },
            )
            .await
            .into_result()
    }

    fn cache_for(&self, pair: &CurrencyPair) -> Arc<RateCache> {
        if let Some(cache) = self.rate_caches.read().get(pair) {
            return Arc::clone(cache);
        }
        let mut caches = self.rate_caches.write();
        Arc::clone(caches.entry(pair.clone()).or_default())
    }

    fn fail(request: &PurchaseRequest, step: &str, err: ServiceError) -> PurchaseReceipt {
        error!(step, error = %err, "purchase failed");
        PurchaseReceipt {
            result: PurchaseResult::failed(request.product_id, request.quantity, err.to_string()),
            bonus: None,
        }
    }
}

/// Whole points earned for `quantity` units at `unit_price`.
pub fn bonus_value(unit_price: Decimal, quantity: u32) -> u64 {
    (unit_price * Decimal::from(quantity))
        .trunc()
        .to_u64()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bonus_truncates_to_whole_points() {
        assert_eq!(bonus_value(Decimal::new(99999, 2), 1), 999);
        assert_eq!(bonus_value(Decimal::new(99999, 2), 2), 1999);
        assert_eq!(bonus_value(Decimal::new(50, 2), 1), 0);
        assert_eq!(bonus_value(Decimal::new(-5, 0), 1), 0);
    }
}
