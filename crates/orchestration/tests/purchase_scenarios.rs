//! Integration tests for the purchase workflow.

use std::sync::Arc;
use std::time::Duration;

use common::{CurrencyPair, OrderId, ProductId, UserId};
use orchestration::{
    BonusOutcome, DeferReason, EngineConfig, OrchestrationEngine, PurchaseRequest, PurchaseStatus,
    spawn_recovery_loop,
};
use resilience::{Criticality, DrainReport, FaultDecision, FaultInjector, ScriptedFaults};
use rust_decimal::Decimal;
use services::{InMemoryExchange, InMemoryLoyaltyLedger, InMemoryStore};
use tokio::sync::watch;

type TestEngine =
    OrchestrationEngine<InMemoryStore, InMemoryExchange, InMemoryStore, InMemoryLoyaltyLedger>;

struct TestHarness {
    engine: TestEngine,
    store: InMemoryStore,
    exchange: InMemoryExchange,
    loyalty: InMemoryLoyaltyLedger,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    fn with_config(config: EngineConfig) -> Self {
        Self::build(
            InMemoryStore::with_sample_products(),
            InMemoryLoyaltyLedger::new(),
            config,
        )
    }

    fn build(store: InMemoryStore, loyalty: InMemoryLoyaltyLedger, config: EngineConfig) -> Self {
        let exchange = InMemoryExchange::with_sample_rates();
        let engine = OrchestrationEngine::new(
            store.clone(),
            exchange.clone(),
            store.clone(),
            loyalty.clone(),
            config,
        );
        Self {
            engine,
            store,
            exchange,
            loyalty,
        }
    }

    fn laptop(user: u64) -> PurchaseRequest {
        PurchaseRequest::new(UserId::new(user), ProductId::new(1), 1, "EUR")
    }
}

fn laptop_price() -> Decimal {
    Decimal::new(99999, 2)
}

#[tokio::test(start_paused = true)]
async fn test_happy_path_purchase() {
    let h = TestHarness::new();
    let user = UserId::new(1);

    let receipt = h.engine.submit(TestHarness::laptop(1)).await;
    let result = receipt.result;

    assert_eq!(result.status(), PurchaseStatus::Completed);
    assert_eq!(result.order_id(), Some(OrderId::new(1)));
    assert_eq!(result.product_id(), ProductId::new(1));
    assert_eq!(result.quantity(), 1);
    assert_eq!(result.original_price(), Some(laptop_price()));
    assert_eq!(
        result.converted_price(),
        Some(laptop_price() * Decimal::new(85, 2))
    );
    assert_eq!(result.bonus_points(), 999);
    assert_eq!(h.store.stock(ProductId::new(1)), Some(9));

    let outcome = receipt.bonus.unwrap().outcome().await.unwrap();
    assert_eq!(outcome, BonusOutcome::Awarded);
    let points = h.engine.user_points(user);
    assert_eq!((points.total_points, points.pending_points), (999, 0));
    assert_eq!(h.loyalty.confirmed_points(user), 999);
}

#[tokio::test(start_paused = true)]
async fn test_product_lookup_failure_uses_fallback_product() {
    let h = TestHarness::new();
    h.store.set_fail_on_lookup(true);

    let result = h.engine.submit(TestHarness::laptop(1)).await.result;

    assert_eq!(result.status(), PurchaseStatus::Completed);
    assert_eq!(result.original_price(), Some(Decimal::new(999999, 2)));
    assert!(result.order_id().is_some());
    assert_eq!(result.bonus_points(), 9999);
}

#[tokio::test(start_paused = true)]
async fn test_critical_product_lookup_fails_purchase() {
    let h = TestHarness::with_config(EngineConfig {
        product_criticality: Criticality::Critical,
        ..EngineConfig::default()
    });
    h.store.set_fail_on_lookup(true);

    let receipt = h.engine.submit(TestHarness::laptop(1)).await;
    let result = receipt.result;

    assert_eq!(result.status(), PurchaseStatus::Failed);
    assert_eq!(result.order_id(), None);
    assert_eq!(result.original_price(), None);
    assert_eq!(result.converted_price(), None);
    assert_eq!(result.product_id(), ProductId::new(1));
    assert_eq!(result.quantity(), 1);
    assert!(receipt.bonus.is_none());
    assert_eq!(h.store.sale_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_exchange_failure_serves_cached_rate() {
    let h = TestHarness::new();
    let pair = CurrencyPair::new("USD", "EUR");
    let cached = Decimal::new(118, 2);
    h.exchange.set_rate(pair.clone(), cached);

    let first = h.engine.submit(TestHarness::laptop(1)).await.result;
    assert_eq!(first.converted_price(), Some(laptop_price() * cached));

    h.exchange.set_fail_on_fetch(true);
    let second = h.engine.submit(TestHarness::laptop(1)).await.result;

    assert_eq!(second.status(), PurchaseStatus::Completed);
    assert_eq!(
        second.converted_price(),
        Some(second.original_price().unwrap() * cached)
    );
    assert_eq!(h.engine.rate_cache(&pair).unwrap().value(), cached);
}

#[tokio::test(start_paused = true)]
async fn test_exchange_failure_without_cache_uses_identity_rate() {
    let h = TestHarness::new();
    h.exchange.set_fail_on_fetch(true);

    let result = h.engine.submit(TestHarness::laptop(1)).await.result;

    assert_eq!(result.status(), PurchaseStatus::Completed);
    assert_eq!(result.converted_price(), result.original_price());
}

fn strict_sale_config() -> EngineConfig {
    EngineConfig {
        sale_fallback_on_rejection: false,
        ..EngineConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_insufficient_stock_fabricates_order_by_default() {
    let h = TestHarness::new();

    let request = PurchaseRequest::new(UserId::new(1), ProductId::new(1), 11, "USD");
    let receipt = h.engine.submit(request).await;
    let result = receipt.result;

    assert_eq!(result.status(), PurchaseStatus::Completed);
    assert!(result.order_id().is_some());
    assert_eq!(result.quantity(), 11);
    assert_eq!(h.store.stock(ProductId::new(1)), Some(10));
    assert_eq!(h.store.sale_count(), 0);
    assert!(receipt.bonus.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_insufficient_stock_fails_purchase_when_rejections_are_final() {
    let h = TestHarness::with_config(strict_sale_config());

    let request = PurchaseRequest::new(UserId::new(1), ProductId::new(1), 11, "USD");
    let receipt = h.engine.submit(request).await;
    let result = receipt.result;

    assert_eq!(result.status(), PurchaseStatus::Failed);
    assert_eq!(result.order_id(), None);
    assert_eq!(result.quantity(), 11);
    assert!(result.failure_reason().unwrap().contains("Insufficient stock"));
    assert_eq!(h.store.stock(ProductId::new(1)), Some(10));
    assert!(receipt.bonus.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_product_completes_on_fallbacks_by_default() {
    let h = TestHarness::new();

    let request = PurchaseRequest::new(UserId::new(1), ProductId::new(42), 1, "USD");
    let result = h.engine.submit(request).await.result;

    // Both the lookup and the sale fall back.
    assert_eq!(result.status(), PurchaseStatus::Completed);
    assert_eq!(result.original_price(), Some(Decimal::new(999999, 2)));
    assert!(result.order_id().is_some());
    assert_eq!(h.store.sale_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_product_fails_at_sale_when_rejections_are_final() {
    let h = TestHarness::with_config(strict_sale_config());

    let request = PurchaseRequest::new(UserId::new(1), ProductId::new(42), 1, "USD");
    let result = h.engine.submit(request).await.result;

    // The lookup falls back, but the ledger rejects the unknown product.
    assert_eq!(result.status(), PurchaseStatus::Failed);
    assert_eq!(result.order_id(), None);
    assert_eq!(h.store.sale_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_sale_outage_fabricates_order_when_best_effort() {
    let store = InMemoryStore::with_sample_products().with_sale_faults(
        Arc::new(ScriptedFaults::new([FaultDecision::Degrade])),
        Duration::from_secs(5),
    );
    let h = TestHarness::build(store, InMemoryLoyaltyLedger::new(), EngineConfig::default());

    let first = h.engine.submit(TestHarness::laptop(1)).await.result;
    let second = h.engine.submit(TestHarness::laptop(1)).await.result;

    assert_eq!(first.status(), PurchaseStatus::Completed);
    assert_eq!(second.status(), PurchaseStatus::Completed);
    assert!(first.order_id().is_some());
    assert_ne!(first.order_id(), second.order_id());
    assert_eq!(h.store.sale_count(), 0);

    tokio::time::sleep(Duration::from_secs(5)).await;
    let recovered = h.engine.submit(TestHarness::laptop(1)).await.result;
    assert_eq!(recovered.order_id(), Some(OrderId::new(1)));
    assert_eq!(h.store.sale_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sale_outage_fails_purchase_when_critical() {
    let store = InMemoryStore::with_sample_products().with_sale_faults(
        Arc::new(ScriptedFaults::new([FaultDecision::Fail])),
        Duration::from_secs(5),
    );
    let config = EngineConfig {
        sale_criticality: Criticality::Critical,
        ..EngineConfig::default()
    };
    let h = TestHarness::build(store, InMemoryLoyaltyLedger::new(), config);

    let receipt = h.engine.submit(TestHarness::laptop(1)).await;

    assert_eq!(receipt.result.status(), PurchaseStatus::Failed);
    assert_eq!(receipt.result.order_id(), None);
    assert!(receipt.bonus.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_invalid_request_calls_nothing() {
    let h = TestHarness::new();

    let zero = PurchaseRequest::new(UserId::new(1), ProductId::new(1), 0, "EUR");
    let bad_currency = PurchaseRequest::new(UserId::new(1), ProductId::new(1), 1, "EURO");

    for request in [zero, bad_currency] {
        let result = h.engine.submit(request).await.result;
        assert_eq!(result.status(), PurchaseStatus::Failed);
        assert_eq!(result.order_id(), None);
    }
    assert_eq!(h.exchange.fetch_count(), 0);
    assert_eq!(h.store.sale_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_bonus_is_deferred_and_replayed_once() {
    let h = TestHarness::new();
    let user = UserId::new(7);
    h.loyalty.set_response_delay(Duration::from_secs(2));

    let receipt = h.engine.submit(TestHarness::laptop(7)).await;
    assert_eq!(receipt.result.status(), PurchaseStatus::Completed);
    assert_eq!(h.engine.user_points(user).pending_points, 999);
    assert_eq!(h.engine.user_points(user).total_points, 0);

    let outcome = receipt.bonus.unwrap().outcome().await.unwrap();
    assert_eq!(outcome, BonusOutcome::Deferred(DeferReason::Timeout));
    assert!(h.engine.degrade_controller().is_degraded());
    assert_eq!(h.engine.deferred_queue().len(), 1);

    // The abandoned call still lands, but does not confirm the bonus.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.loyalty.award_count(), 1);
    assert_eq!(h.engine.user_points(user).pending_points, 999);

    let dispatcher = h.engine.bonus_dispatcher();
    assert_eq!(dispatcher.flush().await, None);

    h.loyalty.set_response_delay(Duration::ZERO);
    tokio::time::sleep(Duration::from_secs(30)).await;
    let report = dispatcher.flush().await.unwrap();

    assert_eq!(
        report,
        DrainReport {
            succeeded: 1,
            remaining: 0
        }
    );
    let points = h.engine.user_points(user);
    assert_eq!((points.total_points, points.pending_points), (999, 0));
    assert_eq!(h.loyalty.confirmed_points(user), 999);
    assert_eq!(h.loyalty.duplicate_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_degraded_bonus_is_delayed_then_queued() {
    let h = TestHarness::new();
    h.engine
        .degrade_controller()
        .activate(Duration::from_secs(30));

    let started = tokio::time::Instant::now();
    let receipt = h.engine.submit(TestHarness::laptop(1)).await;
    assert_eq!(receipt.result.status(), PurchaseStatus::Completed);

    let outcome = receipt.bonus.unwrap().outcome().await.unwrap();

    assert_eq!(outcome, BonusOutcome::Deferred(DeferReason::Degraded));
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(h.loyalty.award_count(), 0);
    assert_eq!(h.engine.deferred_queue().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_injected_degrade_opens_window() {
    let h = TestHarness::new();
    let faults: Arc<dyn FaultInjector> = Arc::new(ScriptedFaults::new([FaultDecision::Degrade]));
    let engine = OrchestrationEngine::new(
        h.store.clone(),
        h.exchange.clone(),
        h.store.clone(),
        h.loyalty.clone(),
        EngineConfig::default(),
    )
    .with_bonus_faults(faults);

    let receipt = engine.submit(TestHarness::laptop(1)).await;
    let outcome = receipt.bonus.unwrap().outcome().await.unwrap();

    assert_eq!(outcome, BonusOutcome::Deferred(DeferReason::Degraded));
    let window = engine.degrade_controller().window().unwrap();
    assert_eq!(window.duration(), Duration::from_secs(30));
    assert!(engine.health().degraded);
    assert_eq!(engine.health().pending_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn test_drain_stops_at_first_failed_replay() {
    let faults = Arc::new(ScriptedFaults::default());
    let loyalty = InMemoryLoyaltyLedger::new().with_faults(faults.clone());
    let h = TestHarness::build(
        InMemoryStore::with_sample_products(),
        loyalty,
        EngineConfig::default(),
    );
    let controller = h.engine.degrade_controller();
    controller.activate(Duration::from_secs(30));

    for user in 1..=3 {
        let receipt = h.engine.submit(TestHarness::laptop(user)).await;
        receipt.bonus.unwrap().outcome().await.unwrap();
    }
    assert_eq!(h.engine.deferred_queue().len(), 3);

    tokio::time::sleep(Duration::from_secs(30)).await;
    faults.push(FaultDecision::Proceed);
    faults.push(FaultDecision::Fail);

    let report = h.engine.bonus_dispatcher().flush().await.unwrap();

    assert_eq!(
        report,
        DrainReport {
            succeeded: 1,
            remaining: 2
        }
    );
    let queued: Vec<OrderId> = h
        .engine
        .deferred_queue()
        .snapshot()
        .iter()
        .map(|request| request.order_id)
        .collect();
    assert_eq!(queued, vec![OrderId::new(2), OrderId::new(3)]);
    assert!(controller.is_degraded());
    assert_eq!(h.engine.user_points(UserId::new(1)).total_points, 999);
    assert_eq!(h.engine.user_points(UserId::new(2)).pending_points, 999);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_activations_share_one_window() {
    let h = TestHarness::new();
    let faults: Arc<dyn FaultInjector> = Arc::new(ScriptedFaults::new([
        FaultDecision::Degrade,
        FaultDecision::Degrade,
    ]));
    let engine = OrchestrationEngine::new(
        h.store.clone(),
        h.exchange.clone(),
        h.store.clone(),
        h.loyalty.clone(),
        EngineConfig::default(),
    )
    .with_bonus_faults(faults);

    let (a, b) = tokio::join!(
        engine.submit(TestHarness::laptop(1)),
        engine.submit(TestHarness::laptop(1))
    );
    let started = tokio::time::Instant::now();
    let (a, b) = tokio::join!(
        a.bonus.unwrap().outcome(),
        b.bonus.unwrap().outcome()
    );
    assert_eq!(a.unwrap(), BonusOutcome::Deferred(DeferReason::Degraded));
    assert_eq!(b.unwrap(), BonusOutcome::Deferred(DeferReason::Degraded));

    let window = engine.degrade_controller().window().unwrap();
    assert_eq!(window.duration(), Duration::from_secs(30));
    assert!(window.until <= started + Duration::from_secs(30));
    assert_eq!(engine.deferred_queue().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_loop_replays_after_window() {
    let h = TestHarness::new();
    let faults: Arc<dyn FaultInjector> = Arc::new(ScriptedFaults::new([FaultDecision::Fail]));
    let engine = OrchestrationEngine::new(
        h.store.clone(),
        h.exchange.clone(),
        h.store.clone(),
        h.loyalty.clone(),
        EngineConfig::default(),
    )
    .with_bonus_faults(faults);
    let user = UserId::new(1);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let recovery = spawn_recovery_loop(
        engine.bonus_dispatcher().clone(),
        engine.config().drain_interval,
        shutdown_rx,
    );

    let receipt = engine.submit(TestHarness::laptop(1)).await;
    let outcome = receipt.bonus.unwrap().outcome().await.unwrap();
    assert!(matches!(
        outcome,
        BonusOutcome::Deferred(DeferReason::Failed(_))
    ));
    assert_eq!(engine.user_points(user).pending_points, 999);

    tokio::time::sleep(Duration::from_secs(36)).await;

    let points = engine.user_points(user);
    assert_eq!((points.total_points, points.pending_points), (999, 0));
    assert!(engine.deferred_queue().is_empty());
    assert!(!engine.health().degraded);

    shutdown_tx.send(true).unwrap();
    recovery.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_status_and_order_id_always_agree() {
    let h = TestHarness::with_config(EngineConfig {
        sale_criticality: Criticality::Critical,
        ..EngineConfig::default()
    });
    let requests = [
        PurchaseRequest::new(UserId::new(1), ProductId::new(1), 1, "EUR"),
        PurchaseRequest::new(UserId::new(1), ProductId::new(2), 3, "BRL"),
        PurchaseRequest::new(UserId::new(2), ProductId::new(3), 100, "USD"),
        PurchaseRequest::new(UserId::new(2), ProductId::new(9), 1, "GBP"),
        PurchaseRequest::new(UserId::new(3), ProductId::new(1), 0, "EUR"),
        PurchaseRequest::new(UserId::new(3), ProductId::new(2), 1, "??"),
    ];

    let mut completed = 0;
    for request in requests {
        let result = h.engine.submit(request).await.result;
        match result.status() {
            PurchaseStatus::Completed => {
                completed += 1;
                assert!(result.order_id().is_some());
                assert!(result.original_price().is_some());
                assert!(result.converted_price().is_some());
            }
            PurchaseStatus::Failed => {
                assert_eq!(result.order_id(), None);
                assert_eq!(result.bonus_points(), 0);
            }
        }
    }
    assert_eq!(completed, 2);
}

#[tokio::test(start_paused = true)]
async fn test_health_snapshot() {
    let h = TestHarness::new();
    h.engine.submit(TestHarness::laptop(1)).await;
    h.engine
        .submit(PurchaseRequest::new(UserId::new(1), ProductId::new(1), 1, "GBP"))
        .await;

    let health = h.engine.health();
    assert!(!health.degraded);
    assert_eq!(health.pending_requests, 0);
    assert_eq!(health.cached_rate_pairs, 2);
}
