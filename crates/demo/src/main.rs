//! Demo entry point: a stream of purchases against flaky services.

use common::UserId;
use demo::Config;
use futures_util::future::join_all;
use orchestration::spawn_recovery_loop;
use tokio::signal;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Purchases submitted concurrently per tick.
const BATCH_SIZE: usize = 3;

/// Number of simulated buyers.
const USERS: u64 = 5;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    // 1. Load configuration
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(2);
        }
    };

    // 2. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 3. Wire services and engine
    let (engine, services) = demo::build(&config);
    tracing::info!(
        product_criticality = %config.engine.product_criticality,
        sale_criticality = %config.engine.sale_criticality,
        fault_rate_scale = config.fault_rate_scale,
        "demo starting"
    );

    // 4. Start the recovery loop
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let recovery = spawn_recovery_loop(
        engine.bonus_dispatcher().clone(),
        config.engine.drain_interval,
        shutdown_rx,
    );

    // 5. Submit purchases until a shutdown signal arrives
    let mut rng = rand::rng();
    let mut ticker = tokio::time::interval(config.purchase_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            _ = ticker.tick() => {
                let batch: Vec<_> = (0..BATCH_SIZE)
                    .map(|_| demo::random_request(&mut rng, USERS))
                    .collect();
                let receipts = join_all(batch.into_iter().map(|request| engine.submit(request))).await;
                let completed = receipts.iter().filter(|r| r.result.is_completed()).count();

                let health = engine.health();
                tracing::info!(
                    completed,
                    failed = receipts.len() - completed,
                    degraded = health.degraded,
                    pending_requests = health.pending_requests,
                    cached_rate_pairs = health.cached_rate_pairs,
                    "batch finished"
                );
            }
        }
    }

    // 6. Stop the recovery loop and report
    if shutdown_tx.send(true).is_err() {
        tracing::warn!("recovery loop already stopped");
    }
    if let Err(err) = recovery.await {
        tracing::error!(error = %err, "recovery loop panicked");
    }

    for user in 1..=USERS {
        let user_id = UserId::new(user);
        let points = engine.user_points(user_id);
        tracing::info!(
            %user_id,
            total_points = points.total_points,
            pending_points = points.pending_points,
            ledger_points = services.loyalty.confirmed_points(user_id),
            "final points"
        );
    }
    tracing::info!(
        sales = services.store.sale_count(),
        rate_fetches = services.exchange.fetch_count(),
        "demo shut down gracefully"
    );
}
