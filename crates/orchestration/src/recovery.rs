//! Background loop that replays deferred bonus awards.

use std::time::Duration;

use services::LoyaltyLedger;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::bonus::BonusDispatcher;

/// Shortest period the loop runs at.
pub const MIN_DRAIN_INTERVAL: Duration = Duration::from_millis(10);

/// Spawns the loop that drains deferred awards once degrade mode clears.
///
/// The loop wakes every `interval`, and early when the controller reports
/// a window elapsing. It is the only caller of [`BonusDispatcher::flush`]
/// in a running service. It exits when `shutdown` turns true or its sender
/// is dropped. Periods below [`MIN_DRAIN_INTERVAL`] are raised to it.
pub fn spawn_recovery_loop<L: LoyaltyLedger + 'static>(
    dispatcher: BonusDispatcher<L>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    if interval < MIN_DRAIN_INTERVAL {
        tracing::warn!(?interval, min = ?MIN_DRAIN_INTERVAL, "drain interval raised to minimum");
    }
    let interval = interval.max(MIN_DRAIN_INTERVAL);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let controller = dispatcher.controller().clone();

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = controller.recovered() => {
                    tracing::debug!("recovery notice received");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            tick(&dispatcher).await;
        }
        tracing::info!("recovery loop stopped");
    })
}

#[tracing::instrument(skip_all)]
async fn tick<L: LoyaltyLedger + 'static>(dispatcher: &BonusDispatcher<L>) {
    if let Some(report) = dispatcher.flush().await {
        tracing::info!(
            succeeded = report.succeeded,
            remaining = report.remaining,
            "recovery drain finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use common::{OrderId, UserId};
    use resilience::DegradeModeController;
    use services::InMemoryLoyaltyLedger;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_still_drains() {
        let ledger = InMemoryLoyaltyLedger::new();
        let controller = Arc::new(DegradeModeController::new());
        let dispatcher = BonusDispatcher::new(
            Arc::new(ledger.clone()),
            Arc::clone(&controller),
            &EngineConfig::default(),
        );
        let (tx, rx) = watch::channel(false);
        let handle = spawn_recovery_loop(dispatcher.clone(), Duration::ZERO, rx);

        controller.activate(Duration::from_secs(1));
        dispatcher
            .dispatch(UserId::new(1), OrderId::new(1), 3)
            .outcome()
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(ledger.confirmed_points(UserId::new(1)), 3);
        assert!(!handle.is_finished());

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_drains_after_window_and_stops_on_shutdown() {
        let ledger = InMemoryLoyaltyLedger::new();
        let controller = Arc::new(DegradeModeController::new());
        let dispatcher = BonusDispatcher::new(
            Arc::new(ledger.clone()),
            Arc::clone(&controller),
            &EngineConfig::default(),
        );
        let (tx, rx) = watch::channel(false);
        let handle = spawn_recovery_loop(dispatcher.clone(), Duration::from_secs(5), rx);

        controller.activate(Duration::from_secs(30));
        dispatcher
            .dispatch(UserId::new(1), OrderId::new(1), 7)
            .outcome()
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(ledger.award_count(), 0);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(ledger.confirmed_points(UserId::new(1)), 7);
        assert!(dispatcher.queue().is_empty());

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
