//! Loyalty ledger trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use parking_lot::RwLock;
use resilience::{FaultInjector, NoFaults, ServiceError};

use crate::simulate::simulate_call;

/// Dependency name of bonus awards.
pub const BONUS_AWARD: &str = "loyalty.award";

/// Acknowledgement of an award.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AwardAck {
    /// True if the (user, order) pair had already been awarded; nothing was
    /// recorded this time.
    pub duplicate: bool,
}

/// Records loyalty points.
///
/// Implementations must be idempotent per (user, order): a repeated award
/// for the same pair is acknowledged without recording anything.
#[async_trait]
pub trait LoyaltyLedger: Send + Sync {
    /// Awards `points` to `user_id` for `order_id`.
    ///
    /// `points` is recorded as given; no amount-to-points conversion happens here.
    async fn award(
        &self,
        user_id: UserId,
        order_id: OrderId,
        points: u64,
    ) -> Result<AwardAck, ServiceError>;
}

/// A recorded award.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BonusRecord {
    pub user_id: UserId,
    pub order_id: OrderId,
    pub points: u64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct InMemoryLoyaltyState {
    awards: HashMap<(UserId, OrderId), BonusRecord>,
    unavailable: bool,
    response_delay: Duration,
    duplicate_count: u64,
}

/// In-memory loyalty ledger for demos and tests.
#[derive(Clone)]
pub struct InMemoryLoyaltyLedger {
    state: Arc<RwLock<InMemoryLoyaltyState>>,
    faults: Arc<dyn FaultInjector>,
}

impl Default for InMemoryLoyaltyLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLoyaltyLedger {
    /// Creates an empty ledger without simulated faults.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(InMemoryLoyaltyState::default())),
            faults: Arc::new(NoFaults),
        }
    }

    /// Replaces the fault injector consulted on every award.
    pub fn with_faults(mut self, faults: Arc<dyn FaultInjector>) -> Self {
        self.faults = faults;
        self
    }

    /// Configures every award to fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.write().unavailable = unavailable;
    }

    /// Delays every award by `delay` before it is recorded.
    pub fn set_response_delay(&self, delay: Duration) {
        self.state.write().response_delay = delay;
    }

    /// Returns the sum of recorded points for a user.
    pub fn confirmed_points(&self, user_id: UserId) -> u64 {
        self.state
            .read()
            .awards
            .values()
            .filter(|record| record.user_id == user_id)
            .map(|record| record.points)
            .sum()
    }

    /// Returns the number of distinct recorded awards.
    pub fn award_count(&self) -> usize {
        self.state.read().awards.len()
    }

    /// Returns how many repeated awards were acknowledged without recording.
    pub fn duplicate_count(&self) -> u64 {
        self.state.read().duplicate_count
    }

    /// Returns the award recorded for a (user, order) pair.
    pub fn record(&self, user_id: UserId, order_id: OrderId) -> Option<BonusRecord> {
        self.state.read().awards.get(&(user_id, order_id)).copied()
    }
}

#[async_trait]
impl LoyaltyLedger for InMemoryLoyaltyLedger {
    async fn award(
        &self,
        user_id: UserId,
        order_id: OrderId,
        points: u64,
    ) -> Result<AwardAck, ServiceError> {
        let (delay, unavailable) = {
            let state = self.state.read();
            (state.response_delay, state.unavailable)
        };
        simulate_call(BONUS_AWARD, delay, self.faults.as_ref()).await?;
        if unavailable {
            return Err(ServiceError::unavailable(BONUS_AWARD, "loyalty ledger offline"));
        }

        let mut state = self.state.write();
        let key = (user_id, order_id);
        if state.awards.contains_key(&key) {
            state.duplicate_count += 1;
            tracing::debug!(%user_id, %order_id, "duplicate award ignored");
            return Ok(AwardAck { duplicate: true });
        }
        state.awards.insert(
            key,
            BonusRecord {
                user_id,
                order_id,
                points,
                recorded_at: Utc::now(),
            },
        );
        tracing::info!(%user_id, %order_id, points, "bonus points recorded");
        Ok(AwardAck { duplicate: false })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_award_records_points() {
        let ledger = InMemoryLoyaltyLedger::new();
        let user = UserId::new(1);

        let ack = ledger.award(user, OrderId::new(10), 999).await.unwrap();
        assert!(!ack.duplicate);
        ledger.award(user, OrderId::new(11), 1).await.unwrap();

        assert_eq!(ledger.confirmed_points(user), 1000);
        assert_eq!(ledger.confirmed_points(UserId::new(2)), 0);
        assert_eq!(ledger.award_count(), 2);
    }

    #[tokio::test]
    async fn test_repeated_award_is_idempotent() {
        let ledger = InMemoryLoyaltyLedger::new();
        let user = UserId::new(1);
        let order = OrderId::new(10);

        ledger.award(user, order, 50).await.unwrap();
        let ack = ledger.award(user, order, 50).await.unwrap();

        assert!(ack.duplicate);
        assert_eq!(ledger.confirmed_points(user), 50);
        assert_eq!(ledger.award_count(), 1);
        assert_eq!(ledger.duplicate_count(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_ledger_records_nothing() {
        let ledger = InMemoryLoyaltyLedger::new();
        ledger.set_unavailable(true);

        let result = ledger.award(UserId::new(1), OrderId::new(1), 5).await;
        assert!(matches!(
            result,
            Err(ServiceError::DependencyUnavailable { .. })
        ));
        assert_eq!(ledger.award_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_delay_postpones_recording() {
        let ledger = InMemoryLoyaltyLedger::new();
        ledger.set_response_delay(Duration::from_secs(2));

        let handle = {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.award(UserId::new(1), OrderId::new(1), 5).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ledger.award_count(), 0);

        handle.await.unwrap().unwrap();
        assert_eq!(ledger.award_count(), 1);
        assert!(ledger.record(UserId::new(1), OrderId::new(1)).is_some());
    }
}
