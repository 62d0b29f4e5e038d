//! Bonus award step: live dispatch, deferral and replay.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{OrderId, UserId};
use parking_lot::Mutex;
use resilience::{
    CallContext, DeferredRequestQueue, DegradeModeController, DrainReport, FaultDecision,
    FaultInjector, NoFaults, QueueError, ServiceError,
};
use services::{BONUS_AWARD, LoyaltyLedger};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::model::{PendingBonusRequest, UserPoints};
use crate::steps;

/// Whether a computed bonus has reached the loyalty ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BonusStatus {
    Pending,
    Confirmed,
}

#[derive(Debug, Clone, Copy)]
struct BonusEntry {
    points: u64,
    status: BonusStatus,
}

/// Engine-side record of every computed bonus.
///
/// An entry is created `Pending` when the award is dispatched and moves to
/// `Confirmed` once, either by the in-time live call or by a replay.
#[derive(Debug, Default)]
pub struct BonusBook {
    entries: Mutex<HashMap<(UserId, OrderId), BonusEntry>>,
}

impl BonusBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a bonus as pending. An existing entry is left untouched.
    pub fn record_pending(&self, user_id: UserId, order_id: OrderId, points: u64) {
        self.entries
            .lock()
            .entry((user_id, order_id))
            .or_insert(BonusEntry {
                points,
                status: BonusStatus::Pending,
            });
    }

    /// Marks a pending bonus as confirmed.
    ///
    /// Returns true only for the call that performed the transition.
    pub fn confirm(&self, user_id: UserId, order_id: OrderId) -> bool {
        let mut entries = self.entries.lock();
        match entries.get_mut(&(user_id, order_id)) {
            Some(entry) if entry.status == BonusStatus::Pending => {
                entry.status = BonusStatus::Confirmed;
                true
            }
            _ => false,
        }
    }

    pub fn status(&self, user_id: UserId, order_id: OrderId) -> Option<BonusStatus> {
        self.entries
            .lock()
            .get(&(user_id, order_id))
            .map(|entry| entry.status)
    }

    /// Sums confirmed and pending points of a user.
    pub fn user_points(&self, user_id: UserId) -> UserPoints {
        let entries = self.entries.lock();
        let mut points = UserPoints {
            user_id,
            total_points: 0,
            pending_points: 0,
        };
        for ((owner, _), entry) in entries.iter() {
            if *owner != user_id {
                continue;
            }
            match entry.status {
                BonusStatus::Confirmed => points.total_points += entry.points,
                BonusStatus::Pending => points.pending_points += entry.points,
            }
        }
        points
    }
}

/// Why an award went to the deferred queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferReason {
    /// Degrade mode was active when the award was attempted.
    Degraded,
    /// The ledger did not answer within the bonus timeout.
    Timeout,
    /// The ledger call failed, or the fault strategy failed it.
    Failed(ServiceError),
}

impl std::fmt::Display for DeferReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeferReason::Degraded => f.write_str("degraded"),
            DeferReason::Timeout => f.write_str("timeout"),
            DeferReason::Failed(err) => write!(f, "failed: {err}"),
        }
    }
}

/// Final state of one dispatched award.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BonusOutcome {
    /// The ledger confirmed the award in time.
    Awarded,
    /// The award is queued for replay.
    Deferred(DeferReason),
}

/// Handle to a dispatched award.
///
/// Dropping it detaches the award; it still runs to completion.
#[derive(Debug)]
pub struct BonusHandle {
    task: JoinHandle<BonusOutcome>,
}

impl BonusHandle {
    /// Waits for the award to be confirmed or deferred.
    pub async fn outcome(self) -> Result<BonusOutcome, JoinError> {
        self.task.await
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Awards loyalty points off the purchase path.
///
/// Awards that time out, fail, or meet an active degrade window are queued
/// and replayed by [`BonusDispatcher::flush`] once the window has elapsed.
pub struct BonusDispatcher<L> {
    ledger: Arc<L>,
    book: Arc<BonusBook>,
    queue: Arc<DeferredRequestQueue<PendingBonusRequest>>,
    controller: Arc<DegradeModeController>,
    faults: Arc<dyn FaultInjector>,
    timeout: Duration,
    degrade_window: Duration,
    degraded_delay: Duration,
}

impl<L> Clone for BonusDispatcher<L> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            book: Arc::clone(&self.book),
            queue: Arc::clone(&self.queue),
            controller: Arc::clone(&self.controller),
            faults: Arc::clone(&self.faults),
            timeout: self.timeout,
            degrade_window: self.degrade_window,
            degraded_delay: self.degraded_delay,
        }
    }
}

impl<L: LoyaltyLedger + 'static> BonusDispatcher<L> {
    /// Creates a dispatcher with its own book and queue.
    pub fn new(
        ledger: Arc<L>,
        controller: Arc<DegradeModeController>,
        config: &EngineConfig,
    ) -> Self {
        let queue = Arc::new(DeferredRequestQueue::new(
            Arc::clone(&controller),
            config.degrade_window,
        ));
        Self {
            ledger,
            book: Arc::new(BonusBook::new()),
            queue,
            controller,
            faults: Arc::new(NoFaults),
            timeout: config.bonus_timeout,
            degrade_window: config.degrade_window,
            degraded_delay: config.degraded_delay,
        }
    }

    /// Replaces the strategy evaluated once per live award.
    pub fn with_faults(mut self, faults: Arc<dyn FaultInjector>) -> Self {
        self.faults = faults;
        self
    }

    pub fn book(&self) -> &Arc<BonusBook> {
        &self.book
    }

    pub fn queue(&self) -> &Arc<DeferredRequestQueue<PendingBonusRequest>> {
        &self.queue
    }

    pub fn controller(&self) -> &Arc<DegradeModeController> {
        &self.controller
    }

    /// Records the bonus as pending and starts the award on its own task.
    pub fn dispatch(&self, user_id: UserId, order_id: OrderId, points: u64) -> BonusHandle {
        self.book.record_pending(user_id, order_id, points);
        let request = PendingBonusRequest::new(user_id, order_id, points);
        let this = self.clone();
        BonusHandle {
            task: tokio::spawn(async move { this.award(request).await }),
        }
    }

    async fn award(&self, request: PendingBonusRequest) -> BonusOutcome {
        let decision = self.faults.decide(&CallContext::new(BONUS_AWARD));
        if decision == FaultDecision::Degrade {
            self.controller.activate(self.degrade_window);
        }

        if self.controller.is_degraded() {
            tokio::time::sleep(self.degraded_delay).await;
            return self.defer(request, DeferReason::Degraded);
        }

        if decision == FaultDecision::Fail {
            self.controller.activate(self.degrade_window);
            let err = ServiceError::unavailable(BONUS_AWARD, "simulated failure");
            return self.defer(request, DeferReason::Failed(err));
        }

        let delay = match decision {
            FaultDecision::Delay(delay) => delay,
            _ => Duration::ZERO,
        };
        let ledger = Arc::clone(&self.ledger);
        let PendingBonusRequest {
            user_id,
            order_id,
            bonus_value,
            ..
        } = request;
        // Detached so that a timeout stops the wait, not the call.
        let call = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let result = ledger.award(user_id, order_id, bonus_value).await;
            debug!(%user_id, %order_id, ok = result.is_ok(), "loyalty call returned");
            result
        });

        let reason = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(Ok(_ack))) => {
                self.book.confirm(user_id, order_id);
                info!(
                    step = steps::STEP_AWARD_BONUS,
                    %user_id,
                    %order_id,
                    points = bonus_value,
                    "bonus awarded"
                );
                return BonusOutcome::Awarded;
            }
            Ok(Ok(Err(err))) => DeferReason::Failed(err),
            Ok(Err(join_err)) => {
                DeferReason::Failed(ServiceError::unavailable(BONUS_AWARD, join_err.to_string()))
            }
            Err(_elapsed) => DeferReason::Timeout,
        };
        self.controller.activate(self.degrade_window);
        self.defer(request, reason)
    }

    fn defer(&self, mut request: PendingBonusRequest, reason: DeferReason) -> BonusOutcome {
        request.enqueued_at = Utc::now();
        let user_id = request.user_id;
        let order_id = request.order_id;
        let depth = self.queue.enqueue(request);
        warn!(
            step = steps::STEP_AWARD_BONUS,
            %user_id,
            %order_id,
            %reason,
            depth,
            "bonus deferred"
        );
        BonusOutcome::Deferred(reason)
    }

    /// Replays one deferred award. Already confirmed awards are skipped.
    pub async fn replay(&self, request: PendingBonusRequest) -> Result<(), ServiceError> {
        let PendingBonusRequest {
            user_id,
            order_id,
            bonus_value,
            ..
        } = request;
        if self.book.status(user_id, order_id) == Some(BonusStatus::Confirmed) {
            return Ok(());
        }

        match tokio::time::timeout(
            self.timeout,
            self.ledger.award(user_id, order_id, bonus_value),
        )
        .await
        {
            Ok(Ok(ack)) => {
                self.book.confirm(user_id, order_id);
                debug!(%user_id, %order_id, duplicate = ack.duplicate, "bonus replayed");
                Ok(())
            }
            Ok(Err(err)) => Err(err),
            Err(_elapsed) => Err(ServiceError::DependencyTimeout {
                dependency: BONUS_AWARD.to_string(),
                timeout: self.timeout,
            }),
        }
    }

    /// Drains the deferred queue if degrade mode is off and work is queued.
    ///
    /// Returns `None` when no drain ran.
    pub async fn flush(&self) -> Option<DrainReport> {
        if self.controller.is_degraded() || self.queue.is_empty() {
            return None;
        }
        match self.queue.drain(|request| self.replay(request)).await {
            Ok(report) => Some(report),
            Err(QueueError::DrainInProgress) => {
                debug!("drain already running");
                None
            }
        }
    }
}
