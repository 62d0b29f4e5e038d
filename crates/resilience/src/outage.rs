//! Self-inflicted outage windows for a single service instance.
//!
//! ```text
//! Serving ──fault──► Failing(until) ──next call at now >= until──► Serving
//! ```
//!
//! Unlike [`DegradeModeController`](crate::DegradeModeController) nothing is
//! queued or delayed: calls inside the window fail fast, and recovery is
//! lazy, noticed only by the first call after `until`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::degrade::deadline_after;
use crate::error::ServiceError;
use crate::fault::{CallContext, FaultDecision, FaultInjector};

/// Default length of an outage window.
pub const DEFAULT_OUTAGE: Duration = Duration::from_secs(5);

/// Simulator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutageState {
    #[default]
    Serving,
    Failing { until: Instant },
}

/// Guards one operation of a service with injected outages.
pub struct OutageSimulator {
    name: String,
    outage: Duration,
    faults: Arc<dyn FaultInjector>,
    state: Mutex<OutageState>,
}

impl std::fmt::Debug for OutageSimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutageSimulator")
            .field("name", &self.name)
            .field("outage", &self.outage)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl OutageSimulator {
    /// Creates a simulator for `name` whose outages last `outage`.
    pub fn new(name: impl Into<String>, outage: Duration, faults: Arc<dyn FaultInjector>) -> Self {
        Self {
            name: name.into(),
            outage,
            faults,
            state: Mutex::new(OutageState::Serving),
        }
    }

    /// Returns the current state without transitioning.
    pub fn state(&self) -> OutageState {
        *self.state.lock()
    }

    /// Admits or rejects one call.
    ///
    /// Inside an outage this fails with [`ServiceError::InErrorState`]. An
    /// injected `Fail` or `Degrade` from the serving state opens a new
    /// outage and fails this call too; `Delay` admits the call after
    /// sleeping.
    pub async fn guard(&self) -> Result<(), ServiceError> {
        let now = Instant::now();
        {
            let mut state = self.state.lock();
            if let OutageState::Failing { until } = *state {
                if now < until {
                    return Err(ServiceError::InErrorState {
                        dependency: self.name.clone(),
                        remaining: until - now,
                    });
                }
                *state = OutageState::Serving;
                info!(service = %self.name, "outage over, serving again");
            }
        }

        match self.faults.decide(&CallContext::new(&self.name)) {
            FaultDecision::Proceed => Ok(()),
            FaultDecision::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            FaultDecision::Fail | FaultDecision::Degrade => {
                let until = deadline_after(now, self.outage);
                *self.state.lock() = OutageState::Failing { until };
                warn!(
                    service = %self.name,
                    outage_secs = self.outage.as_secs_f64(),
                    "simulated outage started"
                );
                Err(ServiceError::InErrorState {
                    dependency: self.name.clone(),
                    remaining: self.outage,
                })
            }
        }
    }
}
