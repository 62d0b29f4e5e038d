//! Fault-injection strategies.
//!
//! Every simulated failure in the services goes through a [`FaultInjector`],
//! evaluated once per call. Demos plug in [`RandomFaults`]; tests plug in
//! [`ScriptedFaults`] or a closure for a deterministic schedule.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;

/// What a guarded call should do this time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultDecision {
    /// Behave normally.
    #[default]
    Proceed,
    /// Fail the call.
    Fail,
    /// Enter degrade mode (or an outage) and fail the call.
    Degrade,
    /// Answer normally, but only after the given delay.
    Delay(Duration),
}

/// Describes the call a decision is requested for.
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    /// Name of the guarded dependency or operation.
    pub dependency: &'a str,
}

impl<'a> CallContext<'a> {
    /// Creates a context for the named dependency.
    pub fn new(dependency: &'a str) -> Self {
        Self { dependency }
    }
}

/// A predicate evaluated once per guarded call.
pub trait FaultInjector: Send + Sync {
    /// Decides how the call described by `call` should behave.
    fn decide(&self, call: &CallContext<'_>) -> FaultDecision;
}

impl<F> FaultInjector for F
where
    F: Fn(&CallContext<'_>) -> FaultDecision + Send + Sync,
{
    fn decide(&self, call: &CallContext<'_>) -> FaultDecision {
        self(call)
    }
}

/// Never injects a fault.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFaults;

impl FaultInjector for NoFaults {
    fn decide(&self, _call: &CallContext<'_>) -> FaultDecision {
        FaultDecision::Proceed
    }
}

/// Samples faults uniformly at random.
///
/// Probabilities are checked in order: degrade, fail, then delay. A delay
/// is drawn uniformly from `0..=max_delay`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomFaults {
    degrade_probability: f64,
    failure_probability: f64,
    delay_probability: f64,
    max_delay: Duration,
}

impl RandomFaults {
    /// Creates a strategy that never fires; use the builder methods to arm it.
    pub fn new() -> Self {
        Self::default()
    }

    /// Probability of a [`FaultDecision::Degrade`] per call.
    pub fn with_degrade_probability(mut self, probability: f64) -> Self {
        self.degrade_probability = probability_of(probability);
        self
    }

    /// Probability of a [`FaultDecision::Fail`] per call.
    pub fn with_failure_probability(mut self, probability: f64) -> Self {
        self.failure_probability = probability_of(probability);
        self
    }

    /// Probability and upper bound of a [`FaultDecision::Delay`] per call.
    pub fn with_delay(mut self, probability: f64, max_delay: Duration) -> Self {
        self.delay_probability = probability_of(probability);
        self.max_delay = max_delay;
        self
    }

    /// Multiplies every probability by `factor`, clamping to `[0, 1]`.
    pub fn scaled(self, factor: f64) -> Self {
        let factor = factor.max(0.0);
        Self {
            degrade_probability: probability_of(self.degrade_probability * factor),
            failure_probability: probability_of(self.failure_probability * factor),
            delay_probability: probability_of(self.delay_probability * factor),
            max_delay: self.max_delay,
        }
    }
}

/// Clamps to `[0, 1]`; NaN counts as never.
fn probability_of(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

impl FaultInjector for RandomFaults {
    fn decide(&self, _call: &CallContext<'_>) -> FaultDecision {
        let mut rng = rand::rng();
        if rng.random_bool(self.degrade_probability) {
            return FaultDecision::Degrade;
        }
        if rng.random_bool(self.failure_probability) {
            return FaultDecision::Fail;
        }
        if !self.max_delay.is_zero() && rng.random_bool(self.delay_probability) {
            let millis = self.max_delay.as_millis().min(u64::MAX as u128) as u64;
            return FaultDecision::Delay(Duration::from_millis(rng.random_range(0..=millis)));
        }
        FaultDecision::Proceed
    }
}

/// Replays a fixed schedule of decisions, then proceeds forever.
#[derive(Debug, Default)]
pub struct ScriptedFaults {
    schedule: Mutex<VecDeque<FaultDecision>>,
}

impl ScriptedFaults {
    /// Creates a schedule from the given decisions, consumed front to back.
    pub fn new(decisions: impl IntoIterator<Item = FaultDecision>) -> Self {
        Self {
            schedule: Mutex::new(decisions.into_iter().collect()),
        }
    }

    /// Appends a decision to the end of the schedule.
    pub fn push(&self, decision: FaultDecision) {
        self.schedule.lock().push_back(decision);
    }

    /// Returns the number of decisions not yet consumed.
    pub fn remaining(&self) -> usize {
        self.schedule.lock().len()
    }
}

impl FaultInjector for ScriptedFaults {
    fn decide(&self, _call: &CallContext<'_>) -> FaultDecision {
        self.schedule.lock().pop_front().unwrap_or_default()
    }
}
