//! Resilience primitives for calling unreliable dependencies.
//!
//! The pieces compose into the purchase workflow but stand alone:
//! - [`CircuitBreaker`]: per-call deadline plus fallback, gated by [`Criticality`]
//! - [`RateCache`]: last-known-good value for data that may be served stale
//! - [`DegradeModeController`]: fixed-length, service-wide degrade window
//! - [`DeferredRequestQueue`]: FIFO of deferred side effects, replayed as a strict prefix
//! - [`OutageSimulator`]: fail-fast outage windows for one service instance
//! - [`FaultInjector`]: pluggable fault schedule behind every simulated failure

pub mod breaker;
pub mod degrade;
pub mod error;
pub mod fault;
pub mod outage;
pub mod queue;
pub mod rate_cache;

pub use breaker::{CircuitBreaker, Criticality, DependencyOutcome};
pub use degrade::{Activation, DegradeModeController, DegradeState, DegradeWindow, MAX_WINDOW};
pub use error::{QueueError, Result, ServiceError};
pub use fault::{CallContext, FaultDecision, FaultInjector, NoFaults, RandomFaults, ScriptedFaults};
pub use outage::{DEFAULT_OUTAGE, OutageSimulator, OutageState};
pub use queue::{DeferredRequestQueue, DrainReport};
pub use rate_cache::{RateCache, RateCacheEntry};
