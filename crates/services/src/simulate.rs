//! Shared fault and latency simulation for the in-memory services.

use std::time::Duration;

use resilience::{CallContext, FaultDecision, FaultInjector, ServiceError};

/// Sleeps for `latency`, then applies one decision from `faults`.
///
/// `Fail` and `Degrade` both surface as an unavailable dependency; the
/// in-memory services have no degrade mode of their own.
pub(crate) async fn simulate_call(
    dependency: &str,
    latency: Duration,
    faults: &dyn FaultInjector,
) -> Result<(), ServiceError> {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
    match faults.decide(&CallContext::new(dependency)) {
        FaultDecision::Proceed => Ok(()),
        FaultDecision::Delay(delay) => {
            tokio::time::sleep(delay).await;
            Ok(())
        }
        FaultDecision::Fail | FaultDecision::Degrade => Err(ServiceError::unavailable(
            dependency,
            "simulated failure",
        )),
    }
}
