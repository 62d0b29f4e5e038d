//! Timeout-plus-fallback circuit breaker.
//!
//! Unlike a threshold breaker this variant keeps no state between calls:
//! every call gets the full deadline and, on failure, one chance at its
//! fallback. Whether the fallback is consulted at all is decided by the
//! dependency's [`Criticality`].

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ServiceError;

/// How a failing dependency affects the operation that needs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Criticality {
    /// The primary error is final; no fallback is consulted.
    Critical,
    /// The fallback is consulted; only its failure is final.
    #[default]
    BestEffort,
}

impl Criticality {
    /// Returns the configuration spelling of the value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Criticality::Critical => "critical",
            Criticality::BestEffort => "best-effort",
        }
    }
}

impl std::fmt::Display for Criticality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Criticality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Criticality::Critical),
            "best-effort" | "best_effort" | "besteffort" => Ok(Criticality::BestEffort),
            other => Err(format!(
                "unknown criticality '{other}', expected 'critical' or 'best-effort'"
            )),
        }
    }
}

/// Result of a guarded dependency call.
#[derive(Debug, Clone, PartialEq)]
pub enum DependencyOutcome<T> {
    /// The dependency answered in time.
    Success(T),
    /// The dependency failed and the fallback produced a stand-in.
    Fallback { value: T, cause: ServiceError },
    /// No usable value could be produced.
    Failure(ServiceError),
}

impl<T> DependencyOutcome<T> {
    /// Returns true if the value came from the fallback.
    pub fn is_fallback(&self) -> bool {
        matches!(self, DependencyOutcome::Fallback { .. })
    }

    /// Returns the produced value, live or substituted.
    pub fn value(&self) -> Option<&T> {
        match self {
            DependencyOutcome::Success(value) | DependencyOutcome::Fallback { value, .. } => {
                Some(value)
            }
            DependencyOutcome::Failure(_) => None,
        }
    }

    /// Converts into a `Result`, treating a fallback value as usable.
    pub fn into_result(self) -> Result<T, ServiceError> {
        match self {
            DependencyOutcome::Success(value) | DependencyOutcome::Fallback { value, .. } => {
                Ok(value)
            }
            DependencyOutcome::Failure(err) => Err(err),
        }
    }
}

/// Guards calls to one named dependency with a deadline and an optional fallback.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    dependency: String,
    timeout: Duration,
    criticality: Criticality,
}

impl CircuitBreaker {
    /// Creates a breaker for `dependency`.
    pub fn new(dependency: impl Into<String>, timeout: Duration, criticality: Criticality) -> Self {
        Self {
            dependency: dependency.into(),
            timeout,
            criticality,
        }
    }

    /// Returns the guarded dependency name.
    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    /// Returns the per-call deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the configured criticality.
    pub fn criticality(&self) -> Criticality {
        self.criticality
    }

    /// Runs `operation` under the deadline, without a fallback.
    pub async fn call<T, Op, Fut>(&self, operation: Op) -> DependencyOutcome<T>
    where
        Op: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        match self.attempt(operation).await {
            Ok(value) => DependencyOutcome::Success(value),
            Err(err) => DependencyOutcome::Failure(err),
        }
    }

    /// Runs `operation` under the deadline and, for a best-effort dependency,
    /// hands any error to `fallback`.
    ///
    /// The fallback may decline by returning an error, in which case that
    /// error becomes the outcome.
    pub async fn call_with_fallback<T, Op, Fut, Fb>(
        &self,
        operation: Op,
        fallback: Fb,
    ) -> DependencyOutcome<T>
    where
        Op: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
        Fb: FnOnce(&ServiceError) -> Result<T, ServiceError>,
    {
        let cause = match self.attempt(operation).await {
            Ok(value) => return DependencyOutcome::Success(value),
            Err(err) => err,
        };

        if self.criticality == Criticality::Critical {
            warn!(
                dependency = %self.dependency,
                error = %cause,
                "critical dependency failed, fallback skipped"
            );
            return DependencyOutcome::Failure(cause);
        }

        match fallback(&cause) {
            Ok(value) => {
                warn!(dependency = %self.dependency, error = %cause, "falling back");
                DependencyOutcome::Fallback { value, cause }
            }
            Err(fallback_err) => {
                warn!(
                    dependency = %self.dependency,
                    error = %cause,
                    fallback_error = %fallback_err,
                    "fallback declined"
                );
                DependencyOutcome::Failure(fallback_err)
            }
        }
    }

    async fn attempt<T, Op, Fut>(&self, operation: Op) -> Result<T, ServiceError>
    where
        Op: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        match tokio::time::timeout(self.timeout, operation()).await {
            Ok(Ok(value)) => {
                debug!(dependency = %self.dependency, "dependency call succeeded");
                Ok(value)
            }
            Ok(Err(err)) => Err(err),
            Err(_elapsed) => Err(ServiceError::DependencyTimeout {
                dependency: self.dependency.clone(),
                timeout: self.timeout,
            }),
        }
    }
}
