//! Dependency error taxonomy.

use std::time::Duration;

use thiserror::Error;

/// Errors a dependency call can end with.
///
/// Capability implementations return these directly. The resilience
/// primitives produce `DependencyTimeout`, `Degraded` and `InErrorState`
/// themselves.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The requested entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Not enough stock to fulfil the requested quantity.
    #[error("Insufficient stock for product {product}: requested {requested}, available {available}")]
    InsufficientStock {
        product: String,
        requested: u32,
        available: u32,
    },

    /// The dependency answered with an error or could not be reached.
    #[error("Dependency '{dependency}' unavailable: {reason}")]
    DependencyUnavailable { dependency: String, reason: String },

    /// The dependency did not answer within its deadline.
    #[error("Dependency '{dependency}' timed out after {}ms", .timeout.as_millis())]
    DependencyTimeout {
        dependency: String,
        timeout: Duration,
    },

    /// The service sheds this work while degrade mode is active.
    #[error("Service is in degraded mode")]
    Degraded,

    /// The request is malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The dependency is failing fast after a simulated outage.
    #[error("Dependency '{dependency}' is in error state for another {}ms", .remaining.as_millis())]
    InErrorState {
        dependency: String,
        remaining: Duration,
    },
}

impl ServiceError {
    /// Convenience constructor for [`ServiceError::DependencyUnavailable`].
    pub fn unavailable(dependency: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DependencyUnavailable {
            dependency: dependency.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for business rejections, as opposed to infrastructure faults.
    ///
    /// A rejection means the dependency answered and said no; retrying or
    /// substituting a fabricated value would misrepresent that answer.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::InsufficientStock { .. } | Self::InvalidRequest(_)
        )
    }
}

/// Errors raised by [`DeferredRequestQueue`](crate::DeferredRequestQueue).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Another drain of the same queue is running.
    #[error("A drain of this queue is already in progress")]
    DrainInProgress,
}

/// Convenience type alias for dependency call results.
pub type Result<T> = std::result::Result<T, ServiceError>;
