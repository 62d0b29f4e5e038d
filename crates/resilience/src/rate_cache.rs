//! Last-known-good cache for values that may be served stale.

use std::future::Future;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, warn};

/// The cached value and when it was last refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateCacheEntry {
    pub value: Decimal,
    /// `None` until the first successful refresh.
    pub last_updated_at: Option<DateTime<Utc>>,
}

/// Holds the last positive value observed from a live fetch.
///
/// Reads never fail: a failed or non-positive fetch leaves the entry as it
/// was and returns it. Before the first successful fetch the value is the
/// neutral rate `1`.
#[derive(Debug)]
pub struct RateCache {
    entry: Mutex<RateCacheEntry>,
}

impl Default for RateCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RateCache {
    /// Creates a cache holding the neutral rate.
    pub fn new() -> Self {
        Self {
            entry: Mutex::new(RateCacheEntry {
                value: Decimal::ONE,
                last_updated_at: None,
            }),
        }
    }

    /// Returns a copy of the current entry.
    pub fn current(&self) -> RateCacheEntry {
        *self.entry.lock()
    }

    /// Returns the current value.
    pub fn value(&self) -> Decimal {
        self.entry.lock().value
    }

    /// Calls `fetch` and returns its value if positive, caching it;
    /// otherwise returns the cached value unchanged.
    ///
    /// The lock is not held while `fetch` runs.
    pub async fn get_or_refresh<F, Fut, E>(&self, fetch: F) -> Decimal
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Decimal, E>>,
        E: std::fmt::Display,
    {
        match fetch().await {
            Ok(value) if value > Decimal::ZERO => {
                let mut entry = self.entry.lock();
                entry.value = value;
                entry.last_updated_at = Some(Utc::now());
                debug!(%value, "rate refreshed");
                value
            }
            Ok(value) => {
                let cached = self.value();
                warn!(%value, %cached, "ignoring non-positive rate, using cached value");
                cached
            }
            Err(err) => {
                let cached = self.value();
                warn!(error = %err, %cached, "rate fetch failed, using cached value");
                cached
            }
        }
    }
}
