//! FIFO holding area for side effects that could not run immediately.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::degrade::DegradeModeController;
use crate::error::QueueError;

/// Summary of one drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainReport {
    /// Items replayed successfully and removed.
    pub succeeded: usize,
    /// Items still queued when the pass ended.
    pub remaining: usize,
}

/// Unbounded, ordered store of deferred requests.
///
/// Drains replay a strict prefix: the first failing item stops the pass and
/// stays at the head, together with everything behind it, and degrade mode
/// is re-activated so replay resumes only after another window.
///
/// Only one drain runs at a time. The item under replay stays at the head
/// of the store until it succeeds, and the store lock is never held while
/// `replay` runs; concurrent enqueues only ever append behind it.
pub struct DeferredRequestQueue<T> {
    items: Mutex<VecDeque<T>>,
    draining: tokio::sync::Mutex<()>,
    controller: Arc<DegradeModeController>,
    reactivate_for: Duration,
}

impl<T: Clone> DeferredRequestQueue<T> {
    /// Creates an empty queue that re-activates `controller` for
    /// `reactivate_for` when a replay fails.
    pub fn new(controller: Arc<DegradeModeController>, reactivate_for: Duration) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            draining: tokio::sync::Mutex::new(()),
            controller,
            reactivate_for,
        }
    }

    /// Appends a request and returns the new queue length.
    pub fn enqueue(&self, request: T) -> usize {
        let mut items = self.items.lock();
        items.push_back(request);
        items.len()
    }

    /// Returns the number of queued requests.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Returns a copy of the queued requests in FIFO order.
    pub fn snapshot(&self) -> Vec<T> {
        self.items.lock().iter().cloned().collect()
    }

    /// Replays queued requests in FIFO order until one fails.
    ///
    /// Returns [`QueueError::DrainInProgress`] without touching the queue if
    /// another drain holds it.
    #[tracing::instrument(skip_all)]
    pub async fn drain<F, Fut, E>(&self, mut replay: F) -> Result<DrainReport, QueueError>
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: std::fmt::Display,
    {
        let _guard = self
            .draining
            .try_lock()
            .map_err(|_| QueueError::DrainInProgress)?;

        let mut report = DrainReport::default();
        loop {
            let head = self.items.lock().front().cloned();
            let Some(request) = head else {
                break;
            };

            match replay(request).await {
                Ok(()) => {
                    self.items.lock().pop_front();
                    report.succeeded += 1;
                }
                Err(err) => {
                    report.remaining = self.len();
                    warn!(
                        error = %err,
                        succeeded = report.succeeded,
                        remaining = report.remaining,
                        "replay failed, stopping drain"
                    );
                    self.controller.activate(self.reactivate_for);
                    return Ok(report);
                }
            }
        }

        report.remaining = self.len();
        if report.succeeded > 0 {
            info!(succeeded = report.succeeded, "deferred requests replayed");
        }
        Ok(report)
    }
}
