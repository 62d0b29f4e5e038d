//! Time-boxed, service-wide degrade mode.
//!
//! State transitions:
//! ```text
//! Normal ──activate──► Degraded(until) ──now >= until──► Normal (+ recovery notice)
//!                        │    ▲
//!                        └────┘ activate (extends, never shortens)
//! ```

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{info, warn};

/// Longest window a deadline is computed for; longer requests are capped.
pub const MAX_WINDOW: Duration = Duration::from_secs(30 * 365 * 86_400);

/// Returns `now + duration`, capped at [`MAX_WINDOW`] instead of overflowing.
pub(crate) fn deadline_after(now: Instant, duration: Duration) -> Instant {
    now + duration.min(MAX_WINDOW)
}

/// An active degrade window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DegradeWindow {
    /// When the window was first opened; extensions keep it.
    pub started_at: Instant,
    /// When the window closes.
    pub until: Instant,
}

impl DegradeWindow {
    /// Returns the total length of the window.
    pub fn duration(&self) -> Duration {
        self.until.saturating_duration_since(self.started_at)
    }

    /// Returns true while `now` is inside the window.
    pub fn is_open_at(&self, now: Instant) -> bool {
        now < self.until
    }
}

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DegradeState {
    #[default]
    Normal,
    Degraded(DegradeWindow),
}

/// What an [`DegradeModeController::activate`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// A new window was opened.
    Started(DegradeWindow),
    /// The active window was pushed later.
    Extended(DegradeWindow),
    /// The active window already reached at least as far.
    Unchanged(DegradeWindow),
}

impl Activation {
    /// Returns the window in force after the call.
    pub fn window(&self) -> DegradeWindow {
        match self {
            Activation::Started(w) | Activation::Extended(w) | Activation::Unchanged(w) => *w,
        }
    }
}

/// Tracks whether the service is currently degraded.
///
/// Every transition happens under one mutex, so concurrent activations
/// settle on the latest candidate deadline and exactly one caller observes
/// the window elapsing. That caller raises a recovery notice for whoever
/// drains deferred work (see [`DegradeModeController::recovered`]).
#[derive(Debug, Default)]
pub struct DegradeModeController {
    state: Mutex<DegradeState>,
    recovery: Notify,
}

impl DegradeModeController {
    /// Creates a controller in the normal state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true iff a window is open now.
    ///
    /// If the window has elapsed, transitions to normal and raises the
    /// recovery notice before returning false.
    pub fn is_degraded(&self) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();
        match *state {
            DegradeState::Degraded(window) if window.is_open_at(now) => true,
            DegradeState::Degraded(window) => {
                *state = DegradeState::Normal;
                drop(state);
                info!(
                    window_secs = window.duration().as_secs_f64(),
                    "degrade window elapsed, back to normal"
                );
                self.recovery.notify_one();
                false
            }
            DegradeState::Normal => false,
        }
    }

    /// Opens a window of `duration` from now, or extends the active one.
    ///
    /// An active window is never shortened and keeps its `started_at`.
    pub fn activate(&self, duration: Duration) -> Activation {
        let now = Instant::now();
        let candidate = deadline_after(now, duration);
        let mut state = self.state.lock();
        let activation = match *state {
            DegradeState::Degraded(window) if window.is_open_at(now) => {
                if candidate > window.until {
                    Activation::Extended(DegradeWindow {
                        started_at: window.started_at,
                        until: candidate,
                    })
                } else {
                    Activation::Unchanged(window)
                }
            }
            _ => Activation::Started(DegradeWindow {
                started_at: now,
                until: candidate,
            }),
        };
        *state = DegradeState::Degraded(activation.window());
        drop(state);

        match activation {
            Activation::Started(_) => {
                warn!(duration_secs = duration.as_secs_f64(), "entering degrade mode")
            }
            Activation::Extended(_) => {
                warn!(duration_secs = duration.as_secs_f64(), "degrade window extended")
            }
            Activation::Unchanged(_) => {}
        }
        activation
    }

    /// Closes any window immediately, without a recovery notice.
    pub fn clear(&self) {
        *self.state.lock() = DegradeState::Normal;
    }

    /// Returns the current state without transitioning.
    pub fn state(&self) -> DegradeState {
        *self.state.lock()
    }

    /// Returns the active window, if any, without transitioning.
    pub fn window(&self) -> Option<DegradeWindow> {
        match self.state() {
            DegradeState::Degraded(window) => Some(window),
            DegradeState::Normal => None,
        }
    }

    /// Waits for the next recovery notice.
    ///
    /// A notice raised while nobody waits is kept for the next waiter.
    pub async fn recovered(&self) {
        self.recovery.notified().await;
    }
}
