//! Resilient purchase orchestration.
//!
//! The purchase workflow runs these steps:
//! 1. Validate the request
//! 2. Look up the product (fallback product when best-effort)
//! 3. Resolve the exchange rate (stale cached rate on failure)
//! 4. Execute the sale (synthetic order id when best-effort)
//! 5. Award loyalty points on a detached task
//!
//! A bonus award that times out, fails, or meets an active degrade window
//! is queued and replayed by the recovery loop once the window elapses.

pub mod bonus;
pub mod config;
pub mod engine;
pub mod model;
pub mod recovery;
pub mod steps;

pub use bonus::{BonusBook, BonusDispatcher, BonusHandle, BonusOutcome, BonusStatus, DeferReason};
pub use config::EngineConfig;
pub use engine::{EngineHealth, OrchestrationEngine, PurchaseReceipt, bonus_value};
pub use model::{PendingBonusRequest, PurchaseRequest, PurchaseResult, PurchaseStatus, UserPoints};
pub use recovery::{MIN_DRAIN_INTERVAL, spawn_recovery_loop};
