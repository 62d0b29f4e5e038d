//! Purchase workflow constants.

/// The workflow identifier used in logs.
pub const WORKFLOW: &str = "Purchase";

/// Step name: Reject malformed requests before any call goes out.
pub const STEP_VALIDATE: &str = "validate_request";

/// Step name: Look up the product (required, fallback product allowed).
pub const STEP_LOOKUP_PRODUCT: &str = "lookup_product";

/// Step name: Convert the price (required, served stale when needed).
pub const STEP_EXCHANGE_RATE: &str = "exchange_rate";

/// Step name: Execute the sale (required, synthetic order allowed).
pub const STEP_EXECUTE_SALE: &str = "execute_sale";

/// Step name: Award loyalty points (optional, deferred on failure).
pub const STEP_AWARD_BONUS: &str = "award_bonus";
