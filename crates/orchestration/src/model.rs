//! Purchase request, result and bonus bookkeeping types.

use chrono::{DateTime, Utc};
use common::{Currency, OrderId, ProductId, UserId};
use resilience::ServiceError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A purchase as received from the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: u32,
    /// Currency the buyer pays in.
    pub currency: Currency,
}

impl PurchaseRequest {
    /// Creates a request.
    pub fn new(
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
        currency: impl Into<Currency>,
    ) -> Self {
        Self {
            user_id,
            product_id,
            quantity,
            currency: currency.into(),
        }
    }

    /// Rejects a zero quantity or a malformed currency code.
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.quantity == 0 {
            return Err(ServiceError::InvalidRequest(
                "quantity must be at least 1".to_string(),
            ));
        }
        if !self.currency.is_valid() {
            return Err(ServiceError::InvalidRequest(format!(
                "invalid currency code '{}'",
                self.currency
            )));
        }
        Ok(())
    }
}

/// Terminal status of a purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseStatus {
    Completed,
    Failed,
}

impl std::fmt::Display for PurchaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PurchaseStatus::Completed => f.write_str("COMPLETED"),
            PurchaseStatus::Failed => f.write_str("FAILED"),
        }
    }
}

/// The single answer to a purchase request.
///
/// Only [`PurchaseResult::completed`] and [`PurchaseResult::failed`] build
/// one, so a completed result always carries an order and prices and a
/// failed one never does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseResult {
    order_id: Option<OrderId>,
    product_id: ProductId,
    quantity: u32,
    original_price: Option<Decimal>,
    converted_price: Option<Decimal>,
    bonus_points: u64,
    status: PurchaseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure_reason: Option<String>,
}

impl PurchaseResult {
    /// A completed purchase.
    pub fn completed(
        order_id: OrderId,
        product_id: ProductId,
        quantity: u32,
        original_price: Decimal,
        converted_price: Decimal,
        bonus_points: u64,
    ) -> Self {
        Self {
            order_id: Some(order_id),
            product_id,
            quantity,
            original_price: Some(original_price),
            converted_price: Some(converted_price),
            bonus_points,
            status: PurchaseStatus::Completed,
            failure_reason: None,
        }
    }

    /// A failed purchase; only the product and quantity are echoed.
    pub fn failed(product_id: ProductId, quantity: u32, reason: impl Into<String>) -> Self {
        Self {
            order_id: None,
            product_id,
            quantity,
            original_price: None,
            converted_price: None,
            bonus_points: 0,
            status: PurchaseStatus::Failed,
            failure_reason: Some(reason.into()),
        }
    }

    pub fn order_id(&self) -> Option<OrderId> {
        self.order_id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    /// Unit price in the product's currency.
    pub fn original_price(&self) -> Option<Decimal> {
        self.original_price
    }

    /// Unit price in the requested currency.
    pub fn converted_price(&self) -> Option<Decimal> {
        self.converted_price
    }

    /// Points computed for this purchase, awarded live or deferred.
    pub fn bonus_points(&self) -> u64 {
        self.bonus_points
    }

    pub fn status(&self) -> PurchaseStatus {
        self.status
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn is_completed(&self) -> bool {
        self.status == PurchaseStatus::Completed
    }
}

/// A bonus award waiting for replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBonusRequest {
    pub user_id: UserId,
    pub order_id: OrderId,
    pub bonus_value: u64,
    pub enqueued_at: DateTime<Utc>,
}

impl PendingBonusRequest {
    /// Creates a request stamped with the current time.
    pub fn new(user_id: UserId, order_id: OrderId, bonus_value: u64) -> Self {
        Self {
            user_id,
            order_id,
            bonus_value,
            enqueued_at: Utc::now(),
        }
    }
}

/// Confirmed versus not-yet-confirmed points of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPoints {
    pub user_id: UserId,
    pub total_points: u64,
    pub pending_points: u64,
}
