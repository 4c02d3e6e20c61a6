//! # Error Types
//!
//! Domain-specific error types for kura-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  kura-core errors (this file)                                          │
//! │  ├── CoreError        - Business rule violations                       │
//! │  ├── CartRule         - Which cart rule rejected a line                │
//! │  └── ValidationError  - Input shape failures                           │
//! │                                                                         │
//! │  kura-db errors                                                        │
//! │  └── DbError          - Persistence failures (wraps CoreError)         │
//! │                                                                         │
//! │  kura-engine errors                                                    │
//! │  └── EngineError      - Public taxonomy handed to callers              │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → EngineError → Caller    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

use crate::types::{PaymentMethod, TransactionKind, TransactionStatus};

// =============================================================================
// Cart Rules
// =============================================================================

/// The cart rule that rejected a line.
///
/// Variants are grouped by the validation step that raises them, in the
/// order the validator runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum CartRule {
    // 1. membership
    ProductNotInStore,
    InvalidQuantity,
    // 2. price direction
    MarkupOnSell,
    MarkdownOnBuy,
    // 3. restricted channel
    ChannelGenreNotAllowed,
    ChannelCategoryNotAllowed,
    ChannelQuantityCap,
    // 4. reservation deposit
    ReceptionNotFound,
    DepositUnitPriceNotZero,
    DepositPriceMismatch,
    ReceptionNotCreated,
    ReservationNotOpen,
    ReservationMarginExceeded,
    // 5. reservation receive
    ReceptionNotDeposited,
    ReceptionOwnerMismatch,
    ReceptionCountMismatch,
    ReceivePriceMismatch,
    // 6. reserved inventory
    ProductReserved,
    ExceedsUndeliveredCap,
    InsufficientAvailability,
    // 7. consignment
    ConsignmentNotSellable,
    ConsignmentDiscountStacking,
    // set deals
    SetDealNotApplicable,
}

impl std::fmt::Display for CartRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            CartRule::ProductNotInStore => "product_not_in_store",
            CartRule::InvalidQuantity => "invalid_quantity",
            CartRule::MarkupOnSell => "markup_on_sell",
            CartRule::MarkdownOnBuy => "markdown_on_buy",
            CartRule::ChannelGenreNotAllowed => "channel_genre_not_allowed",
            CartRule::ChannelCategoryNotAllowed => "channel_category_not_allowed",
            CartRule::ChannelQuantityCap => "channel_quantity_cap",
            CartRule::ReceptionNotFound => "reception_not_found",
            CartRule::DepositUnitPriceNotZero => "deposit_unit_price_not_zero",
            CartRule::DepositPriceMismatch => "deposit_price_mismatch",
            CartRule::ReceptionNotCreated => "reception_not_created",
            CartRule::ReservationNotOpen => "reservation_not_open",
            CartRule::ReservationMarginExceeded => "reservation_margin_exceeded",
            CartRule::ReceptionNotDeposited => "reception_not_deposited",
            CartRule::ReceptionOwnerMismatch => "reception_owner_mismatch",
            CartRule::ReceptionCountMismatch => "reception_count_mismatch",
            CartRule::ReceivePriceMismatch => "receive_price_mismatch",
            CartRule::ProductReserved => "product_reserved",
            CartRule::ExceedsUndeliveredCap => "exceeds_undelivered_cap",
            CartRule::InsufficientAvailability => "insufficient_availability",
            CartRule::ConsignmentNotSellable => "consignment_not_sellable",
            CartRule::ConsignmentDiscountStacking => "consignment_discount_stacking",
            CartRule::SetDealNotApplicable => "set_deal_not_applicable",
        };
        f.write_str(text)
    }
}

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// These errors represent business rule violations. Every variant renders a
/// reason string that is safe to show to the operator as-is.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A cart line violated one of the validator rules.
    ///
    /// `product_id` is `None` for cart-wide rules (set deals).
    #[error("Invalid cart line ({rule}): {reason}")]
    InvalidCartLine {
        product_id: Option<String>,
        rule: CartRule,
        reason: String,
    },

    /// A decrease would drive a non-infinite product below zero.
    ///
    /// ## User Workflow
    /// ```text
    /// Pay (sell 5)
    ///      │
    ///      ▼
    /// stock_number = 3, infinite_stock = false
    ///      │
    ///      ▼
    /// InsufficientStock { available: 3, requested: 5 }
    ///      │
    ///      ▼
    /// Whole payment unit rolls back, stock stays at 3
    /// ```
    #[error("Insufficient stock for product {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: String,
        available: i64,
        requested: i64,
    },

    /// Payment method cannot be used for this transaction kind.
    #[error("Payment method {method} is not supported for {kind} transactions")]
    UnsupportedPaymentMethod {
        kind: TransactionKind,
        method: PaymentMethod,
    },

    /// The transaction status table does not allow this edge.
    #[error("Transaction {transaction_id} cannot move from {from} to {to}")]
    InvalidTransition {
        transaction_id: String,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    /// Supplied cost lots do not cover the increased count.
    #[error("Wholesale records cover {covered} units but {expected} were added")]
    CostRecordMismatch { expected: i64, covered: i64 },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates an InvalidCartLine error for a specific product.
    pub fn cart_line(
        product_id: impl Into<String>,
        rule: CartRule,
        reason: impl Into<String>,
    ) -> Self {
        CoreError::InvalidCartLine {
            product_id: Some(product_id.into()),
            rule,
            reason: reason.into(),
        }
    }

    /// Returns the rule for InvalidCartLine errors.
    pub fn cart_rule(&self) -> Option<CartRule> {
        match self {
            CoreError::InvalidCartLine { rule, .. } => Some(*rule),
            _ => None,
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These occur before any business rule runs, when the request itself is
/// malformed.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Value is outside the allowed range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Too many entries in a list.
    #[error("{field} cannot have more than {max} entries")]
    TooMany { field: String, max: usize },

    /// Text is longer than allowed.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
