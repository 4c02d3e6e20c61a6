//! # Engine Error Types
//!
//! The public error taxonomy handed to callers.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Engine Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Business rule  │  │  Infrastructure │  │     Defensive           │ │
//! │  │  (never commit) │  │  (safe retry)   │  │  (logged loudly)        │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidCartLine│  │  Concurrency    │  │  InvariantViolation     │ │
//! │  │  Insufficient   │  │    Aborted      │  │  Internal               │ │
//! │  │    Stock        │  │  ExternalPayment│  │                         │ │
//! │  │  Unsupported    │  │    Failure      │  │                         │ │
//! │  │    Payment      │  │                 │  │                         │ │
//! │  │  InvalidInput   │  │                 │  │                         │ │
//! │  │  InvalidTrans.  │  │                 │  │                         │ │
//! │  │  AlreadyReturned│  │                 │  │                         │ │
//! │  │  NotFound       │  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//! Every variant renders a reason string; [`ErrorResponse`] pairs it with a
//! machine-readable [`ErrorCode`].

use kura_core::{CartRule, CoreError, PaymentMethod, TransactionKind, TransactionStatus};
use kura_db::DbError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Message shown for errors whose details must stay internal.
pub const GENERIC_MESSAGE: &str = "An unexpected error occurred";

/// Engine error type.
#[derive(Debug, Error)]
pub enum EngineError {
    // =========================================================================
    // Business Rules
    // =========================================================================
    /// A cart line broke a validator rule.
    #[error("{reason}")]
    InvalidCartLine {
        product_id: Option<String>,
        rule: CartRule,
        reason: String,
    },

    #[error("Insufficient stock for product {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: String,
        available: i64,
        requested: i64,
    },

    #[error("Payment method {method} is not supported for {kind} transactions")]
    UnsupportedPaymentMethod {
        kind: TransactionKind,
        method: PaymentMethod,
    },

    /// Request shape problem outside the cart rules (tender, points, ids).
    #[error("{0}")]
    InvalidInput(String),

    #[error("Transaction {transaction_id} cannot move from {from} to {to}")]
    InvalidTransition {
        transaction_id: String,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("Transaction {original_transaction_id} was already returned by {return_transaction_id}")]
    AlreadyReturned {
        original_transaction_id: String,
        return_transaction_id: String,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    // =========================================================================
    // Infrastructure
    // =========================================================================
    /// The payment provider rejected, canceled or timed out.
    #[error("Payment failed: {0}")]
    ExternalPaymentFailure(String),

    /// Lock wait or unit-of-work timeout exceeded; nothing was persisted.
    #[error("Operation aborted, please retry: {0}")]
    ConcurrencyAborted(String),

    // =========================================================================
    // Defensive
    // =========================================================================
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub(crate) fn invariant(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        error!(%reason, "Invariant violation");
        EngineError::InvariantViolation(reason)
    }

    pub(crate) fn not_found(entity: &str, id: &str) -> Self {
        EngineError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    /// True when the whole operation can be retried as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::ConcurrencyAborted(_))
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::InvalidCartLine { .. } => ErrorCode::InvalidCartLine,
            EngineError::InsufficientStock { .. } => ErrorCode::InsufficientStock,
            EngineError::UnsupportedPaymentMethod { .. } => ErrorCode::UnsupportedPaymentMethod,
            EngineError::InvalidInput(_) => ErrorCode::ValidationError,
            EngineError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            EngineError::AlreadyReturned { .. } => ErrorCode::AlreadyReturned,
            EngineError::NotFound { .. } => ErrorCode::NotFound,
            EngineError::ExternalPaymentFailure(_) => ErrorCode::ExternalPaymentFailure,
            EngineError::ConcurrencyAborted(_) => ErrorCode::ConcurrencyAborted,
            EngineError::InvariantViolation(_) => ErrorCode::InvariantViolation,
            EngineError::Config(_) => ErrorCode::ConfigError,
            EngineError::Internal(_) => ErrorCode::Internal,
        }
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidCartLine {
                product_id,
                rule,
                reason,
            } => EngineError::InvalidCartLine {
                product_id,
                rule,
                reason,
            },
            CoreError::InsufficientStock {
                product_id,
                available,
                requested,
            } => EngineError::InsufficientStock {
                product_id,
                available,
                requested,
            },
            CoreError::UnsupportedPaymentMethod { kind, method } => {
                EngineError::UnsupportedPaymentMethod { kind, method }
            }
            CoreError::InvalidTransition {
                transaction_id,
                from,
                to,
            } => EngineError::InvalidTransition {
                transaction_id,
                from,
                to,
            },
            CoreError::CostRecordMismatch { .. } => EngineError::InvalidInput(err.to_string()),
            CoreError::Validation(e) => EngineError::InvalidInput(e.to_string()),
        }
    }
}

/// Converts persistence errors.
///
/// ## Mapping
/// ```text
/// DbError::Core(e)             → From<CoreError>
/// DbError::NotFound            → NotFound
/// DbError::Busy | PoolExhausted → ConcurrencyAborted
/// DbError::Conflict            → InvariantViolation (status moved under the lock)
/// DbError::InvalidReversal     → InvariantViolation
/// anything else                → Internal (logged)
/// ```
impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        if err.is_lock_failure() {
            return EngineError::ConcurrencyAborted(err.to_string());
        }
        match err {
            DbError::Core(e) => e.into(),
            DbError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            DbError::Conflict { .. } | DbError::InvalidReversal { .. } => {
                EngineError::invariant(err.to_string())
            }
            other => {
                error!(error = %other, "Database failure");
                EngineError::Internal(other.to_string())
            }
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

// =============================================================================
// Caller-facing Response
// =============================================================================

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidCartLine,
    InsufficientStock,
    UnsupportedPaymentMethod,
    ValidationError,
    InvalidTransition,
    AlreadyReturned,
    NotFound,
    ExternalPaymentFailure,
    ConcurrencyAborted,
    InvariantViolation,
    ConfigError,
    Internal,
}

/// What a caller shows when an operation fails.
///
/// ```json
/// { "code": "INSUFFICIENT_STOCK", "message": "Insufficient stock for product p-1: ..." }
/// ```
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&EngineError> for ErrorResponse {
    fn from(err: &EngineError) -> Self {
        let message = match err {
            EngineError::Internal(detail) | EngineError::Config(detail) => {
                error!(%detail, "Surfacing internal error");
                GENERIC_MESSAGE.to_string()
            }
            other => other.to_string(),
        };
        ErrorResponse {
            code: err.code(),
            message,
        }
    }
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_failures_are_retryable() {
        let err: EngineError = DbError::Busy("database is locked".to_string()).into();
        assert!(err.is_retryable());
        assert_eq!(err.code(), ErrorCode::ConcurrencyAborted);

        let err: EngineError = DbError::PoolExhausted.into();
        assert!(err.is_retryable());

        let err: EngineError = DbError::not_found("Transaction", "t-1").into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_core_errors_keep_their_kind() {
        let err: EngineError = DbError::Core(CoreError::InsufficientStock {
            product_id: "p-1".to_string(),
            available: 1,
            requested: 3,
        })
        .into();
        assert!(matches!(err, EngineError::InsufficientStock { available: 1, .. }));

        let err: EngineError = CoreError::cart_line("p-1", CartRule::MarkupOnSell, "no markup").into();
        assert_eq!(err.code(), ErrorCode::InvalidCartLine);
        assert_eq!(err.to_string(), "no markup");
    }

    #[test]
    fn test_internal_errors_are_masked() {
        let err = EngineError::Internal("disk I/O error at page 7".to_string());
        let response = ErrorResponse::from(&err);
        assert_eq!(response.code, ErrorCode::Internal);
        assert_eq!(response.message, GENERIC_MESSAGE);

        let err = EngineError::ExternalPaymentFailure("card declined".to_string());
        let response = ErrorResponse::from(&err);
        assert_eq!(response.message, "Payment failed: card declined");
    }

    #[test]
    fn test_reversal_errors_are_invariant_violations() {
        let err: EngineError = DbError::InvalidReversal {
            movement_id: 4,
            reason: "already reversed by movement 9".to_string(),
        }
        .into();
        assert_eq!(err.code(), ErrorCode::InvariantViolation);
    }
}
