//! # Validation Module
//!
//! Input checks that run before any business rule.
//!
//! ## Validation Layers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Layer 1: THIS MODULE                                                  │
//! │  ├── quantities, tenders, point usage, free-text lengths               │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: cart validator (crate::cart)                                 │
//! │  ├── per-line business rules against pre-fetched state                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK / UNIQUE / foreign key constraints                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use kura_core::validation::{validate_item_count, validate_cash_tender};
//!
//! validate_item_count(5).unwrap();
//! assert_eq!(validate_cash_tender(1000, Some(1500)).unwrap(), 500);
//! ```

use crate::error::ValidationError;
use crate::MAX_ITEM_QUANTITY;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest free-text description stored on a ledger row.
pub const MAX_DESCRIPTION_LEN: usize = 500;

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a positive unit count for a ledger operation.
///
/// ## Example
/// ```rust
/// use kura_core::validation::validate_item_count;
///
/// assert!(validate_item_count(1).is_ok());
/// assert!(validate_item_count(0).is_err());
/// ```
pub fn validate_item_count(count: i64) -> ValidationResult<()> {
    if count <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "item_count".to_string(),
        });
    }
    if count > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "item_count".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }
    Ok(())
}

/// Validates a signed stock adjustment (non-zero).
pub fn validate_adjustment(delta: i64) -> ValidationResult<()> {
    if delta == 0 {
        return Err(ValidationError::Required {
            field: "change_count".to_string(),
        });
    }
    validate_item_count(delta.abs())
}

/// Validates the cash handed over for a cash payment and returns the change.
///
/// `None` means exact tender.
pub fn validate_cash_tender(total: i64, received: Option<i64>) -> ValidationResult<i64> {
    let Some(received) = received else {
        return Ok(0);
    };
    if received < total {
        return Err(ValidationError::OutOfRange {
            field: "cash_received".to_string(),
            min: total,
            max: i64::MAX,
        });
    }
    Ok(received - total)
}

/// Validates the cash part of a bank payment.
pub fn validate_cash_portion(total: i64, portion: i64) -> ValidationResult<()> {
    if portion < 0 || portion > total.abs() {
        return Err(ValidationError::OutOfRange {
            field: "cash_portion".to_string(),
            min: 0,
            max: total.abs(),
        });
    }
    Ok(())
}

/// Validates the points a customer wants to spend.
pub fn validate_point_usage(used_point: i64, has_customer: bool) -> ValidationResult<()> {
    if used_point < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: "used_point".to_string(),
        });
    }
    if used_point > 0 && !has_customer {
        return Err(ValidationError::Required {
            field: "customer_id".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// String Validators
// =============================================================================

/// Trims a free-text description; empty becomes `None`.
pub fn validate_description(text: Option<&str>) -> ValidationResult<Option<String>> {
    let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(None);
    };
    if text.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(ValidationError::TooLong {
            field: "description".to_string(),
            max: MAX_DESCRIPTION_LEN,
        });
    }
    Ok(Some(text.to_string()))
}

/// Validates a caller-supplied id (idempotency keys, device refs).
pub fn validate_id(field: &str, id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    if id.len() > 64 {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: 64,
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_count() {
        assert!(validate_item_count(1).is_ok());
        assert!(validate_item_count(MAX_ITEM_QUANTITY).is_ok());
        assert!(validate_item_count(0).is_err());
        assert!(validate_item_count(-3).is_err());
        assert!(validate_item_count(MAX_ITEM_QUANTITY + 1).is_err());
    }

    #[test]
    fn test_adjustment() {
        assert!(validate_adjustment(-4).is_ok());
        assert!(validate_adjustment(4).is_ok());
        assert!(validate_adjustment(0).is_err());
    }

    #[test]
    fn test_cash_tender() {
        assert_eq!(validate_cash_tender(980, Some(1000)).unwrap(), 20);
        assert_eq!(validate_cash_tender(980, None).unwrap(), 0);
        assert!(validate_cash_tender(980, Some(900)).is_err());
    }

    #[test]
    fn test_cash_portion() {
        assert!(validate_cash_portion(-5000, 2000).is_ok());
        assert!(validate_cash_portion(5000, 6000).is_err());
        assert!(validate_cash_portion(5000, -1).is_err());
    }

    #[test]
    fn test_points_need_customer() {
        assert!(validate_point_usage(0, false).is_ok());
        assert!(validate_point_usage(100, true).is_ok());
        assert!(validate_point_usage(100, false).is_err());
        assert!(validate_point_usage(-1, true).is_err());
    }

    #[test]
    fn test_description() {
        assert_eq!(validate_description(Some("  broken box ")).unwrap(), Some("broken box".to_string()));
        assert_eq!(validate_description(Some("   ")).unwrap(), None);
        assert!(validate_description(Some(&"x".repeat(MAX_DESCRIPTION_LEN + 1))).is_err());
    }
}
