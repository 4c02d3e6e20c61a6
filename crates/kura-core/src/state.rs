//! # Transaction Status Table
//!
//! The only allowed edges between [`TransactionStatus`] values, plus the
//! payment-method / kind matrix that decides how a draft gets paid.

use crate::error::{CoreError, CoreResult};
use crate::types::{PaymentMethod, TransactionKind, TransactionStatus};

/// Returns true when `from → to` is an edge of the status machine.
pub fn can_transition(from: TransactionStatus, to: TransactionStatus) -> bool {
    use TransactionStatus::*;
    matches!(
        (from, to),
        (Draft, Paying) | (Draft, Completed) | (Draft, Canceled) | (Paying, Completed) | (Paying, Canceled)
    )
}

/// Fails with `InvalidTransition` unless `from → to` is allowed.
pub fn ensure_transition(
    transaction_id: &str,
    from: TransactionStatus,
    to: TransactionStatus,
) -> CoreResult<()> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            transaction_id: transaction_id.to_string(),
            from,
            to,
        })
    }
}

/// How a payment for a given method and kind is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Cash drawer movement, completes immediately.
    Cash,
    /// Bank transfer with an optional cash part, completes immediately.
    Bank,
    /// Terminal method on a register with a bound device: goes `paying`.
    Terminal,
    /// Terminal method without a bound device: recorded manually, completes
    /// immediately.
    Manual,
}

/// Picks the settlement path, or fails with `UnsupportedPaymentMethod`.
pub fn settlement_for(
    kind: TransactionKind,
    method: PaymentMethod,
    terminal_bound: bool,
) -> CoreResult<Settlement> {
    match (kind, method) {
        (_, PaymentMethod::Cash) => Ok(Settlement::Cash),
        (TransactionKind::Buy, PaymentMethod::Bank) => Ok(Settlement::Bank),
        (TransactionKind::Sell, m) if m.is_terminal() => {
            if terminal_bound {
                Ok(Settlement::Terminal)
            } else {
                Ok(Settlement::Manual)
            }
        }
        (kind, method) => Err(CoreError::UnsupportedPaymentMethod { kind, method }),
    }
}
