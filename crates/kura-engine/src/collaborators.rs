//! # External Collaborators
//!
//! Systems the engine calls out to but does not own.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  EngineService ──► PaymentProvider        terminal checkouts, refunds  │
//! │       │                                                                 │
//! │       ├─────────► LoyaltyLedger           points credit / debit        │
//! │       │                                                                 │
//! │       └─────────► NotificationDispatcher  fire-and-forget messages     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//! Every method is a fallible network call. Retry policy belongs to the
//! implementation; the engine only decides what a failure means for the
//! transaction it is driving.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Failure reported by a collaborator.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct CollaboratorError(pub String);

impl CollaboratorError {
    pub fn new(reason: impl Into<String>) -> Self {
        CollaboratorError(reason.into())
    }
}

pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

// =============================================================================
// Payment Provider
// =============================================================================

/// State of a terminal checkout on the provider side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStatus {
    Succeeded,
    Pending,
    Failed,
    Canceled,
}

/// State of a refund on the provider side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Succeeded,
    Pending,
    Failed,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Starts a checkout on the device and returns its id.
    async fn create_terminal_checkout(&self, amount: i64, device_ref: &str) -> CollaboratorResult<String>;

    async fn confirm_checkout(&self, checkout_id: &str) -> CollaboratorResult<CheckoutStatus>;

    /// Refunds part or all of a captured checkout; returns the refund id.
    async fn create_refund(&self, payment_ref: &str, amount: i64) -> CollaboratorResult<String>;

    async fn refund_status(&self, refund_id: &str) -> CollaboratorResult<RefundStatus>;
}

// =============================================================================
// Loyalty Ledger
// =============================================================================

/// Points credited by [`LoyaltyLedger::add_points`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointGrant {
    pub amount: i64,
    pub new_total: i64,
}

/// Points bookkeeping outside the local database.
///
/// Calls happen before the local commit, so a rolled-back unit of work is
/// retried with the same `idempotency_key`. A key the ledger has already
/// applied must return the first call's result without moving the balance.
#[async_trait]
pub trait LoyaltyLedger: Send + Sync {
    /// Credits points earned on `basis` (the amount paid).
    async fn add_points(
        &self,
        customer_id: &str,
        basis: i64,
        idempotency_key: &str,
    ) -> CollaboratorResult<PointGrant>;

    /// Debits spent points; returns the new balance.
    async fn use_points(
        &self,
        customer_id: &str,
        amount: i64,
        idempotency_key: &str,
    ) -> CollaboratorResult<i64>;

    /// Applies a signed correction after a return (negative takes earned
    /// points back, positive re-credits spent ones); returns the new balance.
    async fn refund_points(
        &self,
        customer_id: &str,
        amount: i64,
        idempotency_key: &str,
    ) -> CollaboratorResult<i64>;
}

/// Key for a points call made on behalf of `transaction_id`.
pub(crate) fn points_key(transaction_id: &str, step: &str) -> String {
    format!("{}:{}", transaction_id, step)
}

// =============================================================================
// Notification Dispatcher
// =============================================================================

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(&self, template: &str, recipient: &str, data: serde_json::Value) -> CollaboratorResult<()>;
}

/// Sends in the background; failures are logged and dropped.
pub(crate) fn dispatch(
    notifier: &Arc<dyn NotificationDispatcher>,
    template: &'static str,
    recipient: String,
    data: serde_json::Value,
) {
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        if let Err(e) = notifier.send(template, &recipient, data).await {
            warn!(template, recipient = %recipient, error = %e, "Notification failed");
        }
    });
}

/// The engine's handles to every collaborator.
#[derive(Clone)]
pub struct Collaborators {
    pub payments: Arc<dyn PaymentProvider>,
    pub loyalty: Arc<dyn LoyaltyLedger>,
    pub notifier: Arc<dyn NotificationDispatcher>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
