//! # Return Engine
//!
//! Reverses a completed transaction through a mirror transaction.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  create_return(original, options)                                       │
//! │                                                                         │
//! │  unit of work 1: guard ─► mirror draft (is_return, original link)       │
//! │                                                                         │
//! │  unit of work 2:                                                        │
//! │    unless dont_cancel:  reverse original stock movements (exact lots)   │
//! │                         move receptions back                            │
//! │    unless dont_refund:  points correction                               │
//! │                         Cash      −signed total on the register         │
//! │                         Bank      −signed cash portion                  │
//! │                         Manual    payment record only                   │
//! │                         Terminal  provider refund, poll until settled   │
//! │    complete(draft) ─► commit                                            │
//! │                                                                         │
//! │  on failure: the mirror is reset to an unlinked draft, error re-raised  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//! The provider refund is the last effect in the unit of work and its
//! settlement is polled with the write lock held, so a rejected refund rolls
//! the reversal back with everything else. Other writers wait at most
//! `refund_wait_timeout`; configuration keeps it below the unit-of-work
//! timeout.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, warn};

use kura_core::stock::StockSource;
use kura_core::{
    Actor, CartLine, CashSourceKind, Payment, PaymentMethod, PaymentMode, ReceptionStatus,
    StockSourceKind, Transaction, TransactionKind, TransactionStatus,
};
use kura_db::{generate_id, UnitOfWork};

use crate::collaborators::{dispatch, points_key, RefundStatus};
use crate::error::{EngineError, EngineResult};
use crate::payment::{has_deposit, payment_failure, signed_cash};
use crate::service::EngineService;

/// Switches for [`EngineService::create_return`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReturnOptions {
    /// Cancel only this reservation deposit instead of the whole transaction.
    #[serde(default)]
    pub cancel_reception_id: Option<String>,
    /// Skip the money side (points, cash, provider refund).
    #[serde(default)]
    pub dont_refund: bool,
    /// Skip the stock and reception side.
    #[serde(default)]
    pub dont_cancel: bool,
}

/// What the second unit of work needs from the first.
struct ReturnDraft {
    original: Transaction,
    mirror: Transaction,
    lines: Vec<CartLine>,
}

impl EngineService {
    /// Creates and applies a return of `original_transaction_id`.
    ///
    /// Not idempotent: callers retrying after an error should first look
    /// for an existing return, which this call reports as `AlreadyReturned`.
    pub async fn create_return(
        &self,
        original_transaction_id: &str,
        options: ReturnOptions,
        register_id: Option<String>,
        actor: &Actor,
    ) -> EngineResult<Transaction> {
        let draft = self
            .bounded("create_return", self.open_return(original_transaction_id, &options, actor))
            .await?;
        let return_id = draft.mirror.id.clone();

        let applied = self
            .bounded(
                "apply_return",
                self.apply_return(&draft, &options, register_id.as_deref(), actor),
            )
            .await;

        match applied {
            Ok(touched) => {
                self.refresh_wholesale_stats(touched).await;
                let tx = self.load_transaction(&return_id).await?;
                if let Some(customer_id) = &tx.customer_id {
                    dispatch(
                        &self.collaborators.notifier,
                        "transaction_returned",
                        customer_id.clone(),
                        json!({
                            "transaction_id": tx.id,
                            "original_transaction_id": original_transaction_id,
                            "total_price": tx.total_price,
                        }),
                    );
                }
                Ok(tx)
            }
            Err(e) => {
                warn!(
                    return_id = %return_id,
                    original_transaction_id,
                    error = %e,
                    "Return failed, resetting draft"
                );
                if let Err(reset) = self.reset_return(&return_id).await {
                    error!(return_id = %return_id, error = %reset, "Return draft reset failed");
                }
                Err(e)
            }
        }
    }

    // =========================================================================
    // Phase 1: Mirror Draft
    // =========================================================================

    async fn open_return(
        &self,
        original_id: &str,
        options: &ReturnOptions,
        actor: &Actor,
    ) -> EngineResult<ReturnDraft> {
        let mut uow = self.db.begin().await?;
        let original = uow.transactions().require(original_id).await?;

        if original.is_return {
            return Err(EngineError::InvalidInput(format!(
                "Transaction {} is itself a return",
                original_id
            )));
        }
        if original.status != TransactionStatus::Completed {
            return Err(EngineError::InvalidInput(format!(
                "Only completed transactions can be returned; {} is {}",
                original_id, original.status
            )));
        }

        // a full return refunds every deposit, so it excludes any other return
        let existing = match &options.cancel_reception_id {
            Some(reception_id) => match uow.transactions().find_full_return(original_id).await? {
                Some(full) => Some(full),
                None => {
                    uow.transactions()
                        .find_reception_return(original_id, reception_id)
                        .await?
                }
            },
            None => uow.transactions().find_live_return(original_id).await?,
        };
        if let Some(existing) = existing {
            return Err(EngineError::AlreadyReturned {
                original_transaction_id: original_id.to_string(),
                return_transaction_id: existing.id,
            });
        }

        let original_lines = uow.transactions().lines(original_id).await?;
        let now = Utc::now();
        let return_id = generate_id();

        let (mirror, lines) = match &options.cancel_reception_id {
            Some(reception_id) => {
                let deposit = original_lines
                    .iter()
                    .find(|l| l.reservation_reception_id_for_deposit.as_deref() == Some(reception_id.as_str()))
                    .ok_or_else(|| {
                        EngineError::InvalidInput(format!(
                            "Transaction {} has no deposit for reception {}",
                            original_id, reception_id
                        ))
                    })?;
                let lines = mirror_lines(&return_id, std::slice::from_ref(deposit));
                let mirror = Transaction {
                    subtotal_price: deposit.total_price,
                    discount_price: 0,
                    set_deal_discount_price: 0,
                    point_discount_price: 0,
                    tax_price: 0,
                    included_tax_price: 0,
                    total_price: deposit.total_price,
                    total_reservation_price: deposit.reservation_price * deposit.item_count,
                    total_consignment_sale_price: 0,
                    total_consignment_commission_price: 0,
                    used_point: 0,
                    ..mirror_of(&original, &return_id, actor, now)
                };
                (mirror, lines)
            }
            None => (
                mirror_of(&original, &return_id, actor, now),
                mirror_lines(&return_id, &original_lines),
            ),
        };

        uow.transactions().insert(&mirror).await?;
        uow.transactions().insert_lines(&lines).await?;
        if let Some(reception_id) = &options.cancel_reception_id {
            uow.transactions().set_canceled_reception(&mirror.id, reception_id).await?;
        }
        uow.commit().await?;

        debug!(
            return_id = %mirror.id,
            original_transaction_id = original_id,
            lines = lines.len(),
            reception_cancel = options.cancel_reception_id.is_some(),
            "Return draft created"
        );
        Ok(ReturnDraft {
            original,
            mirror,
            lines: original_lines,
        })
    }

    // =========================================================================
    // Phase 2: Effects
    // =========================================================================

    async fn apply_return(
        &self,
        draft: &ReturnDraft,
        options: &ReturnOptions,
        register_id: Option<&str>,
        actor: &Actor,
    ) -> EngineResult<Vec<String>> {
        let ReturnDraft {
            original,
            mirror,
            lines,
        } = draft;
        let mut uow = self.db.begin().await?;
        let mut touched = Vec::new();

        if !options.dont_cancel {
            match &options.cancel_reception_id {
                Some(reception_id) => {
                    uow.reservations()
                        .set_reception_status(reception_id, ReceptionStatus::Deposited, ReceptionStatus::Canceled)
                        .await?;
                }
                None => {
                    touched = reverse_stock(&mut uow, original, &mirror.id, actor).await?;
                    restore_receptions(&mut uow, lines).await?;
                }
            }
        }

        let register_id = register_id.or(original.register_id.as_deref());

        if !options.dont_refund {
            if options.cancel_reception_id.is_none() {
                self.refund_points(&mut uow, original, &mirror.id).await?;
            }
            let deposit = options.cancel_reception_id.is_some() || has_deposit(lines);
            let cash_kind = CashSourceKind::for_transaction(original.kind, deposit, true);
            self.refund_money(&mut uow, original, mirror, register_id, cash_kind, actor)
                .await?;
        }

        uow.transactions()
            .complete(&mirror.id, TransactionStatus::Draft, register_id, Utc::now())
            .await?;
        uow.commit().await?;

        info!(
            return_id = %mirror.id,
            original_transaction_id = %original.id,
            total_price = mirror.total_price,
            dont_refund = options.dont_refund,
            dont_cancel = options.dont_cancel,
            "Return completed"
        );
        Ok(touched)
    }

    /// Takes back earned points and re-credits spent ones.
    async fn refund_points(&self, uow: &mut UnitOfWork, original: &Transaction, return_id: &str) -> EngineResult<()> {
        if !self.points_enabled || original.kind != TransactionKind::Sell {
            return Ok(());
        }
        let Some(customer_id) = original.customer_id.as_deref() else {
            return Ok(());
        };
        let correction = original.used_point - original.point_amount;
        if correction == 0 {
            return Ok(());
        }

        let balance = self
            .collaborators
            .loyalty
            .refund_points(customer_id, correction, &points_key(&original.id, "return"))
            .await
            .map_err(|e| payment_failure("point refund", e))?;
        uow.transactions().set_points(return_id, correction, balance).await?;
        debug!(return_id, customer_id, correction, balance, "Points refunded");
        Ok(())
    }

    async fn refund_money(
        &self,
        uow: &mut UnitOfWork,
        original: &Transaction,
        mirror: &Transaction,
        register_id: Option<&str>,
        cash_kind: CashSourceKind,
        actor: &Actor,
    ) -> EngineResult<()> {
        let amount = mirror.total_price;
        let original_payment = uow.transactions().payment_for(&original.id).await?;
        let mut payment = Payment {
            id: generate_id(),
            transaction_id: mirror.id.clone(),
            mode: PaymentMode::Refund,
            method: original.payment_method,
            total_amount: amount,
            cash_received: None,
            cash_change: None,
            cash_portion: None,
            terminal_checkout_id: None,
            external_refund_id: None,
            created_at: Utc::now(),
        };

        match original.payment_method {
            PaymentMethod::Cash => {
                let register_id = register_id.ok_or_else(|| {
                    EngineError::InvalidInput("A register is required to refund cash".to_string())
                })?;
                if amount != 0 {
                    uow.registers()
                        .change_cash(
                            register_id,
                            -signed_cash(original.kind, amount),
                            cash_kind,
                            Some(&mirror.id),
                            None,
                            actor,
                        )
                        .await?;
                }
            }
            PaymentMethod::Bank => {
                let portion = original_payment.as_ref().and_then(|p| p.cash_portion).unwrap_or(0);
                if portion > 0 {
                    let register_id = register_id.ok_or_else(|| {
                        EngineError::InvalidInput("A register is required to refund the cash portion".to_string())
                    })?;
                    uow.registers()
                        .change_cash(
                            register_id,
                            -signed_cash(original.kind, portion),
                            cash_kind,
                            Some(&mirror.id),
                            Some("Cash part of bank payment"),
                            actor,
                        )
                        .await?;
                }
                payment.cash_portion = Some(portion);
            }
            _ => {
                // manual terminal payments have no checkout to refund against
                if let Some(checkout_id) = original.terminal_checkout_id.as_deref() {
                    let refund_id = self
                        .collaborators
                        .payments
                        .create_refund(checkout_id, amount)
                        .await
                        .map_err(|e| payment_failure("refund", e))?;
                    payment.terminal_checkout_id = Some(checkout_id.to_string());
                    payment.external_refund_id = Some(refund_id.clone());

                    uow.transactions().insert_payment(&payment).await?;
                    return self.wait_for_refund(&refund_id).await;
                }
            }
        }

        uow.transactions().insert_payment(&payment).await?;
        Ok(())
    }

    /// Polls the provider until the refund settles or the wait runs out.
    async fn wait_for_refund(&self, refund_id: &str) -> EngineResult<()> {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.timeouts.refund_poll_initial,
            max_interval: self.timeouts.refund_poll_max,
            multiplier: 2.0,
            max_elapsed_time: Some(self.timeouts.refund_wait),
            ..Default::default()
        };
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.collaborators.payments.refund_status(refund_id).await {
                Ok(RefundStatus::Succeeded) => {
                    info!(refund_id, attempt, "Refund settled");
                    return Ok(());
                }
                Ok(RefundStatus::Failed) => {
                    return Err(EngineError::ExternalPaymentFailure(format!(
                        "Refund {} was rejected by the provider",
                        refund_id
                    )));
                }
                Ok(RefundStatus::Pending) => {}
                Err(e) => warn!(refund_id, attempt, error = %e, "Refund status check failed"),
            }

            match backoff.next_backoff() {
                Some(delay) => {
                    debug!(refund_id, attempt, delay_ms = delay.as_millis() as u64, "Refund pending");
                    tokio::time::sleep(delay).await;
                }
                None => {
                    return Err(EngineError::ExternalPaymentFailure(format!(
                        "Refund {} did not settle within {:?}",
                        refund_id, self.timeouts.refund_wait
                    )));
                }
            }
        }
    }

    async fn reset_return(&self, return_id: &str) -> EngineResult<()> {
        let mut uow = self.db.begin().await?;
        uow.transactions().reset_return(return_id).await?;
        uow.commit().await?;
        Ok(())
    }
}

fn mirror_of(original: &Transaction, return_id: &str, actor: &Actor, now: DateTime<Utc>) -> Transaction {
    Transaction {
        id: return_id.to_string(),
        status: TransactionStatus::Draft,
        point_amount: 0,
        total_point_amount: 0,
        original_transaction_id: Some(original.id.clone()),
        is_return: true,
        register_id: None,
        terminal_checkout_id: None,
        staff_id: actor.staff_id.clone(),
        created_at: now,
        updated_at: now,
        finished_at: None,
        ..original.clone()
    }
}

fn mirror_lines(return_id: &str, lines: &[CartLine]) -> Vec<CartLine> {
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| CartLine {
            id: generate_id(),
            transaction_id: return_id.to_string(),
            line_no: i as i64 + 1,
            ..line.clone()
        })
        .collect()
}

/// Reverses every open movement of the original with its exact lots.
async fn reverse_stock(
    uow: &mut UnitOfWork,
    original: &Transaction,
    return_id: &str,
    actor: &Actor,
) -> EngineResult<Vec<String>> {
    let mut touched = Vec::new();
    let (kind, source) = match original.kind {
        TransactionKind::Sell => (
            StockSourceKind::TransactionSell,
            StockSource::SellReturn {
                transaction_id: return_id.to_string(),
            },
        ),
        TransactionKind::Buy => (
            StockSourceKind::TransactionBuy,
            StockSource::BuyReturn {
                transaction_id: return_id.to_string(),
            },
        ),
    };

    for movement in uow.stock().open_movements_for_source(kind, &original.id).await? {
        match original.kind {
            TransactionKind::Sell => uow.stock().reverse_decrease(movement.id, source.clone(), actor).await?,
            TransactionKind::Buy => uow.stock().reverse_increase(movement.id, source.clone(), actor).await?,
        };
        touched.push(movement.product_id);
    }
    Ok(touched)
}

/// Received goods go back to waiting for pickup; paid deposits are voided.
///
/// Receptions not in the expected state are left as they are.
async fn restore_receptions(uow: &mut UnitOfWork, lines: &[CartLine]) -> EngineResult<()> {
    for line in lines {
        let edge = match (
            &line.reservation_reception_id_for_receive,
            &line.reservation_reception_id_for_deposit,
        ) {
            (Some(id), _) => Some((id, ReceptionStatus::Received, ReceptionStatus::Deposited)),
            (None, Some(id)) => Some((id, ReceptionStatus::Deposited, ReceptionStatus::Canceled)),
            (None, None) => None,
        };
        let Some((reception_id, from, to)) = edge else {
            continue;
        };

        let reception = uow.reservations().require_reception(reception_id).await?;
        if reception.status != from {
            debug!(reception_id = %reception_id, status = %reception.status, "Reception left as is");
            continue;
        }
        uow.reservations().set_reception_status(reception_id, from, to).await?;
    }
    Ok(())
}
