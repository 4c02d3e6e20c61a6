//! # Payment Orchestrator
//!
//! Drives a draft to `completed` (or `paying` for terminal checkouts).
//!
//! ## Settlement Paths
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       process_payment(draft)                            │
//! │                                                                         │
//! │  one unit of work:                                                     │
//! │    stock effects ─► reception transitions ─► settlement                │
//! │                                                                         │
//! │    Cash      ±total on the register ──────────────► completed          │
//! │    Bank      −cash_portion on the register ───────► completed          │
//! │    Manual    payment record only ─────────────────► completed          │
//! │    Terminal  create checkout ─────────────────────► paying             │
//! │                                                       │                 │
//! │                     ┌─────────────────────────────────┤                 │
//! │                     ▼                                 ▼                 │
//! │        confirm_external_payment            watchdog (terminal_timeout) │
//! │        succeeded → completed               still paying → canceled     │
//! │        failed    → canceled + reversal     otherwise    → no-op        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//! Confirmation and the watchdog both re-read the status inside a unit of
//! work that holds the write lock, so whichever runs second sees the
//! other's outcome.

use chrono::Utc;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use kura_core::state::{self, Settlement};
use kura_core::stock::{StockSource, WholesaleRecord};
use kura_core::validation::{validate_cash_portion, validate_cash_tender};
use kura_core::{
    Actor, CartLine, CartRule, CashSourceKind, CoreError, Payment, PaymentMode, ReceptionStatus,
    StockSourceKind, Transaction, TransactionKind, TransactionStatus,
};
use kura_db::{generate_id, StockMove, UnitOfWork};

use crate::collaborators::{dispatch, points_key, CheckoutStatus, CollaboratorError};
use crate::error::{EngineError, EngineResult};
use crate::service::{EngineService, PaymentRequest};

/// What a payment unit of work leaves for the post-commit steps.
enum Settled {
    Completed(Vec<String>),
    Paying(Vec<String>),
}

impl EngineService {
    // =========================================================================
    // Process Payment
    // =========================================================================

    /// Applies the stock and cash effects of a draft and settles it.
    ///
    /// Retrying on a transaction that is already `paying` or `completed`
    /// returns it unchanged.
    pub async fn process_payment(
        &self,
        transaction_id: &str,
        request: &PaymentRequest,
        actor: &Actor,
    ) -> EngineResult<Transaction> {
        let settled = self
            .bounded("process_payment", async {
                let mut uow = self.db.begin().await?;
                let tx = uow.transactions().require(transaction_id).await?;

                match tx.status {
                    TransactionStatus::Draft => {}
                    TransactionStatus::Paying | TransactionStatus::Completed => {
                        debug!(transaction_id, status = %tx.status, "Payment already processed");
                        return Ok::<_, EngineError>(None);
                    }
                    TransactionStatus::Canceled => {
                        return Err(EngineError::InvalidTransition {
                            transaction_id: tx.id.clone(),
                            from: tx.status,
                            to: TransactionStatus::Completed,
                        });
                    }
                }
                if tx.is_return {
                    return Err(EngineError::InvalidInput(
                        "Returns are settled by create_return".to_string(),
                    ));
                }

                let register = uow.registers().require(&request.register_id).await?;
                let settlement =
                    state::settlement_for(tx.kind, tx.payment_method, register.terminal_device_id.is_some())?;

                let lines = uow.transactions().lines(&tx.id).await?;
                let touched = apply_line_effects(&mut uow, &tx, &lines, actor).await?;
                let cash_kind = CashSourceKind::for_transaction(tx.kind, has_deposit(&lines), false);
                let now = Utc::now();

                let mut payment = Payment {
                    id: generate_id(),
                    transaction_id: tx.id.clone(),
                    mode: PaymentMode::Pay,
                    method: tx.payment_method,
                    total_amount: tx.total_price,
                    cash_received: None,
                    cash_change: None,
                    cash_portion: None,
                    terminal_checkout_id: None,
                    external_refund_id: None,
                    created_at: now,
                };

                match settlement {
                    Settlement::Cash => {
                        let received = match tx.kind {
                            TransactionKind::Sell => request.cash_received,
                            TransactionKind::Buy => None,
                        };
                        let change = validate_cash_tender(tx.total_price, received).map_err(CoreError::from)?;
                        let signed = signed_cash(tx.kind, tx.total_price);
                        if signed != 0 {
                            uow.registers()
                                .change_cash(&register.id, signed, cash_kind, Some(&tx.id), None, actor)
                                .await?;
                        }
                        payment.cash_received = Some(received.unwrap_or(tx.total_price));
                        payment.cash_change = Some(change);
                    }
                    Settlement::Bank => {
                        let portion = request.cash_portion.unwrap_or(0);
                        validate_cash_portion(tx.total_price, portion).map_err(CoreError::from)?;
                        if portion > 0 {
                            uow.registers()
                                .change_cash(
                                    &register.id,
                                    signed_cash(tx.kind, portion),
                                    cash_kind,
                                    Some(&tx.id),
                                    Some("Cash part of bank payment"),
                                    actor,
                                )
                                .await?;
                        }
                        payment.cash_portion = Some(portion);
                    }
                    Settlement::Manual => {}
                    Settlement::Terminal => {
                        let device = register.terminal_device_id.as_deref().unwrap_or_default();
                        let checkout_id = self
                            .collaborators
                            .payments
                            .create_terminal_checkout(tx.total_price, device)
                            .await
                            .map_err(|e| payment_failure("terminal checkout", e))?;
                        uow.transactions().set_paying(&tx.id, &checkout_id, &register.id).await?;
                        uow.commit().await?;

                        info!(
                            transaction_id = %tx.id,
                            checkout_id = %checkout_id,
                            device_id = device,
                            total_price = tx.total_price,
                            "Terminal checkout started"
                        );
                        return Ok(Some(Settled::Paying(touched)));
                    }
                }

                uow.transactions().insert_payment(&payment).await?;
                uow.transactions()
                    .complete(&tx.id, TransactionStatus::Draft, Some(&register.id), now)
                    .await?;
                self.apply_points(&mut uow, &tx).await?;
                uow.commit().await?;

                info!(
                    transaction_id = %tx.id,
                    method = %tx.payment_method,
                    total_price = tx.total_price,
                    "Transaction completed"
                );
                Ok(Some(Settled::Completed(touched)))
            })
            .await?;

        match settled {
            Some(Settled::Paying(touched)) => {
                self.refresh_wholesale_stats(touched).await;
                self.spawn_watchdog(transaction_id.to_string());
            }
            Some(Settled::Completed(touched)) => {
                self.refresh_wholesale_stats(touched).await;
                let tx = self.load_transaction(transaction_id).await?;
                self.notify_completed(&tx);
                return Ok(tx);
            }
            None => {}
        }
        self.load_transaction(transaction_id).await
    }

    // =========================================================================
    // Confirm External Payment
    // =========================================================================

    /// Settles a `paying` transaction from its checkout's provider status.
    ///
    /// A second confirmation of a completed transaction is a no-op.
    pub async fn confirm_external_payment(&self, checkout_id: &str) -> EngineResult<Transaction> {
        let outcome = self
            .bounded("confirm_external_payment", async {
                let mut uow = self.db.begin().await?;
                let tx = uow
                    .transactions()
                    .find_by_checkout(checkout_id)
                    .await?
                    .ok_or_else(|| EngineError::not_found("Checkout", checkout_id))?;

                match tx.status {
                    TransactionStatus::Paying => {}
                    TransactionStatus::Completed => {
                        debug!(transaction_id = %tx.id, checkout_id, "Checkout already confirmed");
                        return Ok::<_, EngineError>(Confirmation::Unchanged(tx));
                    }
                    status => {
                        return Err(EngineError::invariant(format!(
                            "Checkout {} confirmed for transaction {} in status {}",
                            checkout_id, tx.id, status
                        )));
                    }
                }

                let status = self
                    .collaborators
                    .payments
                    .confirm_checkout(checkout_id)
                    .await
                    .map_err(|e| payment_failure("checkout confirmation", e))?;

                match status {
                    CheckoutStatus::Pending => {
                        debug!(transaction_id = %tx.id, checkout_id, "Checkout still pending");
                        Ok(Confirmation::Unchanged(tx))
                    }
                    CheckoutStatus::Succeeded => {
                        let now = Utc::now();
                        uow.transactions()
                            .insert_payment(&Payment {
                                id: generate_id(),
                                transaction_id: tx.id.clone(),
                                mode: PaymentMode::Pay,
                                method: tx.payment_method,
                                total_amount: tx.total_price,
                                cash_received: None,
                                cash_change: None,
                                cash_portion: None,
                                terminal_checkout_id: Some(checkout_id.to_string()),
                                external_refund_id: None,
                                created_at: now,
                            })
                            .await?;
                        uow.transactions()
                            .complete(&tx.id, TransactionStatus::Paying, None, now)
                            .await?;
                        self.apply_points(&mut uow, &tx).await?;
                        uow.commit().await?;

                        info!(transaction_id = %tx.id, checkout_id, "Terminal payment confirmed");
                        Ok(Confirmation::Completed(tx.id))
                    }
                    CheckoutStatus::Failed | CheckoutStatus::Canceled => {
                        let touched = cancel_paying(&mut uow, &tx, &Actor::system()).await?;
                        uow.commit().await?;

                        warn!(transaction_id = %tx.id, checkout_id, ?status, "Terminal payment rejected, transaction canceled");
                        Ok(Confirmation::Rejected(tx.id, status, touched))
                    }
                }
            })
            .await?;

        match outcome {
            Confirmation::Unchanged(tx) => Ok(tx),
            Confirmation::Completed(id) => {
                let tx = self.load_transaction(&id).await?;
                self.notify_completed(&tx);
                Ok(tx)
            }
            Confirmation::Rejected(id, status, touched) => {
                self.refresh_wholesale_stats(touched).await;
                Err(EngineError::ExternalPaymentFailure(format!(
                    "Checkout {} for transaction {} was {}",
                    checkout_id,
                    id,
                    match status {
                        CheckoutStatus::Canceled => "canceled",
                        _ => "declined",
                    }
                )))
            }
        }
    }

    // =========================================================================
    // Timeout Cancel
    // =========================================================================

    /// Cancels a transaction still `paying` and reverses its effects.
    ///
    /// Any other status is left alone.
    pub async fn timeout_cancel(&self, transaction_id: &str) -> EngineResult<Transaction> {
        let touched = self
            .bounded("timeout_cancel", async {
                let mut uow = self.db.begin().await?;
                let tx = uow.transactions().require(transaction_id).await?;
                if tx.status != TransactionStatus::Paying {
                    info!(transaction_id, status = %tx.status, "Timeout cancel skipped, transaction no longer paying");
                    return Ok::<_, EngineError>(None);
                }

                let touched = cancel_paying(&mut uow, &tx, &Actor::system()).await?;
                uow.commit().await?;
                warn!(transaction_id, checkout_id = ?tx.terminal_checkout_id, "Terminal payment timed out, transaction canceled");
                Ok(Some(touched))
            })
            .await?;

        if let Some(touched) = touched {
            self.refresh_wholesale_stats(touched).await;
        }
        self.load_transaction(transaction_id).await
    }

    /// Schedules [`Self::timeout_cancel`] after the terminal timeout.
    ///
    /// The task only acts if the transaction is still `paying` when it wakes.
    pub fn spawn_watchdog(&self, transaction_id: String) -> JoinHandle<()> {
        let engine = self.clone();
        let delay = self.timeouts.terminal;
        debug!(transaction_id = %transaction_id, delay_ms = delay.as_millis() as u64, "Payment watchdog scheduled");

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match engine.timeout_cancel(&transaction_id).await {
                Ok(tx) => debug!(transaction_id = %transaction_id, status = %tx.status, "Payment watchdog finished"),
                Err(e) => error!(transaction_id = %transaction_id, error = %e, "Payment watchdog failed"),
            }
        })
    }

    // =========================================================================
    // Shared Steps
    // =========================================================================

    /// Debits spent points and credits earned ones for a completed sale.
    pub(crate) async fn apply_points(&self, uow: &mut UnitOfWork, tx: &Transaction) -> EngineResult<()> {
        if !self.points_enabled || tx.kind != TransactionKind::Sell {
            return Ok(());
        }
        let Some(customer_id) = tx.customer_id.as_deref() else {
            return Ok(());
        };

        let loyalty = &self.collaborators.loyalty;
        if tx.used_point > 0 {
            loyalty
                .use_points(customer_id, tx.used_point, &points_key(&tx.id, "use"))
                .await
                .map_err(|e| payment_failure("point usage", e))?;
        }
        let grant = loyalty
            .add_points(customer_id, tx.total_price, &points_key(&tx.id, "earn"))
            .await
            .map_err(|e| payment_failure("point credit", e))?;
        uow.transactions()
            .set_points(&tx.id, grant.amount, grant.new_total)
            .await?;

        debug!(
            transaction_id = %tx.id,
            customer_id,
            used_point = tx.used_point,
            point_amount = grant.amount,
            "Points applied"
        );
        Ok(())
    }

    fn notify_completed(&self, tx: &Transaction) {
        if let Some(customer_id) = &tx.customer_id {
            dispatch(
                &self.collaborators.notifier,
                "transaction_completed",
                customer_id.clone(),
                json!({
                    "transaction_id": tx.id,
                    "kind": tx.kind,
                    "total_price": tx.total_price,
                    "point_amount": tx.point_amount,
                }),
            );
        }
    }
}

enum Confirmation {
    Unchanged(Transaction),
    Completed(String),
    Rejected(String, CheckoutStatus, Vec<String>),
}

/// Register delta for money moving in the transaction's direction.
pub(crate) fn signed_cash(kind: TransactionKind, amount: i64) -> i64 {
    match kind {
        TransactionKind::Sell => amount,
        TransactionKind::Buy => -amount,
    }
}

pub(crate) fn has_deposit(lines: &[CartLine]) -> bool {
    lines.iter().any(|l| l.reservation_reception_id_for_deposit.is_some())
}

pub(crate) fn payment_failure(step: &str, err: CollaboratorError) -> EngineError {
    warn!(step, error = %err, "Collaborator call failed");
    EngineError::ExternalPaymentFailure(format!("{}: {}", step, err))
}

/// Stock and reception effects of paying a draft's lines.
///
/// Returns the products whose lots changed.
async fn apply_line_effects(
    uow: &mut UnitOfWork,
    tx: &Transaction,
    lines: &[CartLine],
    actor: &Actor,
) -> EngineResult<Vec<String>> {
    let mut touched = Vec::new();

    for line in lines {
        if let Some(reception_id) = &line.reservation_reception_id_for_deposit {
            // deposits reserve future stock; nothing moves yet
            move_reception(
                uow,
                reception_id,
                ReceptionStatus::Created,
                ReceptionStatus::Deposited,
                CartRule::ReceptionNotCreated,
            )
            .await?;
            continue;
        }

        match tx.kind {
            TransactionKind::Sell => {
                let mv = StockMove::new(
                    &line.product_id,
                    line.item_count,
                    StockSource::Sell {
                        transaction_id: tx.id.clone(),
                    },
                    actor,
                )
                .unit_price(line.total_unit_price);
                let change = uow.stock().decrease(&mv).await?;
                uow.transactions()
                    .set_line_wholesale(&line.id, change.total_wholesale_price, change.nothing_count)
                    .await?;

                if let Some(reception_id) = &line.reservation_reception_id_for_receive {
                    move_reception(
                        uow,
                        reception_id,
                        ReceptionStatus::Deposited,
                        ReceptionStatus::Received,
                        CartRule::ReceptionNotDeposited,
                    )
                    .await?;
                }
            }
            TransactionKind::Buy => {
                let mv = StockMove::new(
                    &line.product_id,
                    line.item_count,
                    StockSource::Buy {
                        transaction_id: tx.id.clone(),
                    },
                    actor,
                );
                let records = [WholesaleRecord::new(line.total_unit_price, line.item_count)];
                let change = uow.stock().increase(&mv, &records).await?;
                uow.transactions()
                    .set_line_wholesale(&line.id, change.total_wholesale_price, 0)
                    .await?;
            }
        }
        touched.push(line.product_id.clone());
    }

    Ok(touched)
}

/// Moves a reception along one edge, failing like the cart rule that would
/// have caught the stale status at validation time.
pub(crate) async fn move_reception(
    uow: &mut UnitOfWork,
    reception_id: &str,
    from: ReceptionStatus,
    to: ReceptionStatus,
    rule: CartRule,
) -> EngineResult<()> {
    let reception = uow.reservations().require_reception(reception_id).await?;
    if reception.status != from {
        return Err(EngineError::InvalidCartLine {
            product_id: None,
            rule,
            reason: format!("Reception {} is {}, expected {}", reception_id, reception.status, from),
        });
    }
    uow.reservations().set_reception_status(reception_id, from, to).await?;
    Ok(())
}

/// Undoes every effect of a `paying` transaction and cancels it.
async fn cancel_paying(uow: &mut UnitOfWork, tx: &Transaction, actor: &Actor) -> EngineResult<Vec<String>> {
    let mut touched = Vec::new();
    let source_kind = match tx.kind {
        TransactionKind::Sell => StockSourceKind::TransactionSell,
        TransactionKind::Buy => StockSourceKind::TransactionBuy,
    };

    for movement in uow.stock().open_movements_for_source(source_kind, &tx.id).await? {
        let source = StockSource::Reversal {
            transaction_id: tx.id.clone(),
        };
        if movement.item_count < 0 {
            uow.stock().reverse_decrease(movement.id, source, actor).await?;
        } else {
            uow.stock().reverse_increase(movement.id, source, actor).await?;
        }
        touched.push(movement.product_id);
    }

    for movement in uow.registers().movements_for_source(&tx.id).await? {
        if !movement.source_kind.is_payment() {
            continue;
        }
        uow.registers()
            .change_cash(
                &movement.register_id,
                -movement.change_price,
                CashSourceKind::TransactionCancel,
                Some(&tx.id),
                Some("Payment canceled"),
                actor,
            )
            .await?;
    }

    for line in uow.transactions().lines(&tx.id).await? {
        if let Some(reception_id) = &line.reservation_reception_id_for_deposit {
            uow.reservations()
                .set_reception_status(reception_id, ReceptionStatus::Deposited, ReceptionStatus::Created)
                .await?;
        }
        if let Some(reception_id) = &line.reservation_reception_id_for_receive {
            uow.reservations()
                .set_reception_status(reception_id, ReceptionStatus::Received, ReceptionStatus::Deposited)
                .await?;
        }
    }

    uow.transactions()
        .update_status(&tx.id, TransactionStatus::Paying, TransactionStatus::Canceled)
        .await?;
    Ok(touched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        cart, draft, engine, line, paid_sell, seed_product, seed_register, seed_reservation, stock_lots, staff,
        wait_for_status,
    };
    use kura_core::PaymentMethod;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cash_sale_completes_with_fifo_cost() {
        let (svc, fakes) = engine().await;
        seed_product(&svc, "p-1", 0, 0).await;
        stock_lots(&svc, "p-1", &[(100, 5), (120, 5)]).await;
        seed_register(&svc, "reg-1", None).await;

        let tx = paid_sell(&svc, vec![line("p-1", 7, 1000)], PaymentMethod::Cash, "reg-1", Some(8000)).await;
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(tx.register_id.as_deref(), Some("reg-1"));
        assert!(tx.finished_at.is_some());

        let snapshot = svc.get_transaction(&tx.id).await.unwrap();
        assert_eq!(snapshot.lines[0].wholesale_total_price, Some(740));
        let payment = snapshot.payment.unwrap();
        assert_eq!(payment.cash_received, Some(8000));
        assert_eq!(payment.cash_change, Some(1000));

        let mut uow = svc.database().begin_read().await.unwrap();
        assert_eq!(uow.products().require("p-1").await.unwrap().stock_number, 3);
        let register = uow.registers().require("reg-1").await.unwrap();
        assert_eq!(register.cash_balance, 7000);
        drop(uow);

        assert!(fakes.payments.calls().is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_stock_rolls_back_everything() {
        let (svc, _fakes) = engine().await;
        seed_product(&svc, "p-1", 3, 100).await;
        seed_product(&svc, "p-2", 10, 100).await;
        seed_register(&svc, "reg-1", None).await;

        let tx = svc
            .create_transaction(
                draft(cart(
                    TransactionKind::Sell,
                    PaymentMethod::Cash,
                    vec![line("p-2", 2, 1000), line("p-1", 5, 1000)],
                )),
                &staff(),
            )
            .await
            .unwrap();

        let err = svc
            .process_payment(&tx.id, &cash("reg-1"), &staff())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientStock { available: 3, requested: 5, .. }));

        let mut uow = svc.database().begin_read().await.unwrap();
        assert_eq!(uow.products().require("p-2").await.unwrap().stock_number, 10);
        assert_eq!(uow.registers().require("reg-1").await.unwrap().cash_balance, 0);
        assert_eq!(uow.transactions().require(&tx.id).await.unwrap().status, TransactionStatus::Draft);
    }

    #[tokio::test]
    async fn test_cash_buy_pays_out_and_creates_lots() {
        let (svc, _fakes) = engine().await;
        seed_product(&svc, "p-1", 0, 0).await;
        seed_register(&svc, "reg-1", None).await;

        let tx = svc
            .create_transaction(
                draft(cart(TransactionKind::Buy, PaymentMethod::Cash, vec![line("p-1", 2, 300)])),
                &staff(),
            )
            .await
            .unwrap();
        let tx = svc.process_payment(&tx.id, &cash("reg-1"), &staff()).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Completed);

        let mut uow = svc.database().begin_read().await.unwrap();
        assert_eq!(uow.registers().require("reg-1").await.unwrap().cash_balance, -600);
        let lots = uow.stock().lots_for_product("p-1").await.unwrap();
        assert_eq!(lots.len(), 1);
        assert_eq!(lots[0].unit_price, 300);
        assert!(lots[0].is_price_anchor);
    }

    #[tokio::test]
    async fn test_bank_buy_moves_only_cash_portion() {
        let (svc, _fakes) = engine().await;
        seed_product(&svc, "p-1", 0, 0).await;
        seed_register(&svc, "reg-1", None).await;

        let tx = svc
            .create_transaction(
                draft(cart(TransactionKind::Buy, PaymentMethod::Bank, vec![line("p-1", 4, 500)])),
                &staff(),
            )
            .await
            .unwrap();

        let request = PaymentRequest {
            register_id: "reg-1".to_string(),
            cash_received: None,
            cash_portion: Some(5000),
        };
        let err = svc.process_payment(&tx.id, &request, &staff()).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));

        let request = PaymentRequest {
            cash_portion: Some(500),
            ..request
        };
        let tx = svc.process_payment(&tx.id, &request, &staff()).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Completed);

        let snapshot = svc.get_transaction(&tx.id).await.unwrap();
        assert_eq!(snapshot.payment.unwrap().cash_portion, Some(500));

        let mut uow = svc.database().begin_read().await.unwrap();
        assert_eq!(uow.registers().require("reg-1").await.unwrap().cash_balance, -500);
    }

    #[tokio::test]
    async fn test_card_without_terminal_is_recorded_manually() {
        let (svc, fakes) = engine().await;
        seed_product(&svc, "p-1", 2, 100).await;
        seed_register(&svc, "reg-1", None).await;

        let tx = paid_sell(&svc, vec![line("p-1", 1, 1000)], PaymentMethod::Card, "reg-1", None).await;
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert!(tx.terminal_checkout_id.is_none());
        assert!(fakes.payments.calls().is_empty());

        let mut uow = svc.database().begin_read().await.unwrap();
        assert_eq!(uow.registers().require("reg-1").await.unwrap().cash_balance, 0);
    }

    #[tokio::test]
    async fn test_terminal_payment_confirmed_once() {
        let (svc, fakes) = engine().await;
        seed_product(&svc, "p-1", 2, 100).await;
        seed_register(&svc, "reg-2", Some("device-9")).await;

        let mut request = cart(TransactionKind::Sell, PaymentMethod::Card, vec![line("p-1", 1, 1000)]);
        request.customer_id = Some("cust-1".to_string());
        let tx = svc.create_transaction(draft(request), &staff()).await.unwrap();
        let tx = svc.process_payment(&tx.id, &cash("reg-2"), &staff()).await.unwrap();

        assert_eq!(tx.status, TransactionStatus::Paying);
        let checkout_id = tx.terminal_checkout_id.clone().unwrap();
        assert_eq!(fakes.payments.calls(), vec![format!("checkout 1000 device-9")]);

        fakes.payments.set_checkout_status(CheckoutStatus::Succeeded);
        let first = svc.confirm_external_payment(&checkout_id).await.unwrap();
        let second = svc.confirm_external_payment(&checkout_id).await.unwrap();

        assert_eq!(first.status, TransactionStatus::Completed);
        assert_eq!(second.status, TransactionStatus::Completed);
        assert_eq!(first.point_amount, 10);
        assert_eq!(fakes.loyalty.balance("cust-1"), 10);

        let snapshot = svc.get_transaction(&tx.id).await.unwrap();
        assert_eq!(snapshot.payment.unwrap().terminal_checkout_id, Some(checkout_id));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fakes.notifier.sent(), vec!["transaction_completed cust-1".to_string()]);
    }

    #[tokio::test]
    async fn test_pending_checkout_stays_paying() {
        let (svc, fakes) = engine().await;
        seed_product(&svc, "p-1", 2, 100).await;
        seed_register(&svc, "reg-2", Some("device-9")).await;

        let tx = paid_sell(&svc, vec![line("p-1", 1, 1000)], PaymentMethod::Qr, "reg-2", None).await;
        fakes.payments.set_checkout_status(CheckoutStatus::Pending);

        let tx = svc
            .confirm_external_payment(tx.terminal_checkout_id.as_deref().unwrap())
            .await
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Paying);
    }

    #[tokio::test]
    async fn test_declined_checkout_cancels_and_restores_stock() {
        let (svc, fakes) = engine().await;
        seed_product(&svc, "p-1", 2, 100).await;
        seed_register(&svc, "reg-2", Some("device-9")).await;

        let tx = paid_sell(&svc, vec![line("p-1", 2, 1000)], PaymentMethod::Card, "reg-2", None).await;
        let mut uow = svc.database().begin_read().await.unwrap();
        assert_eq!(uow.products().require("p-1").await.unwrap().stock_number, 0);
        drop(uow);

        fakes.payments.set_checkout_status(CheckoutStatus::Failed);
        let err = svc
            .confirm_external_payment(tx.terminal_checkout_id.as_deref().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ExternalPaymentFailure(_)));

        let mut uow = svc.database().begin_read().await.unwrap();
        assert_eq!(uow.transactions().require(&tx.id).await.unwrap().status, TransactionStatus::Canceled);
        assert_eq!(uow.products().require("p-1").await.unwrap().stock_number, 2);
        let lots = uow.stock().lots_for_product("p-1").await.unwrap();
        assert_eq!(lots[0].remaining_item_count, 2);
        drop(uow);

        // confirming a canceled checkout is a defect in the caller
        let err = svc
            .confirm_external_payment(tx.terminal_checkout_id.as_deref().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn test_watchdog_cancels_unconfirmed_checkout() {
        let (mut svc, _fakes) = engine().await;
        svc.timeouts.terminal = Duration::from_millis(200);
        seed_product(&svc, "p-1", 3, 100).await;
        seed_register(&svc, "reg-2", Some("device-9")).await;

        let tx = paid_sell(&svc, vec![line("p-1", 1, 1000)], PaymentMethod::Card, "reg-2", None).await;
        assert_eq!(tx.status, TransactionStatus::Paying);

        let tx = wait_for_status(&svc, &tx.id, TransactionStatus::Canceled).await;
        assert_eq!(tx.status, TransactionStatus::Canceled);

        let mut uow = svc.database().begin_read().await.unwrap();
        assert_eq!(uow.products().require("p-1").await.unwrap().stock_number, 3);
        let movements = uow.stock().movements_for_product("p-1").await.unwrap();
        let last = movements.last().unwrap();
        assert_eq!(last.source_kind, StockSourceKind::Reversal);
        assert_eq!(last.item_count, 1);
    }

    #[tokio::test]
    async fn test_watchdog_after_confirmation_is_noop() {
        let (mut svc, fakes) = engine().await;
        svc.timeouts.terminal = Duration::from_millis(200);
        seed_product(&svc, "p-1", 3, 100).await;
        seed_register(&svc, "reg-2", Some("device-9")).await;

        let tx = paid_sell(&svc, vec![line("p-1", 1, 1000)], PaymentMethod::Card, "reg-2", None).await;
        fakes.payments.set_checkout_status(CheckoutStatus::Succeeded);
        svc.confirm_external_payment(tx.terminal_checkout_id.as_deref().unwrap())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        let tx = svc.timeout_cancel(&tx.id).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Completed);

        let mut uow = svc.database().begin_read().await.unwrap();
        assert_eq!(uow.products().require("p-1").await.unwrap().stock_number, 2);
    }

    #[tokio::test]
    async fn test_timeout_cancel_reverses_cash_exactly() {
        let (svc, _fakes) = engine().await;
        seed_product(&svc, "p-1", 3, 100).await;
        seed_register(&svc, "reg-1", None).await;

        let tx = svc
            .create_transaction(
                draft(cart(TransactionKind::Sell, PaymentMethod::Cash, vec![line("p-1", 1, 1000)])),
                &staff(),
            )
            .await
            .unwrap();

        // a paying transaction that already moved cash, as an interrupted
        // settlement would leave it
        let mut uow = svc.database().begin().await.unwrap();
        uow.registers()
            .change_cash("reg-1", 1000, CashSourceKind::TransactionSell, Some(&tx.id), None, &staff())
            .await
            .unwrap();
        uow.transactions().set_paying(&tx.id, "chk-manual", "reg-1").await.unwrap();
        uow.commit().await.unwrap();

        let tx = svc.timeout_cancel(&tx.id).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Canceled);

        let mut uow = svc.database().begin_read().await.unwrap();
        assert_eq!(uow.registers().require("reg-1").await.unwrap().cash_balance, 0);
        let movements = uow.registers().movements_for_source(&tx.id).await.unwrap();
        let net: i64 = movements.iter().map(|m| m.change_price).sum();
        assert_eq!(net, 0);
        assert_eq!(movements.last().unwrap().source_kind, CashSourceKind::TransactionCancel);
    }

    #[tokio::test]
    async fn test_process_payment_is_retry_safe() {
        let (svc, _fakes) = engine().await;
        seed_product(&svc, "p-1", 3, 100).await;
        seed_register(&svc, "reg-1", None).await;

        let tx = paid_sell(&svc, vec![line("p-1", 1, 1000)], PaymentMethod::Cash, "reg-1", None).await;
        let again = svc.process_payment(&tx.id, &cash("reg-1"), &staff()).await.unwrap();
        assert_eq!(again.status, TransactionStatus::Completed);

        let mut uow = svc.database().begin_read().await.unwrap();
        assert_eq!(uow.products().require("p-1").await.unwrap().stock_number, 2);
        assert_eq!(uow.registers().require("reg-1").await.unwrap().cash_balance, 1000);
    }

    #[tokio::test]
    async fn test_deposit_and_receive_move_reception() {
        let (svc, _fakes) = engine().await;
        seed_product(&svc, "p-1", 5, 100).await;
        seed_register(&svc, "reg-1", None).await;
        seed_reservation(&svc, "res-1", "p-1", 500, "rec-1", "cust-1").await;

        let mut deposit = line("p-1", 2, 0);
        deposit.reservation_price = 500;
        deposit.reservation_reception_id_for_deposit = Some("rec-1".to_string());
        let mut request = cart(TransactionKind::Sell, PaymentMethod::Cash, vec![deposit]);
        request.customer_id = Some("cust-1".to_string());
        let tx = svc.create_transaction(draft(request), &staff()).await.unwrap();
        assert_eq!(tx.total_price, 1000);
        svc.process_payment(&tx.id, &cash("reg-1"), &staff()).await.unwrap();

        let mut uow = svc.database().begin_read().await.unwrap();
        assert_eq!(
            uow.reservations().require_reception("rec-1").await.unwrap().status,
            ReceptionStatus::Deposited
        );
        assert_eq!(uow.products().require("p-1").await.unwrap().stock_number, 5);
        drop(uow);

        let mut receive = line("p-1", 2, 1000);
        receive.reservation_price = -500;
        receive.reservation_reception_id_for_receive = Some("rec-1".to_string());
        let mut request = cart(TransactionKind::Sell, PaymentMethod::Cash, vec![receive]);
        request.customer_id = Some("cust-1".to_string());
        let tx = svc.create_transaction(draft(request), &staff()).await.unwrap();
        assert_eq!(tx.total_price, 1000);
        svc.process_payment(&tx.id, &cash("reg-1"), &staff()).await.unwrap();

        let mut uow = svc.database().begin_read().await.unwrap();
        assert_eq!(
            uow.reservations().require_reception("rec-1").await.unwrap().status,
            ReceptionStatus::Received
        );
        assert_eq!(uow.products().require("p-1").await.unwrap().stock_number, 3);
        assert_eq!(uow.registers().require("reg-1").await.unwrap().cash_balance, 2000);
    }

    #[tokio::test]
    async fn test_create_and_pay_in_one_call() {
        let (svc, _fakes) = engine().await;
        seed_product(&svc, "p-1", 3, 100).await;
        seed_register(&svc, "reg-1", None).await;

        let mut request = draft(cart(TransactionKind::Sell, PaymentMethod::Cash, vec![line("p-1", 1, 1000)]));
        request.as_draft = false;
        let err = svc.create_transaction(request.clone(), &staff()).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));

        request.payment = Some(cash("reg-1"));
        let tx = svc.create_transaction(request, &staff()).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Completed);
    }

    #[tokio::test]
    async fn test_points_apply_once_across_rolled_back_settlement() {
        let (svc, fakes) = engine().await;
        seed_product(&svc, "p-1", 2, 100).await;
        seed_register(&svc, "reg-1", None).await;
        fakes.loyalty.credit("cust-1", 20);

        let mut request = cart(TransactionKind::Sell, PaymentMethod::Cash, vec![line("p-1", 1, 1000)]);
        request.customer_id = Some("cust-1".to_string());
        let mut create = draft(request);
        create.used_point = 5;
        let tx = svc.create_transaction(create, &staff()).await.unwrap();

        // the ledger saw the points but the unit of work never committed
        let mut uow = svc.database().begin().await.unwrap();
        svc.apply_points(&mut uow, &tx).await.unwrap();
        drop(uow);
        assert_eq!(fakes.loyalty.balance("cust-1"), 24);

        let tx = svc.process_payment(&tx.id, &cash("reg-1"), &staff()).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(tx.point_amount, 9);
        assert_eq!(tx.total_point_amount, 24);
        assert_eq!(fakes.loyalty.balance("cust-1"), 24);
    }

    fn cash(register_id: &str) -> PaymentRequest {
        PaymentRequest {
            register_id: register_id.to_string(),
            cash_received: None,
            cash_portion: None,
        }
    }

    #[test]
    fn test_cash_sign_follows_kind() {
        assert_eq!(signed_cash(TransactionKind::Sell, 500), 500);
        assert_eq!(signed_cash(TransactionKind::Buy, 500), -500);
        assert!(PaymentMethod::Card.is_terminal());
    }
}
