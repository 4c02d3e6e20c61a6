//! # Engine Service
//!
//! The entry point callers hold. Every mutating call opens one unit of work,
//! bounds it with the configured timeout, and commits only when every effect
//! succeeded.
//!
//! ## Operation Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  service.rs                payment.rs                returns.rs         │
//! │  ──────────                ──────────                ──────────         │
//! │  validate_cart             process_payment           create_return      │
//! │  create_transaction ─────► confirm_external_payment                     │
//! │  cancel_draft              timeout_cancel ◄── watchdog                  │
//! │  get_transaction                                                        │
//! │  adjust_stock / record_loss / rollback_loss                             │
//! │  record_ec_sale / return_ec_sale                                        │
//! │  refresh_set_deal_statuses                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use kura_core::cart::{self, ChannelRestriction};
use kura_core::set_deal;
use kura_core::state;
use kura_core::stock::{split_cost, StockSource, WholesaleRecord};
use kura_core::validation::{
    validate_adjustment, validate_description, validate_id, validate_item_count,
    validate_point_usage,
};
use kura_core::{
    Actor, CartContext, CartLine, CartRequest, CommissionTable, LotResourceType, Money, PricedLine,
    SetDealStatus, StockSourceKind, TaxMode, TaxRate, Transaction, TransactionKind,
    TransactionSnapshot, TransactionStatus, ValidatedCart,
};
use kura_db::{generate_id, Database, StockChange, StockMove, UnitOfWork};

use crate::collaborators::Collaborators;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

// =============================================================================
// Requests
// =============================================================================

/// How a draft gets paid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub register_id: String,
    /// Cash handed over for a cash sale; `None` means exact tender.
    #[serde(default)]
    pub cash_received: Option<i64>,
    /// Cash part of a bank buy.
    #[serde(default)]
    pub cash_portion: Option<i64>,
}

/// Input of [`EngineService::create_transaction`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransaction {
    /// Caller-chosen id; repeating a create with the same id returns the
    /// stored transaction.
    #[serde(default)]
    pub id: Option<String>,
    pub cart: CartRequest,
    #[serde(default)]
    pub channel_restriction: Option<ChannelRestriction>,
    #[serde(default)]
    pub tax_mode: TaxMode,
    #[serde(default)]
    pub tax_rate_bps: u32,
    #[serde(default)]
    pub used_point: i64,
    /// Keep as draft; otherwise `payment` is processed right away.
    #[serde(default = "default_as_draft")]
    pub as_draft: bool,
    #[serde(default)]
    pub payment: Option<PaymentRequest>,
}

fn default_as_draft() -> bool {
    true
}

/// Manual signed stock correction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdjustStock {
    pub product_id: String,
    /// Positive adds units, negative removes them.
    pub change_count: i64,
    /// Total cost of added units; defaults to the product's buy price per unit.
    #[serde(default)]
    pub total_cost: Option<i64>,
    #[serde(default)]
    pub adjustment_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Tags the lots an increase creates, e.g. units from an opened pack.
    #[serde(default)]
    pub resource_type: LotResourceType,
    #[serde(default)]
    pub resource_id: Option<String>,
}

// =============================================================================
// Service
// =============================================================================

/// Timeouts resolved from [`EngineConfig`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct Timeouts {
    pub unit_of_work: Duration,
    pub terminal: Duration,
    pub refund_wait: Duration,
    pub refund_poll_initial: Duration,
    pub refund_poll_max: Duration,
}

/// Transaction and inventory engine.
///
/// Cheap to clone; clones share the pool and collaborators, which is how the
/// payment watchdog carries the engine into its background task.
#[derive(Debug, Clone)]
pub struct EngineService {
    pub(crate) db: Database,
    pub(crate) collaborators: Collaborators,
    pub(crate) commission: CommissionTable,
    pub(crate) points_enabled: bool,
    pub(crate) timeouts: Timeouts,
}

impl EngineService {
    pub fn new(db: Database, config: &EngineConfig, collaborators: Collaborators) -> EngineResult<Self> {
        config.validate()?;
        Ok(EngineService {
            db,
            collaborators,
            commission: config.commission.table()?,
            points_enabled: config.store.points_enabled,
            timeouts: Timeouts {
                unit_of_work: config.unit_of_work_timeout(),
                terminal: config.terminal_timeout(),
                refund_wait: config.refund_wait_timeout(),
                refund_poll_initial: config.refund_poll_initial(),
                refund_poll_max: config.refund_poll_max(),
            },
        })
    }

    /// Opens the configured database and builds the engine on it.
    pub async fn connect(config: &EngineConfig, collaborators: Collaborators) -> EngineResult<Self> {
        config.validate()?;
        let db = Database::new(config.db_config()).await?;
        Self::new(db, config, collaborators)
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Runs `op` under the unit-of-work timeout.
    ///
    /// A unit of work still open when the timer fires is dropped, which rolls
    /// it back.
    pub(crate) async fn bounded<T, F>(&self, operation: &'static str, op: F) -> EngineResult<T>
    where
        F: Future<Output = EngineResult<T>>,
    {
        match tokio::time::timeout(self.timeouts.unit_of_work, op).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, timeout_secs = self.timeouts.unit_of_work.as_secs(), "Unit of work timed out");
                Err(EngineError::ConcurrencyAborted(format!(
                    "{} did not finish within {:?}",
                    operation, self.timeouts.unit_of_work
                )))
            }
        }
    }

    // =========================================================================
    // Cart
    // =========================================================================

    /// Validates and prices a cart without persisting anything.
    pub async fn validate_cart(
        &self,
        request: &CartRequest,
        restriction: Option<ChannelRestriction>,
    ) -> EngineResult<ValidatedCart> {
        let mut uow = self.db.begin_read().await?;
        let ctx = self.cart_context(&mut uow, request, restriction, Utc::now()).await?;
        let validated = cart::validate(request, &ctx)?;
        debug!(
            store_id = %request.store_id,
            lines = validated.lines.len(),
            subtotal_price = validated.subtotal_price,
            "Cart validated"
        );
        Ok(validated)
    }

    /// Bulk-loads what the validator reads.
    async fn cart_context(
        &self,
        uow: &mut UnitOfWork,
        request: &CartRequest,
        restriction: Option<ChannelRestriction>,
        at: DateTime<Utc>,
    ) -> EngineResult<CartContext> {
        let product_ids: Vec<String> = request
            .lines
            .iter()
            .map(|l| l.product_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        Ok(CartContext {
            products: uow.products().get_many(&product_ids).await?,
            reservations: uow.reservations().states_for_products(&product_ids).await?,
            set_deals: uow.set_deals().definitions_for_store(&request.store_id).await?,
            channel_restriction: restriction,
            commission: self.commission.clone(),
            at,
        })
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Validates the cart and stores it as a draft.
    ///
    /// With `as_draft = false` the attached payment is processed right after
    /// the draft commits.
    pub async fn create_transaction(&self, request: CreateTransaction, actor: &Actor) -> EngineResult<Transaction> {
        if let Some(id) = &request.id {
            validate_id("transaction_id", id).map_err(kura_core::CoreError::from)?;
        }
        validate_point_usage(request.used_point, request.cart.customer_id.is_some())
            .map_err(kura_core::CoreError::from)?;
        if request.used_point > 0 && request.cart.kind == TransactionKind::Buy {
            return Err(EngineError::InvalidInput(
                "Points can only be spent on sell transactions".to_string(),
            ));
        }
        // reject method/kind pairs no register could settle
        state::settlement_for(request.cart.kind, request.cart.payment_method, true)?;

        let payment = match (request.as_draft, &request.payment) {
            (true, _) => None,
            (false, Some(payment)) => Some(payment.clone()),
            (false, None) => {
                return Err(EngineError::InvalidInput(
                    "A payment is required unless the transaction is kept as a draft".to_string(),
                ))
            }
        };

        let (tx, created) = self
            .bounded("create_transaction", async {
                let mut uow = self.db.begin().await?;

                if let Some(id) = &request.id {
                    if let Some(existing) = uow.transactions().get(id).await? {
                        debug!(transaction_id = %id, "Transaction already exists, returning it");
                        return Ok((existing, false));
                    }
                }

                let now = Utc::now();
                let ctx = self
                    .cart_context(&mut uow, &request.cart, request.channel_restriction.clone(), now)
                    .await?;
                let validated = cart::validate(&request.cart, &ctx)?;
                let tx = draft_from_cart(&request, &validated, actor, now)?;
                let lines = lines_for(&tx.id, &validated.lines);

                uow.transactions().insert(&tx).await?;
                uow.transactions().insert_lines(&lines).await?;
                uow.transactions()
                    .insert_set_deals(&tx.id, &validated.applied_set_deals)
                    .await?;
                uow.commit().await?;
                Ok::<_, EngineError>((tx, true))
            })
            .await?;

        if created {
            info!(
                transaction_id = %tx.id,
                kind = %tx.kind,
                total_price = tx.total_price,
                "Transaction created"
            );
        }

        match payment {
            Some(payment) if tx.status == TransactionStatus::Draft => {
                self.process_payment(&tx.id, &payment, actor).await
            }
            _ => Ok(tx),
        }
    }

    /// `draft → canceled`, with no other effect.
    pub async fn cancel_draft(&self, transaction_id: &str, actor: &Actor) -> EngineResult<Transaction> {
        self.bounded("cancel_draft", async {
            let mut uow = self.db.begin().await?;
            let tx = uow.transactions().require(transaction_id).await?;
            if tx.status != TransactionStatus::Draft {
                return Err(EngineError::InvalidInput(format!(
                    "Only drafts can be canceled; transaction {} is {}",
                    transaction_id, tx.status
                )));
            }
            uow.transactions()
                .update_status(transaction_id, TransactionStatus::Draft, TransactionStatus::Canceled)
                .await?;
            let tx = uow.transactions().require(transaction_id).await?;
            uow.commit().await?;

            info!(transaction_id, staff_id = %actor.staff_id, "Draft canceled");
            Ok::<_, EngineError>(tx)
        })
        .await
    }

    /// The transaction with its lines and payment, for receipts.
    pub async fn get_transaction(&self, transaction_id: &str) -> EngineResult<TransactionSnapshot> {
        let mut uow = self.db.begin_read().await?;
        let transaction = uow.transactions().require(transaction_id).await?;
        let lines = uow.transactions().lines(transaction_id).await?;
        let payment = uow.transactions().payment_for(transaction_id).await?;
        Ok(TransactionSnapshot {
            transaction,
            lines,
            payment,
        })
    }

    pub(crate) async fn load_transaction(&self, transaction_id: &str) -> EngineResult<Transaction> {
        let mut uow = self.db.begin_read().await?;
        Ok(uow.transactions().require(transaction_id).await?)
    }

    // =========================================================================
    // Manual Stock Operations
    // =========================================================================

    /// Records a manual correction; increases create cost lots.
    pub async fn adjust_stock(&self, request: AdjustStock, actor: &Actor) -> EngineResult<StockChange> {
        validate_adjustment(request.change_count).map_err(kura_core::CoreError::from)?;
        let description =
            validate_description(request.description.as_deref()).map_err(kura_core::CoreError::from)?;
        if request.total_cost.is_some_and(|cost| cost < 0) {
            return Err(EngineError::InvalidInput("total_cost must not be negative".to_string()));
        }
        if request.change_count < 0 && request.resource_type != LotResourceType::Product {
            return Err(EngineError::InvalidInput(
                "resource_type only applies to stock increases".to_string(),
            ));
        }

        let change = self
            .bounded("adjust_stock", async {
                let mut uow = self.db.begin().await?;
                let product = uow.products().require(&request.product_id).await?;
                let source = StockSource::Adjustment {
                    adjustment_id: request.adjustment_id.clone(),
                };
                let count = request.change_count.abs();
                let mv = StockMove::new(&product.id, count, source, actor)
                    .description(description.clone())
                    .resource(request.resource_type, request.resource_id.clone());

                let change = if request.change_count > 0 {
                    let records = match request.total_cost {
                        Some(total) => split_cost(Money::from_minor(total), count),
                        None => vec![WholesaleRecord::new(product.buy_price, count)],
                    };
                    uow.stock().increase(&mv, &records).await?
                } else {
                    uow.stock().decrease(&mv.unit_price(product.sell_price)).await?
                };
                uow.commit().await?;
                Ok::<_, EngineError>(change)
            })
            .await?;

        info!(
            product_id = %request.product_id,
            change_count = request.change_count,
            result_stock_number = change.movement.result_stock_number,
            "Stock adjusted"
        );
        self.refresh_wholesale_stats([request.product_id]).await;
        Ok(change)
    }

    /// Removes lost or damaged units.
    pub async fn record_loss(
        &self,
        product_id: &str,
        item_count: i64,
        description: Option<String>,
        actor: &Actor,
    ) -> EngineResult<StockChange> {
        validate_item_count(item_count).map_err(kura_core::CoreError::from)?;
        let description =
            validate_description(description.as_deref()).map_err(kura_core::CoreError::from)?;

        let change = self
            .bounded("record_loss", async {
                let mut uow = self.db.begin().await?;
                let product = uow.products().require(product_id).await?;
                let mv = StockMove::new(
                    product_id,
                    item_count,
                    StockSource::Loss {
                        loss_id: generate_id(),
                    },
                    actor,
                )
                .unit_price(product.sell_price)
                .description(description.clone());
                let change = uow.stock().decrease(&mv).await?;
                uow.commit().await?;
                Ok::<_, EngineError>(change)
            })
            .await?;

        info!(
            product_id,
            item_count,
            wholesale_total_price = change.total_wholesale_price,
            "Loss recorded"
        );
        self.refresh_wholesale_stats([product_id.to_string()]).await;
        Ok(change)
    }

    /// Puts the units of a recorded loss back onto the lots they came from.
    pub async fn rollback_loss(&self, loss_id: &str, actor: &Actor) -> EngineResult<Vec<StockChange>> {
        let source = StockSource::LossRollback {
            loss_id: loss_id.to_string(),
        };
        let changes = self
            .reverse_decreases("rollback_loss", StockSourceKind::Loss, loss_id, source, actor)
            .await?;
        info!(loss_id, movements = changes.len(), "Loss rolled back");
        Ok(changes)
    }

    // =========================================================================
    // E-commerce Orders
    // =========================================================================

    /// Ships stock for an order taken on the online store.
    pub async fn record_ec_sale(
        &self,
        order_id: &str,
        product_id: &str,
        item_count: i64,
        unit_price: i64,
        actor: &Actor,
    ) -> EngineResult<StockChange> {
        validate_id("order_id", order_id).map_err(kura_core::CoreError::from)?;
        validate_item_count(item_count).map_err(kura_core::CoreError::from)?;

        let change = self
            .bounded("record_ec_sale", async {
                let mut uow = self.db.begin().await?;
                let mv = StockMove::new(
                    product_id,
                    item_count,
                    StockSource::EcSell {
                        order_id: order_id.to_string(),
                    },
                    actor,
                )
                .unit_price(unit_price);
                let change = uow.stock().decrease(&mv).await?;
                uow.commit().await?;
                Ok::<_, EngineError>(change)
            })
            .await?;

        info!(order_id, product_id, item_count, "E-commerce sale recorded");
        self.refresh_wholesale_stats([product_id.to_string()]).await;
        Ok(change)
    }

    /// Takes back every shipped line of an online order.
    pub async fn return_ec_sale(&self, order_id: &str, actor: &Actor) -> EngineResult<Vec<StockChange>> {
        let source = StockSource::EcSellReturn {
            order_id: order_id.to_string(),
        };
        let changes = self
            .reverse_decreases("return_ec_sale", StockSourceKind::EcSell, order_id, source, actor)
            .await?;
        info!(order_id, movements = changes.len(), "E-commerce sale returned");
        Ok(changes)
    }

    /// Reverses every open decrease of `(kind, source_id)` with its exact lots.
    async fn reverse_decreases(
        &self,
        operation: &'static str,
        kind: StockSourceKind,
        source_id: &str,
        source: StockSource,
        actor: &Actor,
    ) -> EngineResult<Vec<StockChange>> {
        let changes = self
            .bounded(operation, async {
                let mut uow = self.db.begin().await?;
                let open = uow.stock().open_movements_for_source(kind, source_id).await?;
                if open.is_empty() {
                    return Err(EngineError::not_found("Stock movement", source_id));
                }
                let mut changes = Vec::with_capacity(open.len());
                for movement in open {
                    changes.push(uow.stock().reverse_decrease(movement.id, source.clone(), actor).await?);
                }
                uow.commit().await?;
                Ok::<_, EngineError>(changes)
            })
            .await?;

        self.refresh_wholesale_stats(changes.iter().map(|c| c.movement.product_id.clone()))
            .await;
        Ok(changes)
    }

    // =========================================================================
    // Set Deals
    // =========================================================================

    /// Publishes due drafts and expires lapsed deals of a store.
    ///
    /// Returns the deals whose status changed.
    pub async fn refresh_set_deal_statuses(
        &self,
        store_id: &str,
        today: DateTime<Utc>,
    ) -> EngineResult<Vec<(String, SetDealStatus)>> {
        let changed = self
            .bounded("refresh_set_deal_statuses", async {
                let mut uow = self.db.begin().await?;
                let mut changed = Vec::new();
                for deal in uow.set_deals().refreshable(store_id).await? {
                    if let Some(status) = set_deal::refreshed_status(&deal, today) {
                        uow.set_deals().update_status(&deal.id, status).await?;
                        changed.push((deal.id, status));
                    }
                }
                uow.commit().await?;
                Ok::<_, EngineError>(changed)
            })
            .await?;

        info!(store_id, changed = changed.len(), "Set deal statuses refreshed");
        Ok(changed)
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Recomputes cached cost statistics, one short unit of work per product.
    ///
    /// Runs after the owning operation committed; failures only log.
    pub(crate) async fn refresh_wholesale_stats(&self, product_ids: impl IntoIterator<Item = String>) {
        for product_id in product_ids.into_iter().collect::<BTreeSet<_>>() {
            let result = async {
                let mut uow = self.db.begin().await?;
                uow.products().refresh_wholesale_stats(&product_id).await?;
                uow.commit().await?;
                Ok::<_, EngineError>(())
            }
            .await;
            if let Err(e) = result {
                warn!(product_id = %product_id, error = %e, "Wholesale statistics refresh failed");
            }
        }
    }
}

// =============================================================================
// Draft Assembly
// =============================================================================

fn draft_from_cart(
    request: &CreateTransaction,
    validated: &ValidatedCart,
    actor: &Actor,
    now: DateTime<Utc>,
) -> EngineResult<Transaction> {
    let totals = validated.totals(
        request.tax_mode,
        TaxRate::from_bps(request.tax_rate_bps),
        request.used_point,
    )?;

    Ok(Transaction {
        id: request.id.clone().unwrap_or_else(generate_id),
        store_id: request.cart.store_id.clone(),
        kind: request.cart.kind,
        status: TransactionStatus::Draft,
        payment_method: request.cart.payment_method,
        channel: request.cart.channel,
        tax_mode: request.tax_mode,
        tax_rate_bps: i64::from(request.tax_rate_bps),
        subtotal_price: totals.subtotal_price,
        discount_price: totals.discount_price,
        set_deal_discount_price: validated.set_deal_discount_price,
        point_discount_price: totals.point_discount_price,
        tax_price: totals.tax_price,
        included_tax_price: totals.included_tax_price,
        total_price: totals.total_price,
        total_reservation_price: validated.total_reservation_price,
        total_consignment_sale_price: validated.total_consignment_sale_price,
        total_consignment_commission_price: validated.total_consignment_commission_price,
        point_amount: 0,
        total_point_amount: 0,
        used_point: request.used_point,
        customer_id: request.cart.customer_id.clone(),
        original_transaction_id: None,
        is_return: false,
        register_id: None,
        terminal_checkout_id: None,
        staff_id: actor.staff_id.clone(),
        created_at: now,
        updated_at: now,
        finished_at: None,
    })
}

fn lines_for(transaction_id: &str, priced: &[PricedLine]) -> Vec<CartLine> {
    priced
        .iter()
        .enumerate()
        .map(|(i, line)| CartLine {
            id: generate_id(),
            transaction_id: transaction_id.to_string(),
            line_no: i as i64 + 1,
            product_id: line.product_id.clone(),
            item_count: line.item_count,
            unit_price: line.unit_price,
            discount_price: line.discount_price,
            original_unit_price: line.original_unit_price,
            sale_id: line.sale_id.clone(),
            sale_discount_price: line.sale_discount_price,
            reservation_price: line.reservation_price,
            reservation_reception_id_for_deposit: line.reservation_reception_id_for_deposit.clone(),
            reservation_reception_id_for_receive: line.reservation_reception_id_for_receive.clone(),
            consignment_sale_unit_price: line.consignment_sale_unit_price,
            consignment_commission_unit_price: line.consignment_commission_unit_price,
            total_unit_price: line.total_unit_price,
            total_price: line.total_price,
            wholesale_total_price: None,
            wholesale_nothing_count: 0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{cart, draft, engine, line, seed_product, staff};
    use chrono::Duration as ChronoDuration;
    use kura_core::{CartRule, PaymentMethod, SetDeal, SetDealDiscountKind};

    #[tokio::test]
    async fn test_create_keeps_draft_without_effects() {
        let (svc, _fakes) = engine().await;
        seed_product(&svc, "p-1", 5, 400).await;

        let tx = svc
            .create_transaction(draft(cart(TransactionKind::Sell, PaymentMethod::Cash, vec![line("p-1", 2, 1000)])), &staff())
            .await
            .unwrap();

        assert_eq!(tx.status, TransactionStatus::Draft);
        assert_eq!(tx.subtotal_price, 2000);
        assert_eq!(tx.total_price, 2000);

        let snapshot = svc.get_transaction(&tx.id).await.unwrap();
        assert_eq!(snapshot.lines.len(), 1);
        assert_eq!(snapshot.lines[0].original_unit_price, 1000);
        assert!(snapshot.payment.is_none());

        let mut uow = svc.database().begin_read().await.unwrap();
        assert_eq!(uow.products().require("p-1").await.unwrap().stock_number, 5);
    }

    #[tokio::test]
    async fn test_create_with_same_id_returns_stored_transaction() {
        let (svc, _fakes) = engine().await;
        seed_product(&svc, "p-1", 5, 400).await;

        let mut request = draft(cart(TransactionKind::Sell, PaymentMethod::Cash, vec![line("p-1", 1, 1000)]));
        request.id = Some("tx-fixed".to_string());
        let first = svc.create_transaction(request.clone(), &staff()).await.unwrap();

        request.cart.lines[0].item_count = 3;
        let second = svc.create_transaction(request, &staff()).await.unwrap();

        assert_eq!(first.id, "tx-fixed");
        assert_eq!(second.id, "tx-fixed");
        assert_eq!(second.total_price, 1000);
    }

    #[tokio::test]
    async fn test_create_rejects_markup_on_sell() {
        let (svc, _fakes) = engine().await;
        seed_product(&svc, "p-1", 5, 400).await;

        let mut input = line("p-1", 1, 1000);
        input.discount_price = 50;
        let err = svc
            .create_transaction(draft(cart(TransactionKind::Sell, PaymentMethod::Cash, vec![input])), &staff())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EngineError::InvalidCartLine {
                rule: CartRule::MarkupOnSell,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_create_rejects_terminal_buy() {
        let (svc, _fakes) = engine().await;
        seed_product(&svc, "p-1", 0, 0).await;

        let err = svc
            .create_transaction(draft(cart(TransactionKind::Buy, PaymentMethod::Card, vec![line("p-1", 1, 500)])), &staff())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedPaymentMethod { .. }));
    }

    #[tokio::test]
    async fn test_points_need_a_customer() {
        let (svc, _fakes) = engine().await;
        seed_product(&svc, "p-1", 5, 400).await;

        let mut request = draft(cart(TransactionKind::Sell, PaymentMethod::Cash, vec![line("p-1", 1, 1000)]));
        request.used_point = 100;
        let err = svc.create_transaction(request, &staff()).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_cancel_draft() {
        let (svc, _fakes) = engine().await;
        seed_product(&svc, "p-1", 5, 400).await;
        let tx = svc
            .create_transaction(draft(cart(TransactionKind::Sell, PaymentMethod::Cash, vec![line("p-1", 1, 1000)])), &staff())
            .await
            .unwrap();

        let canceled = svc.cancel_draft(&tx.id, &staff()).await.unwrap();
        assert_eq!(canceled.status, TransactionStatus::Canceled);

        let err = svc.cancel_draft(&tx.id, &staff()).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_validate_cart_has_no_side_effects() {
        let (svc, _fakes) = engine().await;
        seed_product(&svc, "p-1", 5, 400).await;

        let request = cart(TransactionKind::Sell, PaymentMethod::Cash, vec![line("p-1", 2, 1000)]);
        let validated = svc.validate_cart(&request, None).await.unwrap();
        assert_eq!(validated.subtotal_price, 2000);

        let err = svc
            .validate_cart(&cart(TransactionKind::Sell, PaymentMethod::Cash, vec![line("nope", 1, 10)]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidCartLine { rule: CartRule::ProductNotInStore, .. }));
    }

    #[tokio::test]
    async fn test_adjust_stock_splits_total_cost() {
        let (svc, _fakes) = engine().await;
        seed_product(&svc, "p-1", 0, 0).await;

        let change = svc
            .adjust_stock(
                AdjustStock {
                    product_id: "p-1".to_string(),
                    change_count: 3,
                    total_cost: Some(1000),
                    description: Some("  recount ".to_string()),
                    ..Default::default()
                },
                &staff(),
            )
            .await
            .unwrap();

        assert_eq!(change.movement.result_stock_number, 3);
        assert_eq!(change.movement.description.as_deref(), Some("recount"));

        let mut uow = svc.database().begin_read().await.unwrap();
        let lots = uow.stock().lots_for_product("p-1").await.unwrap();
        let total: i64 = lots.iter().map(|l| l.unit_price * l.item_count).sum();
        assert_eq!(total, 1000);

        let product = uow.products().require("p-1").await.unwrap();
        assert_eq!(product.minimum_wholesale_price, Some(333));
        assert_eq!(product.maximum_wholesale_price, Some(334));
    }

    #[tokio::test]
    async fn test_negative_adjustment_and_loss() {
        let (svc, _fakes) = engine().await;
        seed_product(&svc, "p-1", 4, 250).await;

        let change = svc
            .adjust_stock(
                AdjustStock {
                    product_id: "p-1".to_string(),
                    change_count: -1,
                    total_cost: None,
                    adjustment_id: Some("adj-1".to_string()),
                    ..Default::default()
                },
                &staff(),
            )
            .await
            .unwrap();
        assert_eq!(change.movement.result_stock_number, 3);
        assert_eq!(change.total_wholesale_price, 250);

        let loss = svc.record_loss("p-1", 2, Some("water damage".to_string()), &staff()).await.unwrap();
        assert_eq!(loss.movement.result_stock_number, 1);
        assert_eq!(loss.movement.source_kind, StockSourceKind::Loss);

        let err = svc.record_loss("p-1", 5, None, &staff()).await.unwrap_err();
        assert!(matches!(err, EngineError::InsufficientStock { available: 1, requested: 5, .. }));
    }

    #[tokio::test]
    async fn test_adjust_stock_tags_lot_resource() {
        let (svc, _fakes) = engine().await;
        seed_product(&svc, "p-1", 0, 0).await;

        svc.adjust_stock(
            AdjustStock {
                product_id: "p-1".to_string(),
                change_count: 6,
                total_cost: Some(600),
                resource_type: LotResourceType::BundleDisassembly,
                resource_id: Some("bundle-3".to_string()),
                ..Default::default()
            },
            &staff(),
        )
        .await
        .unwrap();

        let mut uow = svc.database().begin_read().await.unwrap();
        let lots = uow.stock().lots_for_product("p-1").await.unwrap();
        assert_eq!(lots.len(), 1);
        assert_eq!(lots[0].resource_type, LotResourceType::BundleDisassembly);
        assert_eq!(lots[0].resource_id.as_deref(), Some("bundle-3"));
        drop(uow);

        let err = svc
            .adjust_stock(
                AdjustStock {
                    product_id: "p-1".to_string(),
                    change_count: -1,
                    resource_type: LotResourceType::PackOpening,
                    ..Default::default()
                },
                &staff(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_rollback_loss_restores_lots() {
        let (svc, _fakes) = engine().await;
        seed_product(&svc, "p-1", 0, 0).await;
        crate::testing::stock_lots(&svc, "p-1", &[(100, 2), (150, 3)]).await;

        let loss = svc.record_loss("p-1", 3, None, &staff()).await.unwrap();
        assert_eq!(loss.total_wholesale_price, 350);
        let loss_id = loss.movement.source_id.clone().unwrap();

        let changes = svc.rollback_loss(&loss_id, &staff()).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].movement.source_kind, StockSourceKind::LossRollback);
        assert_eq!(changes[0].movement.result_stock_number, 5);

        let mut uow = svc.database().begin_read().await.unwrap();
        let lots = uow.stock().lots_for_product("p-1").await.unwrap();
        let remaining: Vec<_> = lots.iter().map(|l| l.remaining_item_count).collect();
        assert_eq!(remaining, vec![2, 3]);
        drop(uow);

        let err = svc.rollback_loss(&loss_id, &staff()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_ec_sale_and_return() {
        let (svc, _fakes) = engine().await;
        seed_product(&svc, "p-1", 4, 100).await;
        seed_product(&svc, "p-2", 4, 200).await;

        let sold = svc.record_ec_sale("order-1", "p-1", 3, 1000, &staff()).await.unwrap();
        assert_eq!(sold.movement.source_kind, StockSourceKind::EcSell);
        assert_eq!(sold.movement.source_id.as_deref(), Some("order-1"));
        svc.record_ec_sale("order-1", "p-2", 1, 1500, &staff()).await.unwrap();

        let err = svc.record_ec_sale("order-2", "p-1", 2, 1000, &staff()).await.unwrap_err();
        assert!(matches!(err, EngineError::InsufficientStock { .. }));

        let returned = svc.return_ec_sale("order-1", &staff()).await.unwrap();
        assert_eq!(returned.len(), 2);
        assert!(returned.iter().all(|c| c.movement.source_kind == StockSourceKind::EcSellReturn));

        let mut uow = svc.database().begin_read().await.unwrap();
        assert_eq!(uow.products().require("p-1").await.unwrap().stock_number, 4);
        assert_eq!(uow.products().require("p-2").await.unwrap().stock_number, 4);
        drop(uow);

        let err = svc.return_ec_sale("order-1", &staff()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_refresh_set_deal_statuses() {
        let (svc, _fakes) = engine().await;
        seed_product(&svc, "p-1", 1, 100).await;
        let today = Utc::now();

        let deal = |id: &str, status, start: i64, expire: Option<i64>| SetDeal {
            id: id.to_string(),
            store_id: "store-1".to_string(),
            display_name: id.to_string(),
            discount_kind: SetDealDiscountKind::Fixed,
            discount_amount: -100,
            status,
            start_at: today + ChronoDuration::days(start),
            expire_at: expire.map(|d| today + ChronoDuration::days(d)),
        };
        let product = |id: &str| kura_core::SetDealProduct {
            set_deal_id: id.to_string(),
            product_id: "p-1".to_string(),
            item_count: 1,
        };

        let mut uow = svc.database().begin().await.unwrap();
        for d in [
            deal("due", SetDealStatus::Draft, -1, None),
            deal("future", SetDealStatus::Draft, 3, None),
            deal("lapsed", SetDealStatus::Published, -10, Some(-1)),
            deal("running", SetDealStatus::Published, -10, Some(5)),
        ] {
            let products = [product(&d.id)];
            uow.set_deals().insert(&d, &products).await.unwrap();
        }
        uow.commit().await.unwrap();

        let mut changed = svc.refresh_set_deal_statuses("store-1", today).await.unwrap();
        changed.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            changed,
            vec![
                ("due".to_string(), SetDealStatus::Published),
                ("lapsed".to_string(), SetDealStatus::Expired),
            ]
        );
    }
}
