//! Fixtures and in-process collaborators shared by the engine tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use kura_core::stock::{StockSource, WholesaleRecord};
use kura_core::{
    Actor, CartLineInput, CartRequest, PaymentMethod, Product, ReceptionStatus, Register, Reservation,
    ReservationReception, ReservationStatus, SalesChannel, TaxMode, Transaction, TransactionKind,
    TransactionStatus,
};
use kura_db::{Database, DbConfig, StockMove};

use crate::collaborators::{
    CheckoutStatus, CollaboratorError, CollaboratorResult, Collaborators, LoyaltyLedger, NotificationDispatcher,
    PaymentProvider, PointGrant, RefundStatus,
};
use crate::config::EngineConfig;
use crate::service::{CreateTransaction, EngineService, PaymentRequest};

pub const STORE_ID: &str = "store-1";

// =============================================================================
// Fake Collaborators
// =============================================================================

#[derive(Default)]
struct PaymentsState {
    checkout_status: Option<CheckoutStatus>,
    refund_statuses: VecDeque<RefundStatus>,
    calls: Vec<String>,
    next_id: u32,
}

/// Provider double; checkouts stay pending until told otherwise and the
/// refund queue reports pending once drained.
#[derive(Default)]
pub struct FakePayments {
    state: Mutex<PaymentsState>,
}

impl FakePayments {
    pub fn set_checkout_status(&self, status: CheckoutStatus) {
        self.state.lock().unwrap().checkout_status = Some(status);
    }

    pub fn push_refund_statuses(&self, statuses: &[RefundStatus]) {
        self.state.lock().unwrap().refund_statuses.extend(statuses.iter().copied());
    }

    /// Mutating calls in order, as `"checkout <amount> <device>"` or
    /// `"refund <checkout> <amount>"`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl PaymentProvider for FakePayments {
    async fn create_terminal_checkout(&self, amount: i64, device_ref: &str) -> CollaboratorResult<String> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        state.calls.push(format!("checkout {} {}", amount, device_ref));
        Ok(format!("chk-{}", state.next_id))
    }

    async fn confirm_checkout(&self, _checkout_id: &str) -> CollaboratorResult<CheckoutStatus> {
        Ok(self.state.lock().unwrap().checkout_status.unwrap_or(CheckoutStatus::Pending))
    }

    async fn create_refund(&self, payment_ref: &str, amount: i64) -> CollaboratorResult<String> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        state.calls.push(format!("refund {} {}", payment_ref, amount));
        Ok(format!("rfd-{}", state.next_id))
    }

    async fn refund_status(&self, _refund_id: &str) -> CollaboratorResult<RefundStatus> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .refund_statuses
            .pop_front()
            .unwrap_or(RefundStatus::Pending))
    }
}

/// One point per 100 paid. Replayed keys return the recorded result.
#[derive(Default)]
pub struct FakeLoyalty {
    balances: Mutex<HashMap<String, i64>>,
    applied: Mutex<HashMap<String, (i64, i64)>>,
}

impl FakeLoyalty {
    pub fn credit(&self, customer_id: &str, amount: i64) {
        *self.balances.lock().unwrap().entry(customer_id.to_string()).or_insert(0) += amount;
    }

    pub fn balance(&self, customer_id: &str) -> i64 {
        self.balances.lock().unwrap().get(customer_id).copied().unwrap_or(0)
    }

    /// Applies `amount` once per key; returns `(amount, balance)`.
    fn apply_once(&self, key: &str, customer_id: &str, amount: i64) -> (i64, i64) {
        let mut applied = self.applied.lock().unwrap();
        if let Some(result) = applied.get(key) {
            return *result;
        }
        self.credit(customer_id, amount);
        let result = (amount, self.balance(customer_id));
        applied.insert(key.to_string(), result);
        result
    }
}

#[async_trait]
impl LoyaltyLedger for FakeLoyalty {
    async fn add_points(&self, customer_id: &str, basis: i64, idempotency_key: &str) -> CollaboratorResult<PointGrant> {
        let (amount, new_total) = self.apply_once(idempotency_key, customer_id, basis.max(0) / 100);
        Ok(PointGrant { amount, new_total })
    }

    async fn use_points(&self, customer_id: &str, amount: i64, idempotency_key: &str) -> CollaboratorResult<i64> {
        let replayed = self.applied.lock().unwrap().contains_key(idempotency_key);
        if !replayed && self.balance(customer_id) < amount {
            return Err(CollaboratorError::new("not enough points"));
        }
        Ok(self.apply_once(idempotency_key, customer_id, -amount).1)
    }

    async fn refund_points(&self, customer_id: &str, amount: i64, idempotency_key: &str) -> CollaboratorResult<i64> {
        Ok(self.apply_once(idempotency_key, customer_id, amount).1)
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    sent: Mutex<Vec<String>>,
}

impl FakeNotifier {
    /// Sent messages as `"<template> <recipient>"`.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationDispatcher for FakeNotifier {
    async fn send(&self, template: &str, recipient: &str, _data: serde_json::Value) -> CollaboratorResult<()> {
        self.sent.lock().unwrap().push(format!("{} {}", template, recipient));
        Ok(())
    }
}

pub struct Fakes {
    pub payments: Arc<FakePayments>,
    pub loyalty: Arc<FakeLoyalty>,
    pub notifier: Arc<FakeNotifier>,
}

// =============================================================================
// Engine
// =============================================================================

/// Engine on a fresh in-memory database with default configuration.
///
/// The terminal watchdog is pushed far out; tests exercising it shorten
/// `timeouts.terminal` themselves.
pub async fn engine() -> (EngineService, Fakes) {
    let fakes = Fakes {
        payments: Arc::new(FakePayments::default()),
        loyalty: Arc::new(FakeLoyalty::default()),
        notifier: Arc::new(FakeNotifier::default()),
    };
    let collaborators = Collaborators {
        payments: fakes.payments.clone(),
        loyalty: fakes.loyalty.clone(),
        notifier: fakes.notifier.clone(),
    };

    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let mut svc = EngineService::new(db, &EngineConfig::default(), collaborators).unwrap();
    svc.timeouts.terminal = Duration::from_secs(30);
    (svc, fakes)
}

pub fn staff() -> Actor {
    Actor::staff("staff-1")
}

// =============================================================================
// Seed Data
// =============================================================================

/// Inserts a product selling at 1000 and stocks `count` units at `unit_cost`.
pub async fn seed_product(svc: &EngineService, id: &str, count: i64, unit_cost: i64) {
    let now = Utc::now();
    let product = Product {
        id: id.to_string(),
        store_id: STORE_ID.to_string(),
        display_name: format!("Product {id}"),
        sell_price: 1000,
        buy_price: 500,
        stock_number: 0,
        infinite_stock: false,
        genre_id: None,
        category_id: None,
        consignment_client_id: None,
        average_wholesale_price: None,
        minimum_wholesale_price: None,
        maximum_wholesale_price: None,
        is_active: true,
        created_at: now,
        updated_at: now,
    };

    let mut uow = svc.database().begin().await.unwrap();
    uow.products().insert(&product).await.unwrap();
    uow.commit().await.unwrap();

    if count > 0 {
        stock_lots(svc, id, &[(unit_cost, count)]).await;
    }
}

/// Adds one lot per `(unit_price, count)`, oldest first.
pub async fn stock_lots(svc: &EngineService, product_id: &str, lots: &[(i64, i64)]) {
    for &(unit_price, count) in lots {
        let mut uow = svc.database().begin().await.unwrap();
        let mv = StockMove::new(
            product_id,
            count,
            StockSource::Adjustment {
                adjustment_id: None,
            },
            &staff(),
        );
        uow.stock()
            .increase(&mv, &[WholesaleRecord::new(unit_price, count)])
            .await
            .unwrap();
        uow.commit().await.unwrap();
    }
}

pub async fn seed_register(svc: &EngineService, id: &str, terminal_device_id: Option<&str>) {
    let register = Register {
        id: id.to_string(),
        store_id: STORE_ID.to_string(),
        display_name: format!("Register {id}"),
        cash_balance: 0,
        terminal_device_id: terminal_device_id.map(str::to_string),
        created_at: Utc::now(),
    };
    let mut uow = svc.database().begin().await.unwrap();
    uow.registers().insert(&register).await.unwrap();
    uow.commit().await.unwrap();
}

/// Open reservation with one fresh reception for two units.
pub async fn seed_reservation(
    svc: &EngineService,
    reservation_id: &str,
    product_id: &str,
    deposit_price: i64,
    reception_id: &str,
    customer_id: &str,
) {
    let reservation = Reservation {
        id: reservation_id.to_string(),
        store_id: STORE_ID.to_string(),
        product_id: product_id.to_string(),
        display_name: format!("Reservation {reservation_id}"),
        deposit_price,
        limit_count: 10,
        status: ReservationStatus::Open,
        created_at: Utc::now(),
    };
    let reception = ReservationReception {
        id: reception_id.to_string(),
        reservation_id: reservation_id.to_string(),
        customer_id: customer_id.to_string(),
        item_count: 2,
        status: ReceptionStatus::Created,
        updated_at: Utc::now(),
    };

    let mut uow = svc.database().begin().await.unwrap();
    uow.reservations().insert_reservation(&reservation).await.unwrap();
    uow.reservations().insert_reception(&reception).await.unwrap();
    uow.commit().await.unwrap();
}

// =============================================================================
// Requests
// =============================================================================

pub fn line(product_id: &str, item_count: i64, unit_price: i64) -> CartLineInput {
    CartLineInput {
        product_id: product_id.to_string(),
        item_count,
        unit_price,
        discount_price: 0,
        sale_id: None,
        sale_discount_price: 0,
        reservation_price: 0,
        reservation_reception_id_for_deposit: None,
        reservation_reception_id_for_receive: None,
    }
}

pub fn cart(kind: TransactionKind, payment_method: PaymentMethod, lines: Vec<CartLineInput>) -> CartRequest {
    CartRequest {
        store_id: STORE_ID.to_string(),
        kind,
        payment_method,
        customer_id: None,
        channel: SalesChannel::default(),
        lines,
        set_deals: Vec::new(),
    }
}

/// Tax-inclusive draft, so totals equal subtotals.
pub fn draft(cart: CartRequest) -> CreateTransaction {
    CreateTransaction {
        id: None,
        cart,
        channel_restriction: None,
        tax_mode: TaxMode::Inclusive,
        tax_rate_bps: 1000,
        used_point: 0,
        as_draft: true,
        payment: None,
    }
}

/// Creates a sell draft and pays it on `register_id`.
pub async fn paid_sell(
    svc: &EngineService,
    lines: Vec<CartLineInput>,
    payment_method: PaymentMethod,
    register_id: &str,
    cash_received: Option<i64>,
) -> Transaction {
    let tx = svc
        .create_transaction(draft(cart(TransactionKind::Sell, payment_method, lines)), &staff())
        .await
        .unwrap();
    let request = PaymentRequest {
        register_id: register_id.to_string(),
        cash_received,
        cash_portion: None,
    };
    svc.process_payment(&tx.id, &request, &staff()).await.unwrap()
}

/// Polls until the transaction reaches `status` or five seconds pass.
pub async fn wait_for_status(svc: &EngineService, id: &str, status: TransactionStatus) -> Transaction {
    for _ in 0..100 {
        let snapshot = svc.get_transaction(id).await.unwrap();
        if snapshot.transaction.status == status {
            return snapshot.transaction;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("transaction {id} never reached {status}");
}
