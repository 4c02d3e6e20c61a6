//! # Domain Types
//!
//! Records and enums shared by every Kura crate.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Transaction ──┬── CartLine (1..n, snapshot of prices at sale time)    │
//! │                ├── Payment  (exactly one once completed)               │
//! │                └── original_transaction_id ──► Transaction (returns)   │
//! │                                                                         │
//! │  Product ──┬── StockMovement (append-only ledger)                      │
//! │            └── WholesaleLot ◄── LotConsumption ──► StockMovement       │
//! │                                                                         │
//! │  Register ── RegisterCashMovement (signed deltas)                      │
//! │                                                                         │
//! │  Reservation ── ReservationReception (per customer)                    │
//! │  SetDeal ── SetDealProduct                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Monetary columns are plain `i64` in the smallest currency unit. Aggregate
//! ids are UUID strings; ledger rows use integer ids because their order is
//! meaningful.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate represented in basis points (bps).
///
/// 1000 bps = 10%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaxRate(u32);

impl TaxRate {
    /// Creates a tax rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Zero tax rate.
    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        TaxRate::zero()
    }
}

/// Whether cart prices already contain tax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TaxMode {
    /// Tax is added on top of the subtotal.
    Exclusive,
    /// Prices include tax; `tax_price` is zero and the contained portion
    /// is reported separately.
    #[default]
    Inclusive,
}

// =============================================================================
// Actor
// =============================================================================

/// The staff member (or system job) performing an operation.
///
/// Passed explicitly into every engine call and stamped on ledger rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Actor {
    pub staff_id: String,
}

impl Actor {
    pub fn staff(staff_id: impl Into<String>) -> Self {
        Actor {
            staff_id: staff_id.into(),
        }
    }

    /// Actor used by background jobs such as the payment watchdog.
    pub fn system() -> Self {
        Actor {
            staff_id: "system".to_string(),
        }
    }
}

// =============================================================================
// Transaction Enums
// =============================================================================

/// Direction of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Store sells to a customer.
    Sell,
    /// Store buys from a customer.
    Buy,
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionKind::Sell => write!(f, "sell"),
            TransactionKind::Buy => write!(f, "buy"),
        }
    }
}

/// Transaction status.
///
/// ```text
/// draft ──► paying ──► completed
///   │         │
///   │         └──────► canceled
///   ├──────────────────► completed
///   └──────────────────► canceled
/// ```
/// See [`crate::state`] for the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Draft,
    Paying,
    Completed,
    Canceled,
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionStatus::Draft => write!(f, "draft"),
            TransactionStatus::Paying => write!(f, "paying"),
            TransactionStatus::Completed => write!(f, "completed"),
            TransactionStatus::Canceled => write!(f, "canceled"),
        }
    }
}

/// Payment method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    /// Bank transfer; buy transactions only.
    Bank,
    Card,
    EMoney,
    Qr,
}

impl PaymentMethod {
    /// Methods settled through an external terminal checkout.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentMethod::Card | PaymentMethod::EMoney | PaymentMethod::Qr
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Bank => "bank",
            PaymentMethod::Card => "card",
            PaymentMethod::EMoney => "e_money",
            PaymentMethod::Qr => "qr",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cash" => Ok(PaymentMethod::Cash),
            "bank" => Ok(PaymentMethod::Bank),
            "card" => Ok(PaymentMethod::Card),
            "e_money" | "emoney" | "wallet" => Ok(PaymentMethod::EMoney),
            "qr" => Ok(PaymentMethod::Qr),
            other => Err(format!(
                "Unknown payment method: '{}'. Valid options: cash, bank, card, e_money, qr",
                other
            )),
        }
    }
}

/// Whether a payment record collects or refunds money.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    Pay,
    Refund,
}

/// Surface the cart was submitted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SalesChannel {
    /// Staff-operated register.
    #[default]
    Register,
    /// Customer-facing ordering tablet; subject to allow-lists and caps.
    SelfServiceTablet,
}

impl SalesChannel {
    pub fn is_restricted(&self) -> bool {
        matches!(self, SalesChannel::SelfServiceTablet)
    }
}

// =============================================================================
// Product
// =============================================================================

/// A product with its live stock number.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    pub id: String,
    pub store_id: String,
    pub display_name: String,

    /// Reference price for sell lines.
    pub sell_price: i64,

    /// Reference price for buy lines.
    pub buy_price: i64,

    /// Current stock level; equals the last movement's resulting number.
    pub stock_number: i64,

    /// Decreases never fail the negative-stock check.
    pub infinite_stock: bool,

    pub genre_id: Option<String>,
    pub category_id: Option<String>,

    /// Set when the product is owned by a consignment client.
    pub consignment_client_id: Option<String>,

    /// Statistics over remaining cost lots, refreshed after commit.
    pub average_wholesale_price: Option<i64>,
    pub minimum_wholesale_price: Option<i64>,
    pub maximum_wholesale_price: Option<i64>,

    pub is_active: bool,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    #[inline]
    pub fn is_consignment(&self) -> bool {
        self.consignment_client_id.is_some()
    }

    /// Reference price for a line of the given kind.
    pub fn reference_price(&self, kind: TransactionKind) -> Money {
        match kind {
            TransactionKind::Sell => Money::from_minor(self.sell_price),
            TransactionKind::Buy => Money::from_minor(self.buy_price),
        }
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// One sell or buy event for a store.
///
/// ## Totals
/// ```text
/// total_price = subtotal_price - discount_price - point_discount_price + tax_price
/// ```
/// `discount_price` is the amount taken off (negative for buy markups) and
/// already includes the set-deal discount.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Transaction {
    pub id: String,
    pub store_id: String,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub payment_method: PaymentMethod,
    pub channel: SalesChannel,
    pub tax_mode: TaxMode,
    pub tax_rate_bps: i64,

    pub subtotal_price: i64,
    pub discount_price: i64,
    /// Signed like line discounts (negative = money off); informational.
    pub set_deal_discount_price: i64,
    pub point_discount_price: i64,
    pub tax_price: i64,
    /// Tax contained in inclusive prices; informational.
    pub included_tax_price: i64,
    pub total_price: i64,

    pub total_reservation_price: i64,
    pub total_consignment_sale_price: i64,
    pub total_consignment_commission_price: i64,

    /// Points credited on completion.
    pub point_amount: i64,
    /// Customer point balance after completion.
    pub total_point_amount: i64,
    /// Points spent as `point_discount_price`.
    pub used_point: i64,

    pub customer_id: Option<String>,
    pub original_transaction_id: Option<String>,
    pub is_return: bool,
    pub register_id: Option<String>,
    pub terminal_checkout_id: Option<String>,
    pub staff_id: String,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,

    #[ts(as = "Option<String>")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Recomputes `total_price` from its components.
    pub fn expected_total(&self) -> i64 {
        self.subtotal_price - self.discount_price - self.point_discount_price + self.tax_price
    }

    #[inline]
    pub fn total(&self) -> Money {
        Money::from_minor(self.total_price)
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            TransactionStatus::Completed | TransactionStatus::Canceled
        )
    }
}

/// One product line inside a transaction.
///
/// Prices are a snapshot taken when the cart was validated.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CartLine {
    pub id: String,
    pub transaction_id: String,
    pub line_no: i64,
    pub product_id: String,
    pub item_count: i64,
    pub unit_price: i64,
    /// Signed adjustment per unit; negative = markdown, positive = markup.
    pub discount_price: i64,
    /// Product reference price at validation time.
    pub original_unit_price: i64,
    pub sale_id: Option<String>,
    pub sale_discount_price: i64,
    /// Deposit (positive) or deposit offset on receive (negative), per unit.
    pub reservation_price: i64,
    pub reservation_reception_id_for_deposit: Option<String>,
    pub reservation_reception_id_for_receive: Option<String>,
    pub consignment_sale_unit_price: i64,
    pub consignment_commission_unit_price: i64,
    /// `unit_price + discount_price + sale_discount_price + reservation_price`
    pub total_unit_price: i64,
    pub total_price: i64,
    /// Cost consumed by the stock decrease; filled at payment time.
    pub wholesale_total_price: Option<i64>,
    pub wholesale_nothing_count: i64,
}

impl CartLine {
    pub fn is_reservation_deposit(&self) -> bool {
        self.reservation_reception_id_for_deposit.is_some()
    }

    pub fn is_reservation_receive(&self) -> bool {
        self.reservation_reception_id_for_receive.is_some()
    }
}

/// The payment (or refund) record of a transaction.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Payment {
    pub id: String,
    pub transaction_id: String,
    pub mode: PaymentMode,
    pub method: PaymentMethod,
    pub total_amount: i64,
    pub cash_received: Option<i64>,
    pub cash_change: Option<i64>,
    /// Cash part of a bank buy.
    pub cash_portion: Option<i64>,
    pub terminal_checkout_id: Option<String>,
    pub external_refund_id: Option<String>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// A transaction together with its lines and payment, for receipt rendering.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TransactionSnapshot {
    pub transaction: Transaction,
    pub lines: Vec<CartLine>,
    pub payment: Option<Payment>,
}

// =============================================================================
// Stock Ledger Records
// =============================================================================

/// Flat discriminator stored on movements; see [`crate::stock::StockSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum StockSourceKind {
    TransactionSell,
    TransactionBuy,
    TransactionSellReturn,
    TransactionBuyReturn,
    /// Stock shipped for an e-commerce order.
    EcSell,
    EcSellReturn,
    Loss,
    LossRollback,
    Adjustment,
    /// Compensating entry appended when a movement is reversed outside a
    /// return (payment timeout, failed checkout).
    Reversal,
}

/// One entry in the stock ledger.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockMovement {
    pub id: i64,
    pub product_id: String,
    /// Positive = increase, negative = decrease.
    pub item_count: i64,
    pub source_kind: StockSourceKind,
    pub source_id: Option<String>,
    /// Sell price on decreases, average wholesale price on increases.
    pub unit_price: i64,
    pub result_stock_number: i64,
    pub description: Option<String>,
    pub staff_id: String,
    /// Set once this movement has been reversed.
    pub reversed_by_movement_id: Option<i64>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// What created a cost lot, for lots produced by composite operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum LotResourceType {
    #[default]
    Product,
    BundleDisassembly,
    PackOpening,
}

/// One cost batch of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct WholesaleLot {
    pub id: i64,
    pub product_id: String,
    pub unit_price: i64,
    pub item_count: i64,
    pub remaining_item_count: i64,
    pub stock_movement_id: Option<i64>,
    pub resource_type: LotResourceType,
    pub resource_id: Option<String>,
    /// Created while the product had zero stock.
    pub is_price_anchor: bool,

    #[ts(as = "String")]
    pub arrived_at: DateTime<Utc>,
}

/// Units a movement took from (or returned to) one lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct LotConsumption {
    pub stock_movement_id: i64,
    pub lot_id: i64,
    pub item_count: i64,
    pub unit_price: i64,
}

// =============================================================================
// Register Cash Ledger
// =============================================================================

/// A physical cash drawer.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Register {
    pub id: String,
    pub store_id: String,
    pub display_name: String,
    pub cash_balance: i64,
    /// Bound terminal device; `None` means terminal methods are recorded
    /// as manual payments.
    pub terminal_device_id: Option<String>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum CashSourceKind {
    TransactionSell,
    TransactionBuy,
    TransactionSellReturn,
    TransactionBuyReturn,
    /// Payment of a transaction carrying a reservation deposit line.
    ReservationDeposit,
    ReservationDepositReturn,
    /// Reversal of a canceled payment.
    TransactionCancel,
    Manual,
}

impl CashSourceKind {
    /// Kind recorded when a transaction of `kind` settles cash, or when its
    /// return refunds it.
    pub fn for_transaction(kind: TransactionKind, has_deposit: bool, is_return: bool) -> Self {
        match (has_deposit, kind, is_return) {
            (true, _, false) => CashSourceKind::ReservationDeposit,
            (true, _, true) => CashSourceKind::ReservationDepositReturn,
            (false, TransactionKind::Sell, false) => CashSourceKind::TransactionSell,
            (false, TransactionKind::Buy, false) => CashSourceKind::TransactionBuy,
            (false, TransactionKind::Sell, true) => CashSourceKind::TransactionSellReturn,
            (false, TransactionKind::Buy, true) => CashSourceKind::TransactionBuyReturn,
        }
    }

    /// Movements written when a transaction was paid, the ones a payment
    /// cancel takes back.
    pub fn is_payment(self) -> bool {
        matches!(
            self,
            CashSourceKind::TransactionSell
                | CashSourceKind::TransactionBuy
                | CashSourceKind::ReservationDeposit
        )
    }
}

/// Signed cash delta on a register.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct RegisterCashMovement {
    pub id: i64,
    pub register_id: String,
    pub change_price: i64,
    pub result_cash_balance: i64,
    pub source_kind: CashSourceKind,
    pub source_id: Option<String>,
    pub description: Option<String>,
    pub staff_id: String,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Reservations
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Accepting deposits; the product cannot be sold freely.
    Open,
    /// No longer accepting deposits; undelivered receptions still hold stock.
    Closed,
    Completed,
}

/// A pre-order with a per-unit deposit price.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Reservation {
    pub id: String,
    pub store_id: String,
    pub product_id: String,
    pub display_name: String,
    pub deposit_price: i64,
    /// Maximum units that may be deposited across all receptions.
    pub limit_count: i64,
    pub status: ReservationStatus,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ReceptionStatus {
    Created,
    Deposited,
    Received,
    Canceled,
}

impl std::fmt::Display for ReceptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReceptionStatus::Created => write!(f, "created"),
            ReceptionStatus::Deposited => write!(f, "deposited"),
            ReceptionStatus::Received => write!(f, "received"),
            ReceptionStatus::Canceled => write!(f, "canceled"),
        }
    }
}

/// One customer's claim on a reservation.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct ReservationReception {
    pub id: String,
    pub reservation_id: String,
    pub customer_id: String,
    pub item_count: i64,
    pub status: ReceptionStatus,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Set Deals
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SetDealStatus {
    Draft,
    Published,
    Deleted,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SetDealDiscountKind {
    /// `discount_amount` is a signed amount (negative = money off).
    Fixed,
    /// `discount_amount` is a signed percent (e.g. -10).
    Percent,
}

/// A multi-product bundle discount.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SetDeal {
    pub id: String,
    pub store_id: String,
    pub display_name: String,
    pub discount_kind: SetDealDiscountKind,
    pub discount_amount: i64,
    pub status: SetDealStatus,

    #[ts(as = "String")]
    pub start_at: DateTime<Utc>,

    #[ts(as = "Option<String>")]
    pub expire_at: Option<DateTime<Utc>>,
}

/// A required (product, quantity) pair of a set deal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SetDealProduct {
    pub set_deal_id: String,
    pub product_id: String,
    pub item_count: i64,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_method_parsing() {
        assert_eq!("cash".parse::<PaymentMethod>(), Ok(PaymentMethod::Cash));
        assert_eq!("E_MONEY".parse::<PaymentMethod>(), Ok(PaymentMethod::EMoney));
        assert_eq!("wallet".parse::<PaymentMethod>(), Ok(PaymentMethod::EMoney));
        assert!("cheque".parse::<PaymentMethod>().is_err());
    }

    #[test]
    fn test_terminal_methods() {
        assert!(PaymentMethod::Card.is_terminal());
        assert!(PaymentMethod::Qr.is_terminal());
        assert!(!PaymentMethod::Cash.is_terminal());
        assert!(!PaymentMethod::Bank.is_terminal());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&PaymentMethod::EMoney).unwrap();
        assert_eq!(json, "\"e_money\"");
        let json = serde_json::to_string(&StockSourceKind::TransactionSellReturn).unwrap();
        assert_eq!(json, "\"transaction_sell_return\"");
        let json = serde_json::to_string(&CashSourceKind::ReservationDepositReturn).unwrap();
        assert_eq!(json, "\"reservation_deposit_return\"");
    }

    #[test]
    fn test_cash_source_kind_for_transaction() {
        use TransactionKind::{Buy, Sell};

        assert_eq!(CashSourceKind::for_transaction(Sell, false, false), CashSourceKind::TransactionSell);
        assert_eq!(CashSourceKind::for_transaction(Buy, false, false), CashSourceKind::TransactionBuy);
        assert_eq!(CashSourceKind::for_transaction(Sell, false, true), CashSourceKind::TransactionSellReturn);
        assert_eq!(CashSourceKind::for_transaction(Buy, false, true), CashSourceKind::TransactionBuyReturn);
        assert_eq!(CashSourceKind::for_transaction(Sell, true, false), CashSourceKind::ReservationDeposit);
        assert_eq!(CashSourceKind::for_transaction(Sell, true, true), CashSourceKind::ReservationDepositReturn);

        assert!(CashSourceKind::ReservationDeposit.is_payment());
        assert!(!CashSourceKind::TransactionSellReturn.is_payment());
        assert!(!CashSourceKind::TransactionCancel.is_payment());
    }
}
