//! # Stock Ledger Rules
//!
//! Pure pieces of the stock ledger: the closed set of movement sources, the
//! FIFO cost planner and the helpers that turn a total cost into lots.
//!
//! ## FIFO Consumption
//! ```text
//! lots (oldest first)        decrease 7
//! ┌────────────┐
//! │ 100 × 5    │ ──► take 5  = 500
//! ├────────────┤
//! │ 120 × 5    │ ──► take 2  = 240   (remaining 3)
//! └────────────┘
//!                    total_wholesale_price = 740, nothing_count = 0
//! ```
//! Units that no lot can cover are reported in `nothing_count` rather than
//! priced; callers tolerate the gap.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::{StockSourceKind, WholesaleLot};

// =============================================================================
// Movement Sources
// =============================================================================

/// What caused a stock movement.
///
/// The ledger only ever reads `kind()` and `source_id()`; the branching
/// happens where an operation picks its variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StockSource {
    Sell { transaction_id: String },
    Buy { transaction_id: String },
    /// `transaction_id` is the return transaction.
    SellReturn { transaction_id: String },
    BuyReturn { transaction_id: String },
    EcSell { order_id: String },
    EcSellReturn { order_id: String },
    Loss { loss_id: String },
    LossRollback { loss_id: String },
    Adjustment { adjustment_id: Option<String> },
    /// Compensation for a canceled payment.
    Reversal { transaction_id: String },
}

impl StockSource {
    pub fn kind(&self) -> StockSourceKind {
        match self {
            StockSource::Sell { .. } => StockSourceKind::TransactionSell,
            StockSource::Buy { .. } => StockSourceKind::TransactionBuy,
            StockSource::SellReturn { .. } => StockSourceKind::TransactionSellReturn,
            StockSource::BuyReturn { .. } => StockSourceKind::TransactionBuyReturn,
            StockSource::EcSell { .. } => StockSourceKind::EcSell,
            StockSource::EcSellReturn { .. } => StockSourceKind::EcSellReturn,
            StockSource::Loss { .. } => StockSourceKind::Loss,
            StockSource::LossRollback { .. } => StockSourceKind::LossRollback,
            StockSource::Adjustment { .. } => StockSourceKind::Adjustment,
            StockSource::Reversal { .. } => StockSourceKind::Reversal,
        }
    }

    pub fn source_id(&self) -> Option<&str> {
        match self {
            StockSource::Sell { transaction_id }
            | StockSource::Buy { transaction_id }
            | StockSource::SellReturn { transaction_id }
            | StockSource::BuyReturn { transaction_id }
            | StockSource::Reversal { transaction_id } => Some(transaction_id),
            StockSource::EcSell { order_id } | StockSource::EcSellReturn { order_id } => {
                Some(order_id)
            }
            StockSource::Loss { loss_id } | StockSource::LossRollback { loss_id } => Some(loss_id),
            StockSource::Adjustment { adjustment_id } => adjustment_id.as_deref(),
        }
    }
}

// =============================================================================
// Cost Records
// =============================================================================

/// A `(unit_price, item_count)` pair supplied with a stock increase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct WholesaleRecord {
    pub unit_price: i64,
    pub item_count: i64,
}

impl WholesaleRecord {
    pub fn new(unit_price: i64, item_count: i64) -> Self {
        WholesaleRecord {
            unit_price,
            item_count,
        }
    }
}

/// Checks that increase records are well formed and cover exactly `count`.
pub fn validate_records(records: &[WholesaleRecord], count: i64) -> CoreResult<()> {
    for record in records {
        if record.item_count <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "wholesale_record.item_count".to_string(),
            }
            .into());
        }
        if record.unit_price < 0 {
            return Err(ValidationError::MustNotBeNegative {
                field: "wholesale_record.unit_price".to_string(),
            }
            .into());
        }
    }

    let covered: i64 = records.iter().map(|r| r.item_count).sum();
    if covered != count {
        return Err(CoreError::CostRecordMismatch {
            expected: count,
            covered,
        });
    }
    Ok(())
}

/// Divides a total cost over `count` units into integer unit prices.
///
/// Units that absorb the remainder are grouped into their own record.
///
/// ## Example
/// ```rust
/// use kura_core::stock::{split_cost, WholesaleRecord};
/// use kura_core::Money;
///
/// let records = split_cost(Money::from_minor(1000), 3);
/// assert_eq!(records, vec![WholesaleRecord::new(334, 1), WholesaleRecord::new(333, 2)]);
/// ```
pub fn split_cost(total: Money, count: i64) -> Vec<WholesaleRecord> {
    let mut records: Vec<WholesaleRecord> = Vec::new();
    for part in total.split(count) {
        match records.last_mut() {
            Some(last) if last.unit_price == part.minor() => last.item_count += 1,
            _ => records.push(WholesaleRecord::new(part.minor(), 1)),
        }
    }
    records
}

/// Rounded average unit price of a set of records, used as the movement's
/// `unit_price` on increases.
pub fn average_unit_price(records: &[WholesaleRecord]) -> i64 {
    let count: i64 = records.iter().map(|r| r.item_count).sum();
    if count == 0 {
        return 0;
    }
    let total: Money = records
        .iter()
        .map(|r| Money::from_minor(r.unit_price).multiply_quantity(r.item_count))
        .sum();
    total.div_rounded(count).minor()
}

// =============================================================================
// FIFO Planner
// =============================================================================

/// Walk direction over a product's lots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum LotOrder {
    #[default]
    OldestFirst,
    NewestFirst,
}

/// Units taken from one lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LotUse {
    pub lot_id: i64,
    pub unit_price: i64,
    pub item_count: i64,
}

/// Result of walking lots for `requested` units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ConsumptionPlan {
    pub uses: Vec<LotUse>,
    pub total_wholesale_price: i64,
    /// Units covered by some lot.
    pub found_count: i64,
    /// Units no lot could cover.
    pub nothing_count: i64,
}

impl ConsumptionPlan {
    /// Merges a follow-up plan (e.g. a fallback walk) into this one.
    pub fn extend(&mut self, other: ConsumptionPlan) {
        self.uses.extend(other.uses);
        self.total_wholesale_price += other.total_wholesale_price;
        self.found_count += other.found_count;
        self.nothing_count = other.nothing_count;
    }
}

/// Plans consumption of `requested` units over `lots` in the given order.
///
/// `lots` must already be sorted in walk order. Lots with nothing remaining
/// are skipped. Never takes more than a lot's `remaining_item_count`.
pub fn plan_consumption(lots: &[WholesaleLot], requested: i64) -> ConsumptionPlan {
    let mut plan = ConsumptionPlan::default();
    let mut needed = requested.max(0);

    for lot in lots {
        if needed == 0 {
            break;
        }
        if lot.remaining_item_count <= 0 {
            continue;
        }
        let take = lot.remaining_item_count.min(needed);
        plan.uses.push(LotUse {
            lot_id: lot.id,
            unit_price: lot.unit_price,
            item_count: take,
        });
        plan.total_wholesale_price += take * lot.unit_price;
        plan.found_count += take;
        needed -= take;
    }

    plan.nothing_count = needed;
    plan
}

// =============================================================================
// Unit Tests
// =============================================================================
