//! # Cart Validator
//!
//! One synchronous pass over a requested cart against a pre-fetched
//! [`CartContext`]. No I/O happens here: the database layer loads the
//! candidate products, reservations and set deals first.
//!
//! ## Rules (per line, in order)
//! ```text
//! ┌────┬───────────────────────────────────────────────────────────────────┐
//! │ 1  │ product belongs to the store, quantity in range                   │
//! │ 2  │ sell forbids markups, buy forbids markdowns                       │
//! │ 3  │ restricted channel: genre/category allow-lists, quantity cap      │
//! │ 4  │ reservation deposit: price 0 + exact deposit, created reception,  │
//! │    │ open reservation, margin left                                     │
//! │ 5  │ reservation receive: deposited, same customer, same count,        │
//! │    │ reservation_price == -deposit                                     │
//! │ 6  │ open reservations block free sales; closed ones cap them at       │
//! │    │ stock_number - undelivered                                        │
//! │ 7  │ consignment: sell only, no discount stacking, commission          │
//! └────┴───────────────────────────────────────────────────────────────────┘
//! ```
//! Set deals are matched after the per-line rules.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::commission::CommissionTable;
use crate::error::{CartRule, CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::set_deal::{self, RequestedSetDeal, SetDealCandidateLine, SetDealDefinition};
use crate::types::{
    PaymentMethod, Product, ReceptionStatus, Reservation, ReservationReception,
    ReservationStatus, SalesChannel, TaxMode, TaxRate, TransactionKind,
};
use crate::{MAX_CART_LINES, MAX_ITEM_QUANTITY};

// =============================================================================
// Input
// =============================================================================

/// A requested cart line, as submitted by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CartLineInput {
    pub product_id: String,
    pub item_count: i64,
    pub unit_price: i64,
    #[serde(default)]
    pub discount_price: i64,
    #[serde(default)]
    pub sale_id: Option<String>,
    #[serde(default)]
    pub sale_discount_price: i64,
    #[serde(default)]
    pub reservation_price: i64,
    #[serde(default)]
    pub reservation_reception_id_for_deposit: Option<String>,
    #[serde(default)]
    pub reservation_reception_id_for_receive: Option<String>,
}

/// Everything the validator needs to know about the request.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CartRequest {
    pub store_id: String,
    pub kind: TransactionKind,
    pub payment_method: PaymentMethod,
    pub customer_id: Option<String>,
    #[serde(default)]
    pub channel: SalesChannel,
    pub lines: Vec<CartLineInput>,
    #[serde(default)]
    pub set_deals: Vec<RequestedSetDeal>,
}

/// Allow-lists and caps for a restricted ordering surface.
///
/// An empty allow-list allows everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ChannelRestriction {
    pub allowed_genre_ids: HashSet<String>,
    pub allowed_category_ids: HashSet<String>,
    pub max_item_count_per_line: Option<i64>,
}

/// A reservation with all of its receptions.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReservationState {
    pub reservation: Reservation,
    pub receptions: Vec<ReservationReception>,
}

impl ReservationState {
    /// Units deposited or received, excluding `except` (a reception id).
    fn committed_count(&self, except: &str) -> i64 {
        self.receptions
            .iter()
            .filter(|r| r.id != except)
            .filter(|r| matches!(r.status, ReceptionStatus::Deposited | ReceptionStatus::Received))
            .map(|r| r.item_count)
            .sum()
    }

    /// Units paid for but not yet picked up.
    fn undelivered_count(&self) -> i64 {
        self.receptions
            .iter()
            .filter(|r| r.status == ReceptionStatus::Deposited)
            .map(|r| r.item_count)
            .sum()
    }
}

/// Pre-fetched read state for one validation pass.
#[derive(Debug, Clone)]
pub struct CartContext {
    /// Bulk-fetched candidate products keyed by id.
    pub products: HashMap<String, Product>,
    /// Reservations touching the cart's products (or its receptions).
    pub reservations: Vec<ReservationState>,
    pub set_deals: Vec<SetDealDefinition>,
    pub channel_restriction: Option<ChannelRestriction>,
    pub commission: CommissionTable,
    /// Instant used for set-deal windows.
    pub at: DateTime<Utc>,
}

impl CartContext {
    fn find_reception(&self, reception_id: &str) -> Option<(&ReservationState, &ReservationReception)> {
        self.reservations.iter().find_map(|state| {
            state
                .receptions
                .iter()
                .find(|r| r.id == reception_id)
                .map(|r| (state, r))
        })
    }

    fn reservations_for(&self, product_id: &str) -> impl Iterator<Item = &ReservationState> {
        let product_id = product_id.to_string();
        self.reservations
            .iter()
            .filter(move |s| s.reservation.product_id == product_id)
    }
}

// =============================================================================
// Output
// =============================================================================

/// A fully priced line, ready to persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PricedLine {
    pub product_id: String,
    pub item_count: i64,
    pub unit_price: i64,
    pub discount_price: i64,
    pub original_unit_price: i64,
    pub sale_id: Option<String>,
    pub sale_discount_price: i64,
    pub reservation_price: i64,
    pub reservation_reception_id_for_deposit: Option<String>,
    pub reservation_reception_id_for_receive: Option<String>,
    pub consignment_sale_unit_price: i64,
    pub consignment_commission_unit_price: i64,
    pub total_unit_price: i64,
    pub total_price: i64,
}

/// Result of a successful validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ValidatedCart {
    pub lines: Vec<PricedLine>,
    /// `Σ (unit_price + reservation_price) × item_count`
    pub subtotal_price: i64,
    /// Signed `Σ (discount_price + sale_discount_price) × item_count`
    pub line_discount_price: i64,
    /// Signed; negative = money off.
    pub set_deal_discount_price: i64,
    pub applied_set_deals: Vec<RequestedSetDeal>,
    pub total_reservation_price: i64,
    pub total_consignment_sale_price: i64,
    pub total_consignment_commission_price: i64,
    /// Receptions to mark `deposited` when the payment commits.
    pub receptions_to_deposit: Vec<String>,
    /// Receptions to mark `received` when the payment commits.
    pub receptions_to_receive: Vec<String>,
}

/// Transaction-level amounts derived from a validated cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CartTotals {
    pub subtotal_price: i64,
    /// Amount taken off (negative for markups).
    pub discount_price: i64,
    pub point_discount_price: i64,
    pub tax_price: i64,
    pub included_tax_price: i64,
    pub total_price: i64,
}

impl ValidatedCart {
    /// Computes `total = subtotal - discount - point_discount + tax`.
    pub fn totals(
        &self,
        tax_mode: TaxMode,
        tax_rate: TaxRate,
        point_discount_price: i64,
    ) -> CoreResult<CartTotals> {
        let subtotal = Money::from_minor(self.subtotal_price);
        let discount = -(Money::from_minor(self.line_discount_price)
            + Money::from_minor(self.set_deal_discount_price));
        let points = Money::from_minor(point_discount_price);

        let before_points = subtotal - discount;
        if points.is_negative() || points > before_points.max(Money::zero()) {
            return Err(ValidationError::OutOfRange {
                field: "point_discount_price".to_string(),
                min: 0,
                max: before_points.minor().max(0),
            }
            .into());
        }

        let taxable = before_points - points;
        let (tax, included) = match tax_mode {
            TaxMode::Exclusive => (taxable.calculate_tax(tax_rate), Money::zero()),
            TaxMode::Inclusive => (Money::zero(), taxable.included_tax(tax_rate)),
        };

        Ok(CartTotals {
            subtotal_price: subtotal.minor(),
            discount_price: discount.minor(),
            point_discount_price: points.minor(),
            tax_price: tax.minor(),
            included_tax_price: included.minor(),
            total_price: (taxable + tax).minor(),
        })
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Validates and prices a cart.
///
/// Fails with `InvalidCartLine` naming the rule and product on the first
/// violation.
pub fn validate(request: &CartRequest, ctx: &CartContext) -> CoreResult<ValidatedCart> {
    if request.lines.is_empty() {
        return Err(ValidationError::Required {
            field: "lines".to_string(),
        }
        .into());
    }
    if request.lines.len() > MAX_CART_LINES {
        return Err(ValidationError::TooMany {
            field: "lines".to_string(),
            max: MAX_CART_LINES,
        }
        .into());
    }

    let requested_deals: Vec<&SetDealDefinition> = request
        .set_deals
        .iter()
        .filter_map(|r| ctx.set_deals.iter().find(|d| d.deal.id == r.set_deal_id))
        .collect();

    let mut out = ValidatedCart {
        lines: Vec::with_capacity(request.lines.len()),
        subtotal_price: 0,
        line_discount_price: 0,
        set_deal_discount_price: 0,
        applied_set_deals: Vec::new(),
        total_reservation_price: 0,
        total_consignment_sale_price: 0,
        total_consignment_commission_price: 0,
        receptions_to_deposit: Vec::new(),
        receptions_to_receive: Vec::new(),
    };

    // running totals across lines
    let mut sold_by_product: HashMap<&str, i64> = HashMap::new();
    let mut free_sold_by_product: HashMap<&str, i64> = HashMap::new();
    let mut deposited_by_reservation: HashMap<&str, i64> = HashMap::new();
    let mut seen_receptions: HashSet<&str> = HashSet::new();

    for line in &request.lines {
        // 1. membership
        let product = ctx
            .products
            .get(&line.product_id)
            .filter(|p| p.store_id == request.store_id && p.is_active)
            .ok_or_else(|| {
                CoreError::cart_line(
                    &line.product_id,
                    CartRule::ProductNotInStore,
                    format!("Product {} is not sold by this store", line.product_id),
                )
            })?;

        if line.item_count <= 0 || line.item_count > MAX_ITEM_QUANTITY {
            return Err(CoreError::cart_line(
                &product.id,
                CartRule::InvalidQuantity,
                format!("Quantity must be between 1 and {}", MAX_ITEM_QUANTITY),
            ));
        }
        if line.unit_price < 0 {
            return Err(ValidationError::MustNotBeNegative {
                field: "unit_price".to_string(),
            }
            .into());
        }

        // 2. price direction
        check_direction(request.kind, product, line)?;

        // 3. restricted channel
        if request.channel.is_restricted() {
            if let Some(restriction) = &ctx.channel_restriction {
                check_channel(restriction, product, line)?;
            }
        }

        let is_deposit = line.reservation_reception_id_for_deposit.is_some();
        let is_receive = line.reservation_reception_id_for_receive.is_some();
        if (is_deposit || is_receive) && request.kind == TransactionKind::Buy {
            return Err(CoreError::cart_line(
                &product.id,
                CartRule::ReceptionNotFound,
                "Reservations can only be used on sell transactions",
            ));
        }

        if let Some(reception_id) = &line.reservation_reception_id_for_deposit {
            // 4. reservation deposit
            let (state, reception) = lookup_reception(ctx, product, reception_id, &mut seen_receptions)?;
            check_deposit(request, product, line, state, reception, &mut deposited_by_reservation)?;
            out.receptions_to_deposit.push(reception.id.clone());
        } else if let Some(reception_id) = &line.reservation_reception_id_for_receive {
            // 5. reservation receive
            let (state, reception) = lookup_reception(ctx, product, reception_id, &mut seen_receptions)?;
            check_receive(request, product, line, state, reception)?;
            out.receptions_to_receive.push(reception.id.clone());
        } else if request.kind == TransactionKind::Sell {
            // 6. reserved inventory
            let free_sold = free_sold_by_product.entry(product.id.as_str()).or_insert(0);
            *free_sold += line.item_count;
            check_reserved_inventory(ctx, product, *free_sold)?;
        }

        if request.kind == TransactionKind::Sell && !is_deposit && !product.infinite_stock {
            let sold = sold_by_product.entry(product.id.as_str()).or_insert(0);
            *sold += line.item_count;
            if *sold > product.stock_number {
                return Err(CoreError::cart_line(
                    &product.id,
                    CartRule::InsufficientAvailability,
                    format!(
                        "Only {} of {} in stock",
                        product.stock_number, product.display_name
                    ),
                ));
            }
        }

        // 7. consignment
        let (consignment_sale, commission) = if product.is_consignment() {
            check_consignment(request.kind, product, line, &requested_deals)?;
            let unit = Money::from_minor(line.unit_price);
            (unit, ctx.commission.commission(unit, request.payment_method))
        } else {
            (Money::zero(), Money::zero())
        };

        let total_unit_price =
            line.unit_price + line.discount_price + line.sale_discount_price + line.reservation_price;
        let priced = PricedLine {
            product_id: product.id.clone(),
            item_count: line.item_count,
            unit_price: line.unit_price,
            discount_price: line.discount_price,
            original_unit_price: product.reference_price(request.kind).minor(),
            sale_id: line.sale_id.clone(),
            sale_discount_price: line.sale_discount_price,
            reservation_price: line.reservation_price,
            reservation_reception_id_for_deposit: line.reservation_reception_id_for_deposit.clone(),
            reservation_reception_id_for_receive: line.reservation_reception_id_for_receive.clone(),
            consignment_sale_unit_price: consignment_sale.minor(),
            consignment_commission_unit_price: commission.minor(),
            total_unit_price,
            total_price: total_unit_price * line.item_count,
        };

        out.subtotal_price += (priced.unit_price + priced.reservation_price) * priced.item_count;
        out.line_discount_price +=
            (priced.discount_price + priced.sale_discount_price) * priced.item_count;
        out.total_reservation_price += priced.reservation_price * priced.item_count;
        out.total_consignment_sale_price += priced.consignment_sale_unit_price * priced.item_count;
        out.total_consignment_commission_price +=
            priced.consignment_commission_unit_price * priced.item_count;
        out.lines.push(priced);
    }

    // set deals
    if !request.set_deals.is_empty() {
        if request.kind == TransactionKind::Buy {
            return Err(CoreError::InvalidCartLine {
                product_id: None,
                rule: CartRule::SetDealNotApplicable,
                reason: "Set deals only apply to sell transactions".to_string(),
            });
        }
        let candidates: Vec<SetDealCandidateLine> = out
            .lines
            .iter()
            .filter(|l| l.reservation_reception_id_for_deposit.is_none())
            .filter(|l| l.reservation_reception_id_for_receive.is_none())
            .filter(|l| {
                ctx.products
                    .get(&l.product_id)
                    .is_some_and(|p| !p.is_consignment())
            })
            .map(|l| SetDealCandidateLine {
                product_id: l.product_id.clone(),
                item_count: l.item_count,
                unit_price: l.unit_price,
            })
            .collect();

        let available = set_deal::find_from_carts(&ctx.set_deals, &candidates, ctx.at);
        out.set_deal_discount_price = set_deal::apply_requested(&available, &request.set_deals)?.minor();
        out.applied_set_deals = request.set_deals.clone();
    }

    Ok(out)
}

fn check_direction(kind: TransactionKind, product: &Product, line: &CartLineInput) -> CoreResult<()> {
    match kind {
        TransactionKind::Sell if line.discount_price > 0 || line.sale_discount_price > 0 => {
            Err(CoreError::cart_line(
                &product.id,
                CartRule::MarkupOnSell,
                "Sell lines cannot carry a markup",
            ))
        }
        TransactionKind::Buy if line.discount_price < 0 || line.sale_discount_price < 0 => {
            Err(CoreError::cart_line(
                &product.id,
                CartRule::MarkdownOnBuy,
                "Buy lines cannot reduce the payout",
            ))
        }
        _ => Ok(()),
    }
}

fn check_channel(
    restriction: &ChannelRestriction,
    product: &Product,
    line: &CartLineInput,
) -> CoreResult<()> {
    if !restriction.allowed_genre_ids.is_empty()
        && !product
            .genre_id
            .as_ref()
            .is_some_and(|g| restriction.allowed_genre_ids.contains(g))
    {
        return Err(CoreError::cart_line(
            &product.id,
            CartRule::ChannelGenreNotAllowed,
            format!("{} cannot be ordered here", product.display_name),
        ));
    }
    if !restriction.allowed_category_ids.is_empty()
        && !product
            .category_id
            .as_ref()
            .is_some_and(|c| restriction.allowed_category_ids.contains(c))
    {
        return Err(CoreError::cart_line(
            &product.id,
            CartRule::ChannelCategoryNotAllowed,
            format!("{} cannot be ordered here", product.display_name),
        ));
    }
    if let Some(cap) = restriction.max_item_count_per_line {
        if line.item_count > cap {
            return Err(CoreError::cart_line(
                &product.id,
                CartRule::ChannelQuantityCap,
                format!("At most {} per line", cap),
            ));
        }
    }
    Ok(())
}

fn lookup_reception<'a>(
    ctx: &'a CartContext,
    product: &Product,
    reception_id: &'a str,
    seen: &mut HashSet<&'a str>,
) -> CoreResult<(&'a ReservationState, &'a ReservationReception)> {
    let found = ctx
        .find_reception(reception_id)
        .filter(|(state, _)| state.reservation.product_id == product.id);

    match found {
        Some(hit) if seen.insert(reception_id) => Ok(hit),
        _ => Err(CoreError::cart_line(
            &product.id,
            CartRule::ReceptionNotFound,
            format!("Reservation reception {} does not match this product", reception_id),
        )),
    }
}

fn check_owner(
    request: &CartRequest,
    product: &Product,
    reception: &ReservationReception,
) -> CoreResult<()> {
    if request.customer_id.as_deref() != Some(reception.customer_id.as_str()) {
        return Err(CoreError::cart_line(
            &product.id,
            CartRule::ReceptionOwnerMismatch,
            "The reservation belongs to a different customer",
        ));
    }
    Ok(())
}

fn check_deposit<'a>(
    request: &CartRequest,
    product: &Product,
    line: &CartLineInput,
    state: &'a ReservationState,
    reception: &ReservationReception,
    deposited_by_reservation: &mut HashMap<&'a str, i64>,
) -> CoreResult<()> {
    let reservation = &state.reservation;

    if line.unit_price != 0 {
        return Err(CoreError::cart_line(
            &product.id,
            CartRule::DepositUnitPriceNotZero,
            "A deposit line must have a unit price of 0",
        ));
    }
    if line.reservation_price != reservation.deposit_price {
        return Err(CoreError::cart_line(
            &product.id,
            CartRule::DepositPriceMismatch,
            format!("The deposit for this reservation is {}", reservation.deposit_price),
        ));
    }
    if reception.status != ReceptionStatus::Created {
        return Err(CoreError::cart_line(
            &product.id,
            CartRule::ReceptionNotCreated,
            format!("The reservation reception is already {}", reception.status),
        ));
    }
    if reservation.status != ReservationStatus::Open {
        return Err(CoreError::cart_line(
            &product.id,
            CartRule::ReservationNotOpen,
            format!("Reservation {} is no longer accepting deposits", reservation.display_name),
        ));
    }
    check_owner(request, product, reception)?;
    if line.item_count != reception.item_count {
        return Err(CoreError::cart_line(
            &product.id,
            CartRule::ReceptionCountMismatch,
            format!("The reservation is for {} item(s)", reception.item_count),
        ));
    }

    let in_cart = deposited_by_reservation
        .entry(reservation.id.as_str())
        .or_insert(0);
    let margin = reservation.limit_count - state.committed_count(&reception.id) - *in_cart;
    if line.item_count > margin {
        return Err(CoreError::cart_line(
            &product.id,
            CartRule::ReservationMarginExceeded,
            format!("Only {} reservation slot(s) remain", margin.max(0)),
        ));
    }
    *in_cart += line.item_count;
    Ok(())
}

fn check_receive(
    request: &CartRequest,
    product: &Product,
    line: &CartLineInput,
    state: &ReservationState,
    reception: &ReservationReception,
) -> CoreResult<()> {
    if reception.status != ReceptionStatus::Deposited {
        return Err(CoreError::cart_line(
            &product.id,
            CartRule::ReceptionNotDeposited,
            format!("The reservation reception is {}, not deposited", reception.status),
        ));
    }
    check_owner(request, product, reception)?;
    if line.item_count != reception.item_count {
        return Err(CoreError::cart_line(
            &product.id,
            CartRule::ReceptionCountMismatch,
            format!("The reservation is for {} item(s)", reception.item_count),
        ));
    }
    if line.reservation_price != -state.reservation.deposit_price {
        return Err(CoreError::cart_line(
            &product.id,
            CartRule::ReceivePriceMismatch,
            format!(
                "The receive line must offset the deposit of {}",
                state.reservation.deposit_price
            ),
        ));
    }
    Ok(())
}

fn check_reserved_inventory(ctx: &CartContext, product: &Product, free_sold: i64) -> CoreResult<()> {
    let mut undelivered = 0;
    for state in ctx.reservations_for(&product.id) {
        match state.reservation.status {
            ReservationStatus::Open => {
                return Err(CoreError::cart_line(
                    &product.id,
                    CartRule::ProductReserved,
                    format!("{} is reserved and cannot be sold", product.display_name),
                ));
            }
            ReservationStatus::Closed => undelivered += state.undelivered_count(),
            ReservationStatus::Completed => {}
        }
    }

    if undelivered > 0 && !product.infinite_stock {
        let cap = product.stock_number - undelivered;
        if free_sold > cap {
            return Err(CoreError::cart_line(
                &product.id,
                CartRule::ExceedsUndeliveredCap,
                format!("Only {} can be sold; the rest is held for reservations", cap.max(0)),
            ));
        }
    }
    Ok(())
}

fn check_consignment(
    kind: TransactionKind,
    product: &Product,
    line: &CartLineInput,
    requested_deals: &[&SetDealDefinition],
) -> CoreResult<()> {
    if kind != TransactionKind::Sell {
        return Err(CoreError::cart_line(
            &product.id,
            CartRule::ConsignmentNotSellable,
            "Consignment items cannot be bought",
        ));
    }
    let stacked = line.discount_price != 0
        || line.sale_id.is_some()
        || line.sale_discount_price != 0
        || requested_deals.iter().any(|d| d.contains_product(&product.id));
    if stacked {
        return Err(CoreError::cart_line(
            &product.id,
            CartRule::ConsignmentDiscountStacking,
            "Consignment items cannot be discounted",
        ));
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
