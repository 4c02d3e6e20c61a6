//! # Set-Deal Matching
//!
//! Finds which bundle discounts a cart qualifies for, and how often.
//!
//! ## Greedy Matching
//! ```text
//! remaining cart ──► every applicable deal that still fits
//!        ▲                      │
//!        │                      ▼
//!        │           pick the largest |discount|
//!        │                      │
//!        └──── subtract its ◄───┘
//!              target units
//! ```
//! The loop stops when no deal fits the remaining units. The caller then
//! checks that each requested `(set_deal_id, apply_count)` is covered.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CartRule, CoreError, CoreResult};
use crate::money::Money;
use crate::types::{SetDeal, SetDealDiscountKind, SetDealProduct, SetDealStatus};

/// A set deal with its required products.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SetDealDefinition {
    pub deal: SetDeal,
    pub products: Vec<SetDealProduct>,
}

impl SetDealDefinition {
    /// Published and inside its date window at `at`.
    pub fn is_applicable(&self, at: DateTime<Utc>) -> bool {
        self.deal.status == SetDealStatus::Published
            && self.deal.start_at <= at
            && self.deal.expire_at.map_or(true, |expire| at <= expire)
    }

    pub fn contains_product(&self, product_id: &str) -> bool {
        self.products.iter().any(|p| p.product_id == product_id)
    }

    /// Signed discount for a bundle worth `total` (negative = money off).
    ///
    /// The discounted price never goes below zero.
    pub fn discount_for(&self, total: Money) -> Money {
        let amount = self.deal.discount_amount;
        let discounted = match self.deal.discount_kind {
            SetDealDiscountKind::Fixed => total + Money::from_minor(amount),
            SetDealDiscountKind::Percent => total + total.percent_of(amount),
        };
        let discounted = if discounted.is_negative() {
            Money::zero()
        } else {
            discounted
        };
        discounted - total
    }
}

/// A priced unit group the matcher may draw from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SetDealCandidateLine {
    pub product_id: String,
    pub item_count: i64,
    pub unit_price: i64,
}

/// How often a deal applies and what it saves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AvailableSetDeal {
    pub set_deal_id: String,
    pub display_name: String,
    pub apply_count: i64,
    /// Signed discount of each application, in application order.
    pub discounts: Vec<i64>,
}

impl AvailableSetDeal {
    pub fn total_discount_price(&self) -> i64 {
        self.discounts.iter().sum()
    }
}

/// A caller-selected deal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RequestedSetDeal {
    pub set_deal_id: String,
    pub apply_count: i64,
}

/// Greedily matches applicable deals against the cart.
pub fn find_from_carts(
    deals: &[SetDealDefinition],
    lines: &[SetDealCandidateLine],
    at: DateTime<Utc>,
) -> Vec<AvailableSetDeal> {
    let applicable: Vec<&SetDealDefinition> = deals
        .iter()
        .filter(|d| d.is_applicable(at) && !d.products.is_empty())
        .collect();

    let mut remaining: Vec<SetDealCandidateLine> =
        lines.iter().filter(|l| l.item_count > 0).cloned().collect();
    let mut available: Vec<AvailableSetDeal> = Vec::new();

    loop {
        let best = applicable
            .iter()
            .filter_map(|deal| {
                take_targets(deal, &remaining).map(|targets| {
                    let total: Money = targets
                        .iter()
                        .map(|(idx, count)| Money::from_minor(remaining[*idx].unit_price) * *count)
                        .sum();
                    (*deal, targets, deal.discount_for(total))
                })
            })
            // first deal wins ties
            .fold(None, |best: Option<(&SetDealDefinition, Vec<(usize, i64)>, Money)>, cand| {
                match best {
                    Some(b) if b.2.abs() >= cand.2.abs() => Some(b),
                    _ => Some(cand),
                }
            });

        let Some((deal, targets, discount)) = best else {
            break;
        };

        for (idx, count) in &targets {
            remaining[*idx].item_count -= count;
        }

        match available.iter_mut().find(|a| a.set_deal_id == deal.deal.id) {
            Some(entry) => {
                entry.apply_count += 1;
                entry.discounts.push(discount.minor());
            }
            None => available.push(AvailableSetDeal {
                set_deal_id: deal.deal.id.clone(),
                display_name: deal.deal.display_name.clone(),
                apply_count: 1,
                discounts: vec![discount.minor()],
            }),
        }
    }

    available
}

/// Indices and counts of `remaining` that satisfy one application of `deal`.
fn take_targets(
    deal: &SetDealDefinition,
    remaining: &[SetDealCandidateLine],
) -> Option<Vec<(usize, i64)>> {
    let mut used: HashMap<usize, i64> = HashMap::new();
    let mut targets = Vec::new();

    for required in &deal.products {
        let mut need = required.item_count;
        for (idx, line) in remaining.iter().enumerate() {
            if need <= 0 {
                break;
            }
            if line.product_id != required.product_id {
                continue;
            }
            let already = used.get(&idx).copied().unwrap_or(0);
            let take = (line.item_count - already).min(need);
            if take <= 0 {
                continue;
            }
            *used.entry(idx).or_insert(0) += take;
            targets.push((idx, take));
            need -= take;
        }
        if need > 0 {
            return None;
        }
    }
    Some(targets)
}

/// Checks every requested deal is covered and returns the signed total
/// discount of the requested applications.
pub fn apply_requested(
    available: &[AvailableSetDeal],
    requested: &[RequestedSetDeal],
) -> CoreResult<Money> {
    let mut total = Money::zero();
    for request in requested {
        let found = available
            .iter()
            .find(|a| a.set_deal_id == request.set_deal_id && a.apply_count >= request.apply_count)
            .filter(|_| request.apply_count > 0);

        let Some(found) = found else {
            return Err(CoreError::InvalidCartLine {
                product_id: None,
                rule: CartRule::SetDealNotApplicable,
                reason: format!(
                    "Set deal {} cannot be applied {} time(s) to this cart",
                    request.set_deal_id, request.apply_count
                ),
            });
        };

        total += found
            .discounts
            .iter()
            .take(request.apply_count as usize)
            .map(|d| Money::from_minor(*d))
            .sum();
    }
    Ok(total)
}

/// Status a deal should have on `today`, if it differs from its current one.
///
/// Drafts publish once `start_at <= today`; published deals expire once
/// `expire_at` is before `today`.
pub fn refreshed_status(deal: &SetDeal, today: DateTime<Utc>) -> Option<SetDealStatus> {
    match deal.status {
        SetDealStatus::Deleted | SetDealStatus::Expired => None,
        status => {
            if deal.expire_at.is_some_and(|expire| expire < today) {
                return Some(SetDealStatus::Expired);
            }
            if status == SetDealStatus::Draft && deal.start_at <= today {
                return Some(SetDealStatus::Published);
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn deal(id: &str, kind: SetDealDiscountKind, amount: i64, products: &[(&str, i64)]) -> SetDealDefinition {
        SetDealDefinition {
            deal: SetDeal {
                id: id.to_string(),
                store_id: "s-1".to_string(),
                display_name: format!("deal {id}"),
                discount_kind: kind,
                discount_amount: amount,
                status: SetDealStatus::Published,
                start_at: Utc::now() - Duration::days(1),
                expire_at: None,
            },
            products: products
                .iter()
                .map(|(p, n)| SetDealProduct {
                    set_deal_id: id.to_string(),
                    product_id: p.to_string(),
                    item_count: *n,
                })
                .collect(),
        }
    }

    fn line(product_id: &str, item_count: i64, unit_price: i64) -> SetDealCandidateLine {
        SetDealCandidateLine {
            product_id: product_id.to_string(),
            item_count,
            unit_price,
        }
    }

    #[test]
    fn test_repeats_deal_while_it_fits() {
        let deals = vec![deal("d1", SetDealDiscountKind::Fixed, -100, &[("a", 1), ("b", 1)])];
        let lines = vec![line("a", 3, 500), line("b", 2, 300)];

        let found = find_from_carts(&deals, &lines, Utc::now());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].apply_count, 2);
        assert_eq!(found[0].total_discount_price(), -200);
    }

    #[test]
    fn test_prefers_largest_discount() {
        let deals = vec![
            deal("small", SetDealDiscountKind::Fixed, -50, &[("a", 2)]),
            deal("big", SetDealDiscountKind::Percent, -20, &[("a", 2)]),
        ];
        let lines = vec![line("a", 2, 1000)];

        let found = find_from_carts(&deals, &lines, Utc::now());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].set_deal_id, "big");
        assert_eq!(found[0].discounts, vec![-400]);
    }

    #[test]
    fn test_ignores_unpublished_and_expired() {
        let mut draft = deal("d", SetDealDiscountKind::Fixed, -10, &[("a", 1)]);
        draft.deal.status = SetDealStatus::Draft;
        let mut expired = deal("e", SetDealDiscountKind::Fixed, -10, &[("a", 1)]);
        expired.deal.expire_at = Some(Utc::now() - Duration::hours(1));

        let found = find_from_carts(&[draft, expired], &[line("a", 5, 100)], Utc::now());
        assert!(found.is_empty());
    }

    #[test]
    fn test_fixed_discount_never_below_zero() {
        let d = deal("d", SetDealDiscountKind::Fixed, -1000, &[("a", 1)]);
        assert_eq!(d.discount_for(Money::from_minor(300)).minor(), -300);
    }

    #[test]
    fn test_apply_requested() {
        let available = vec![AvailableSetDeal {
            set_deal_id: "d1".to_string(),
            display_name: "d1".to_string(),
            apply_count: 2,
            discounts: vec![-100, -80],
        }];

        let ok = apply_requested(
            &available,
            &[RequestedSetDeal { set_deal_id: "d1".to_string(), apply_count: 1 }],
        )
        .unwrap();
        assert_eq!(ok.minor(), -100);

        let err = apply_requested(
            &available,
            &[RequestedSetDeal { set_deal_id: "d1".to_string(), apply_count: 3 }],
        )
        .unwrap_err();
        assert_eq!(err.cart_rule(), Some(CartRule::SetDealNotApplicable));
    }

    #[test]
    fn test_refreshed_status() {
        let now = Utc::now();
        let mut d = deal("d", SetDealDiscountKind::Fixed, -10, &[("a", 1)]).deal;
        d.status = SetDealStatus::Draft;
        assert_eq!(refreshed_status(&d, now), Some(SetDealStatus::Published));

        d.status = SetDealStatus::Published;
        assert_eq!(refreshed_status(&d, now), None);

        d.expire_at = Some(now - Duration::days(2));
        assert_eq!(refreshed_status(&d, now), Some(SetDealStatus::Expired));
    }
}
