//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Every price, cost lot and cash movement is an integer count of the    │
//! │  smallest currency unit.                                               │
//! │                                                                         │
//! │    1000 / 3  = 333 per unit (×3 = 999)                                 │
//! │    We KNOW we lost 1 unit, and distribute it explicitly                │
//! │    (see `Money::split`)                                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Records store plain `i64` columns; `Money` is the arithmetic wrapper used
//! while pricing carts and computing costs.
//!
//! ## Usage
//! ```rust
//! use kura_core::money::Money;
//!
//! let price = Money::from_minor(1200);
//! let line = price * 3;
//! assert_eq!(line.minor(), 3600);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use ts_rs::TS;

use crate::types::TaxRate;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit.
///
/// Signed: negative values are discounts, refunds and cash leaving a drawer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from the smallest currency unit.
    #[inline]
    pub const fn from_minor(amount: i64) -> Self {
        Money(amount)
    }

    /// Returns the value in the smallest currency unit.
    #[inline]
    pub const fn minor(&self) -> i64 {
        self.0
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Returns the absolute value.
    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Multiplies money by a quantity.
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// Tax added on top of an exclusive amount.
    ///
    /// ## Example
    /// ```rust
    /// use kura_core::money::Money;
    /// use kura_core::types::TaxRate;
    ///
    /// let tax = Money::from_minor(1000).calculate_tax(TaxRate::from_bps(1000));
    /// assert_eq!(tax.minor(), 100);
    /// ```
    pub fn calculate_tax(&self, rate: TaxRate) -> Money {
        Money(div_round(self.0 as i128 * rate.bps() as i128, 10_000))
    }

    /// Tax portion already contained in an inclusive amount.
    ///
    /// ## Example
    /// ```rust
    /// use kura_core::money::Money;
    /// use kura_core::types::TaxRate;
    ///
    /// // 1100 including 10% tax contains 100 of tax
    /// let tax = Money::from_minor(1100).included_tax(TaxRate::from_bps(1000));
    /// assert_eq!(tax.minor(), 100);
    /// ```
    pub fn included_tax(&self, rate: TaxRate) -> Money {
        let bps = rate.bps() as i128;
        Money(div_round(self.0 as i128 * bps, 10_000 + bps))
    }

    /// `round(self * percent / 100)`, rounding halves away from zero.
    ///
    /// Used for consignment commission and percentage set deals.
    ///
    /// ## Example
    /// ```rust
    /// use kura_core::money::Money;
    ///
    /// assert_eq!(Money::from_minor(1050).percent_of(10).minor(), 105);
    /// assert_eq!(Money::from_minor(15).percent_of(10).minor(), 2);
    /// ```
    pub fn percent_of(&self, percent: i64) -> Money {
        Money(div_round(self.0 as i128 * percent as i128, 100))
    }

    /// `round(self / count)`, rounding halves away from zero.
    ///
    /// ## Example
    /// ```rust
    /// use kura_core::money::Money;
    ///
    /// assert_eq!(Money::from_minor(201).div_rounded(2).minor(), 101);
    /// assert_eq!(Money::from_minor(1000).div_rounded(3).minor(), 333);
    /// ```
    pub fn div_rounded(&self, count: i64) -> Money {
        if count == 0 {
            return Money::zero();
        }
        Money(div_round(self.0 as i128, count as i128))
    }

    /// Splits the amount into `count` integer parts that sum back exactly.
    ///
    /// The remainder is spread one unit at a time over the leading parts.
    ///
    /// ## Example
    /// ```rust
    /// use kura_core::money::Money;
    ///
    /// let parts = Money::from_minor(1000).split(3);
    /// let minors: Vec<i64> = parts.iter().map(|m| m.minor()).collect();
    /// assert_eq!(minors, vec![334, 333, 333]);
    /// ```
    pub fn split(&self, count: i64) -> Vec<Money> {
        if count <= 0 {
            return Vec::new();
        }
        let base = self.0.div_euclid(count);
        let remainder = self.0.rem_euclid(count);
        (0..count)
            .map(|i| Money(if i < remainder { base + 1 } else { base }))
            .collect()
    }
}

/// Integer division rounding halves away from zero.
fn div_round(numerator: i128, denominator: i128) -> i64 {
    let half = denominator / 2;
    let rounded = if numerator >= 0 {
        (numerator + half) / denominator
    } else {
        (numerator - half) / denominator
    };
    rounded as i64
}

// =============================================================================
// Trait Implementations
// =============================================================================

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl From<i64> for Money {
    fn from(amount: i64) -> Self {
        Money(amount)
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Neg for Money {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Money(-self.0)
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), Add::add)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
