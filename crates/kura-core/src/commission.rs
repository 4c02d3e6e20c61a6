//! # Consignment Commission
//!
//! Commission percent per payment method. The table is configuration, not
//! code: stores with new wallet types add a row instead of a match arm.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;
use crate::types::PaymentMethod;

/// Payment method → commission percent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CommissionTable {
    rates: BTreeMap<PaymentMethod, i64>,
}

impl CommissionTable {
    pub fn new(rates: BTreeMap<PaymentMethod, i64>) -> Self {
        CommissionTable { rates }
    }

    /// Percent for a method; methods without a row pay no commission.
    pub fn percent_for(&self, method: PaymentMethod) -> i64 {
        self.rates.get(&method).copied().unwrap_or(0)
    }

    /// `round(unit_price * percent / 100)` for the method's percent.
    pub fn commission(&self, unit_price: Money, method: PaymentMethod) -> Money {
        unit_price.percent_of(self.percent_for(method))
    }

    pub fn rates(&self) -> &BTreeMap<PaymentMethod, i64> {
        &self.rates
    }
}

impl Default for CommissionTable {
    /// Cash/bank at 10%, card and wallets at 13%.
    fn default() -> Self {
        let rates = BTreeMap::from([
            (PaymentMethod::Cash, 10),
            (PaymentMethod::Bank, 10),
            (PaymentMethod::Card, 13),
            (PaymentMethod::EMoney, 13),
            (PaymentMethod::Qr, 13),
        ]);
        CommissionTable { rates }
    }
}
