//! Period & proration calculator.
//!
//! Pure functions from (rate, period, activity) to a priced charge. Day counting
//! follows `activity::active_days`: only whole days inside an activity interval
//! count. Amounts are rounded once, at the end, to the currency's minor unit.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use forgebill_core::{Currency, DomainError, DomainResult};

use crate::activity::{ActivityInterval, active_days};
use crate::period::BillingPeriod;

/// Charge applied to entities with no active day in the period.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InactiveDiscountPolicy {
    pub enabled: bool,
    /// Fraction of the period rate charged for an inactive entity (0..=1).
    pub ratio: Decimal,
}

impl InactiveDiscountPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ratio: Decimal::ZERO,
        }
    }
}

impl Default for InactiveDiscountPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

/// How a charge was derived; carried into invoice line descriptions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChargeBasis {
    FullPeriod,
    Prorated { active_days: u32, period_days: u32 },
    InactiveDiscount { ratio: Decimal },
    Daily { active_days: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charge {
    pub basis: ChargeBasis,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
}

#[derive(Debug, Clone)]
pub struct ProrationCalculator {
    currency: Currency,
    discount: InactiveDiscountPolicy,
}

impl ProrationCalculator {
    pub fn new(currency: Currency, discount: InactiveDiscountPolicy) -> Self {
        Self { currency, discount }
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    /// Charge `rate` for the share of `period` covered by `activity`.
    ///
    /// Returns `None` when nothing is owed (zero rate or no whole active day).
    pub fn prorate(
        &self,
        rate: Decimal,
        period: &BillingPeriod,
        activity: &[ActivityInterval],
    ) -> DomainResult<Option<Charge>> {
        check_rate(rate)?;
        if rate.is_zero() {
            return Ok(None);
        }

        let period_days = period.days();
        let active = active_days(period, activity);
        if active == 0 {
            return Ok(None);
        }

        if active == period_days {
            let amount = self.currency.round(rate);
            return Ok(Some(single(ChargeBasis::FullPeriod, amount)));
        }

        let raw = rate
            .checked_mul(Decimal::from(active))
            .and_then(|v| v.checked_div(Decimal::from(period_days)))
            .ok_or_else(|| DomainError::validation(format!("proration of {rate} overflowed")))?;
        let amount = self.currency.round(raw);
        Ok(Some(single(
            ChargeBasis::Prorated {
                active_days: active,
                period_days,
            },
            amount,
        )))
    }

    /// Like [`prorate`](Self::prorate), but a fully inactive entity is charged
    /// `rate * ratio` when the inactive-discount policy is enabled.
    pub fn prorate_or_discount(
        &self,
        rate: Decimal,
        period: &BillingPeriod,
        activity: &[ActivityInterval],
    ) -> DomainResult<Option<Charge>> {
        if let Some(charge) = self.prorate(rate, period, activity)? {
            return Ok(Some(charge));
        }
        if rate.is_zero() || !self.discount.enabled || active_days(period, activity) > 0 {
            return Ok(None);
        }

        let ratio = self.discount.ratio;
        let raw = rate
            .checked_mul(ratio)
            .ok_or_else(|| DomainError::validation(format!("discount of {rate} overflowed")))?;
        let amount = self.currency.round(raw);
        if amount.is_zero() {
            return Ok(None);
        }
        Ok(Some(single(ChargeBasis::InactiveDiscount { ratio }, amount)))
    }

    /// `daily_rate` times the number of whole active days.
    pub fn daily(
        &self,
        daily_rate: Decimal,
        period: &BillingPeriod,
        activity: &[ActivityInterval],
    ) -> DomainResult<Option<Charge>> {
        check_rate(daily_rate)?;
        let active = active_days(period, activity);
        if daily_rate.is_zero() || active == 0 {
            return Ok(None);
        }

        let unit_price = self.currency.round(daily_rate);
        let quantity = Decimal::from(active);
        let amount = unit_price
            .checked_mul(quantity)
            .ok_or_else(|| DomainError::validation(format!("daily charge of {daily_rate} overflowed")))?;
        Ok(Some(Charge {
            basis: ChargeBasis::Daily {
                active_days: active,
            },
            quantity,
            unit_price,
            amount: self.currency.round(amount),
        }))
    }
}

fn check_rate(rate: Decimal) -> DomainResult<()> {
    if rate < Decimal::ZERO {
        return Err(DomainError::validation(format!("rate must not be negative, got {rate}")));
    }
    Ok(())
}

fn single(basis: ChargeBasis, amount: Decimal) -> Charge {
    Charge {
        basis,
        quantity: Decimal::ONE,
        unit_price: amount,
        amount,
    }
}
