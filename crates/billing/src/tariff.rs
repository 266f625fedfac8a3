//! Contracts and their tariff plans (read by the engine, owned elsewhere).

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use forgebill_core::{CompanyId, ContractId, DomainError, DomainResult, TariffId};

use crate::activity::ActivityInterval;
use crate::period::BillingPeriod;

/// Per-contract pricing rules.
///
/// Rates are amounts per invoiced period in the company's billing currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TariffPlan {
    pub id: TariffId,
    pub name: String,
    /// Contract-level fee per period, prorated by the contract term.
    #[serde(default)]
    pub base_rate: Decimal,
    /// Fee per billable entity per period, prorated by entity activity.
    #[serde(default)]
    pub per_object_rate: Decimal,
    /// Optional fee per billable entity per whole active day.
    #[serde(default)]
    pub daily_rate: Option<Decimal>,
}

impl TariffPlan {
    pub fn validate(&self) -> DomainResult<()> {
        if self.base_rate.is_sign_negative() && !self.base_rate.is_zero() {
            return Err(DomainError::validation("tariff base_rate must not be negative"));
        }
        if self.per_object_rate.is_sign_negative() && !self.per_object_rate.is_zero() {
            return Err(DomainError::validation(
                "tariff per_object_rate must not be negative",
            ));
        }
        if let Some(rate) = self.daily_rate {
            if rate.is_sign_negative() && !rate.is_zero() {
                return Err(DomainError::validation("tariff daily_rate must not be negative"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Active,
    Suspended,
    Terminated,
}

/// The billable unit: a company's agreement priced by one tariff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub id: ContractId,
    pub company_id: CompanyId,
    pub tariff_id: TariffId,
    pub number: String,
    pub status: ContractStatus,
    pub start_date: NaiveDate,
    /// Last day of service (inclusive), if the contract has an end.
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

impl Contract {
    /// The contract term as whole days of activity.
    pub fn term(&self) -> ActivityInterval {
        ActivityInterval::whole_days(self.start_date, self.end_date)
    }

    pub fn overlaps(&self, period: &BillingPeriod) -> bool {
        self.start_date <= period.end() && self.end_date.is_none_or(|end| end >= period.start())
    }

    /// Active contracts whose term touches the period are due for billing.
    pub fn is_billable_in(&self, period: &BillingPeriod) -> bool {
        self.status == ContractStatus::Active && self.overlaps(period)
    }
}
