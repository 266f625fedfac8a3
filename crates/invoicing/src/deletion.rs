//! Scheduled deletion of contracts and equipment.
//!
//! A deletion request waits for a grace period (until the invoice run that
//! bills the month of the request), then for that month's invoice, and is
//! further held back while the contract has an unpaid invoice that is still
//! within its payment term.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use forgebill_billing::BillingPeriod;
use forgebill_core::{CompanyId, ContractId, DeletionId, DomainError, DomainResult, EntityId};

use crate::invoice::Invoice;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeletionTarget {
    Contract { contract_id: ContractId },
    Equipment { contract_id: ContractId, entity_id: EntityId },
}

impl DeletionTarget {
    pub fn contract_id(&self) -> ContractId {
        match self {
            DeletionTarget::Contract { contract_id } => *contract_id,
            DeletionTarget::Equipment { contract_id, .. } => *contract_id,
        }
    }
}

impl core::fmt::Display for DeletionTarget {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DeletionTarget::Contract { contract_id } => write!(f, "contract {contract_id}"),
            DeletionTarget::Equipment {
                contract_id,
                entity_id,
            } => write!(f, "equipment {entity_id} of contract {contract_id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledDeletion {
    pub id: DeletionId,
    pub company_id: CompanyId,
    pub target: DeletionTarget,
    pub requested_on: NaiveDate,
    /// Calendar month of the request; the last cycle the contract is billed for.
    pub final_period: BillingPeriod,
    /// Invoice run date for `final_period`; deletion is possible the day after.
    pub delete_after: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum DeletionDecision {
    Eligible,
    Deferred { until: NaiveDate, reason: String },
    /// The final cycle has not been invoiced yet.
    AwaitingFinalInvoice { period: BillingPeriod },
}

impl ScheduledDeletion {
    /// Schedule `target` for deletion after the invoice run on
    /// `generation_day` of the month following `requested_on`.
    pub fn new(
        id: DeletionId,
        company_id: CompanyId,
        target: DeletionTarget,
        requested_on: NaiveDate,
        generation_day: u32,
    ) -> DomainResult<Self> {
        if !(1..=28).contains(&generation_day) {
            return Err(DomainError::validation(format!(
                "generation day must be between 1 and 28, got {generation_day}"
            )));
        }
        let final_period = BillingPeriod::calendar_month(requested_on.year(), requested_on.month())?;
        let delete_after = first_of_next_month(requested_on)
            .and_then(|first| first.with_day(generation_day))
            .ok_or_else(|| {
                DomainError::validation(format!("cannot schedule deletion on {requested_on}"))
            })?;
        Ok(Self {
            id,
            company_id,
            target,
            requested_on,
            final_period,
            delete_after,
        })
    }

    /// Decide whether the target may be deleted on `today`.
    ///
    /// `invoices` are the invoices of the target's contract. When
    /// `final_invoice_expected` is set (the contract was billable in
    /// `final_period`), deletion waits until a live invoice covers that month.
    pub fn evaluate(
        &self,
        today: NaiveDate,
        invoices: &[Invoice],
        final_invoice_expected: bool,
    ) -> DeletionDecision {
        if today <= self.delete_after {
            return DeletionDecision::Deferred {
                until: self.delete_after,
                reason: "grace period has not elapsed".to_string(),
            };
        }

        let contract_id = self.target.contract_id();
        let own = || invoices.iter().filter(move |inv| inv.contract_id() == contract_id);

        let final_invoiced = own().any(|inv| {
            inv.is_live()
                && inv
                    .period()
                    .is_some_and(|period| period.overlaps(&self.final_period))
        });
        if final_invoice_expected && !final_invoiced {
            return DeletionDecision::AwaitingFinalInvoice {
                period: self.final_period,
            };
        }

        let blocking_due = own()
            .filter(|inv| inv.is_within_payment_term(today))
            .filter_map(|inv| inv.due_date())
            .max();

        match blocking_due {
            Some(due) => DeletionDecision::Deferred {
                until: due,
                reason: "unpaid invoice within its payment term".to_string(),
            },
            None => DeletionDecision::Eligible,
        }
    }
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    }
}
