//! Billing plans and company subscriptions.

use chrono::{DateTime, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use forgebill_core::{CompanyId, Currency, DomainError, DomainResult, PlanId, SubscriptionId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    Monthly,
    Yearly,
    OneTime,
}

impl BillingCycle {
    /// The date one cycle after `date`; `None` for one-time plans.
    ///
    /// Month-end dates clamp (Jan 31 + 1 month = Feb 28/29).
    pub fn next_date(self, date: NaiveDate) -> Option<NaiveDate> {
        match self {
            BillingCycle::Monthly => date.checked_add_months(Months::new(1)),
            BillingCycle::Yearly => date.checked_add_months(Months::new(12)),
            BillingCycle::OneTime => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPlan {
    pub id: PlanId,
    /// `None` = global plan offered to every company.
    pub company_id: Option<CompanyId>,
    pub name: String,
    pub price: Decimal,
    pub currency: Currency,
    pub cycle: BillingCycle,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Changes to a plan's commercial terms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanUpdate {
    pub name: Option<String>,
    pub price: Option<Decimal>,
    pub cycle: Option<BillingCycle>,
    pub active: Option<bool>,
}

impl BillingPlan {
    pub fn new(
        id: PlanId,
        company_id: Option<CompanyId>,
        name: impl Into<String>,
        price: Decimal,
        currency: Currency,
        cycle: BillingCycle,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let plan = Self {
            id,
            company_id,
            name: name.into().trim().to_string(),
            price,
            currency,
            cycle,
            active: true,
            created_at: now,
            updated_at: now,
        };
        plan.validate()?;
        Ok(plan)
    }

    fn validate(&self) -> DomainResult<()> {
        if self.name.is_empty() {
            return Err(DomainError::validation("plan name is required"));
        }
        if self.price < Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "plan price must not be negative, got {}",
                self.price
            )));
        }
        Ok(())
    }

    pub fn is_visible_to(&self, company_id: CompanyId) -> bool {
        self.company_id.is_none_or(|owner| owner == company_id)
    }

    pub fn apply(&mut self, update: PlanUpdate, now: DateTime<Utc>) -> DomainResult<()> {
        let mut next = self.clone();
        if let Some(name) = update.name {
            next.name = name.trim().to_string();
        }
        if let Some(price) = update.price {
            next.price = price;
        }
        if let Some(cycle) = update.cycle {
            next.cycle = cycle;
        }
        if let Some(active) = update.active {
            next.active = active;
        }
        next.validate()?;
        next.updated_at = now;
        *self = next;
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub company_id: CompanyId,
    pub plan_id: PlanId,
    /// Cycle of the plan at subscription time.
    pub cycle: BillingCycle,
    pub start_date: NaiveDate,
    pub status: SubscriptionStatus,
    /// Set once at creation and moved only by [`Subscription::advance`].
    pub next_payment_date: Option<NaiveDate>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn start(
        id: SubscriptionId,
        company_id: CompanyId,
        plan: &BillingPlan,
        start_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if !plan.active {
            return Err(DomainError::validation(format!("plan {} is not active", plan.id)));
        }
        if !plan.is_visible_to(company_id) {
            return Err(DomainError::not_found(format!(
                "plan {} is not available to company {company_id}",
                plan.id
            )));
        }
        Ok(Self {
            id,
            company_id,
            plan_id: plan.id,
            cycle: plan.cycle,
            start_date,
            status: SubscriptionStatus::Active,
            next_payment_date: plan.cycle.next_date(start_date),
            cancelled_at: None,
            created_at: now,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_active("cancel")?;
        self.status = SubscriptionStatus::Cancelled;
        self.cancelled_at = Some(now);
        Ok(())
    }

    pub fn expire(&mut self) -> DomainResult<()> {
        self.ensure_active("expire")?;
        self.status = SubscriptionStatus::Expired;
        Ok(())
    }

    /// Move `next_payment_date` forward by one cycle and return it.
    pub fn advance(&mut self) -> DomainResult<NaiveDate> {
        self.ensure_active("advance")?;
        let current = self.next_payment_date.ok_or_else(|| {
            DomainError::invalid_transition(format!(
                "subscription {} is one-time and has no next payment",
                self.id
            ))
        })?;
        let next = self.cycle.next_date(current).ok_or_else(|| {
            DomainError::invalid_transition(format!("subscription {} cannot advance", self.id))
        })?;
        self.next_payment_date = Some(next);
        Ok(next)
    }

    fn ensure_active(&self, action: &str) -> DomainResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(DomainError::invalid_transition(format!(
                "cannot {action} subscription {} in status {:?}",
                self.id, self.status
            )))
        }
    }
}
