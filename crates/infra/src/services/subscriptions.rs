//! Billing plans and company subscriptions.

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::info;

use forgebill_billing::{BillingCycle, BillingPlan, PlanUpdate, Subscription};
use forgebill_core::{CompanyId, Currency, PlanId, SubscriptionId};

use crate::clock::Clock;
use crate::error::{BillingError, BillingResult};
use crate::store::PlanStore;

#[derive(Clone)]
pub struct SubscriptionService {
    plans: Arc<dyn PlanStore>,
    clock: Arc<dyn Clock>,
}

impl SubscriptionService {
    pub fn new(plans: Arc<dyn PlanStore>, clock: Arc<dyn Clock>) -> Self {
        Self { plans, clock }
    }

    /// Create a plan; `company_id = None` offers it to every company.
    pub fn create_plan(
        &self,
        company_id: Option<CompanyId>,
        name: &str,
        price: Decimal,
        currency: Currency,
        cycle: BillingCycle,
    ) -> BillingResult<BillingPlan> {
        let id = self.plans.next_plan_id()?;
        let plan = BillingPlan::new(id, company_id, name, price, currency, cycle, self.clock.now())?;
        self.plans.insert_plan(&plan)?;
        info!(plan_id = %plan.id, name = %plan.name, price = %plan.price, "billing plan created");
        Ok(plan)
    }

    /// Change a plan's terms.
    ///
    /// Plans referenced by an active subscription only change through an
    /// administrative correction.
    pub fn update_plan(
        &self,
        plan_id: PlanId,
        update: PlanUpdate,
        administrative_correction: bool,
    ) -> BillingResult<BillingPlan> {
        let mut plan = self.get_plan(plan_id)?;
        if !administrative_correction {
            let in_use = self
                .plans
                .subscriptions_for_plan(plan_id)?
                .iter()
                .filter(|s| s.is_active())
                .count();
            if in_use > 0 {
                return Err(BillingError::InvalidStateTransition(format!(
                    "plan {plan_id} is referenced by {in_use} active subscription(s)"
                )));
            }
        }

        plan.apply(update, self.clock.now())?;
        self.plans.update_plan(&plan)?;
        info!(plan_id = %plan_id, administrative_correction, "billing plan updated");
        Ok(plan)
    }

    pub fn subscribe(
        &self,
        company_id: CompanyId,
        plan_id: PlanId,
        start_date: NaiveDate,
    ) -> BillingResult<Subscription> {
        let plan = self.get_plan(plan_id)?;
        let id = self.plans.next_subscription_id()?;
        let subscription = Subscription::start(id, company_id, &plan, start_date, self.clock.now())?;
        self.plans.insert_subscription(&subscription)?;
        info!(
            subscription_id = %id,
            company_id = %company_id,
            plan_id = %plan_id,
            next_payment_date = ?subscription.next_payment_date,
            "subscription started"
        );
        Ok(subscription)
    }

    pub fn cancel_subscription(&self, subscription_id: SubscriptionId) -> BillingResult<Subscription> {
        let mut subscription = self.get_subscription(subscription_id)?;
        subscription.cancel(self.clock.now())?;
        self.plans.update_subscription(&subscription)?;
        info!(subscription_id = %subscription_id, "subscription cancelled");
        Ok(subscription)
    }

    /// Move the next payment date forward one cycle.
    pub fn advance_subscription(&self, subscription_id: SubscriptionId) -> BillingResult<Subscription> {
        let mut subscription = self.get_subscription(subscription_id)?;
        let next = subscription.advance()?;
        self.plans.update_subscription(&subscription)?;
        info!(subscription_id = %subscription_id, next_payment_date = %next, "subscription advanced");
        Ok(subscription)
    }

    pub fn get_plan(&self, plan_id: PlanId) -> BillingResult<BillingPlan> {
        self.plans
            .get_plan(plan_id)?
            .ok_or_else(|| BillingError::not_found(format!("plan {plan_id}")))
    }

    pub fn get_subscription(&self, subscription_id: SubscriptionId) -> BillingResult<Subscription> {
        self.plans
            .get_subscription(subscription_id)?
            .ok_or_else(|| BillingError::not_found(format!("subscription {subscription_id}")))
    }
}
