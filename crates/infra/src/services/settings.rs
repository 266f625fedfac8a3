//! Settings provider: lazily created, validated per-company settings.

use std::sync::Arc;

use tracing::info;

use forgebill_billing::{BillingSettings, BillingSettingsUpdate, SettingsDefaults};
use forgebill_core::CompanyId;

use crate::clock::Clock;
use crate::error::BillingResult;
use crate::store::SettingsStore;

#[derive(Clone)]
pub struct SettingsProvider {
    store: Arc<dyn SettingsStore>,
    defaults: SettingsDefaults,
    clock: Arc<dyn Clock>,
}

impl SettingsProvider {
    pub fn new(store: Arc<dyn SettingsStore>, defaults: SettingsDefaults, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            defaults,
            clock,
        }
    }

    /// Settings for `company_id`, created with defaults on first access.
    ///
    /// Concurrent first reads race on the store's create-if-absent, so every
    /// caller observes the same record.
    pub fn get_or_create(&self, company_id: CompanyId) -> BillingResult<BillingSettings> {
        if let Some(settings) = self.store.get(company_id)? {
            return Ok(settings);
        }

        let fresh = BillingSettings::new(company_id, &self.defaults, self.clock.now());
        let stored = self.store.insert_if_absent(fresh)?;
        info!(company_id = %company_id, "created default billing settings");
        Ok(stored)
    }

    pub fn update(
        &self,
        company_id: CompanyId,
        update: BillingSettingsUpdate,
    ) -> BillingResult<BillingSettings> {
        let current = self.get_or_create(company_id)?;
        let next = current.apply(update, self.clock.now())?;
        self.store.update(&next)?;
        info!(
            company_id = %company_id,
            generation_day = next.invoice_generation_day,
            payment_term_days = next.invoice_payment_term_days,
            tax_rate = %next.default_tax_rate,
            "billing settings updated"
        );
        Ok(next)
    }
}
