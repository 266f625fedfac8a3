//! Billing calculation service: loads contract, tariff, settings and activity
//! and prices one contract for one period. Read-only.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;

use forgebill_billing::{BillingCalculation, BillingPeriod, Contract, TariffPlan, price_contract};
use forgebill_core::ContractId;

use crate::error::{BillingError, BillingResult};
use crate::services::settings::SettingsProvider;
use crate::store::{ActivitySource, ContractDirectory};

#[derive(Clone)]
pub struct BillingCalculationService {
    directory: Arc<dyn ContractDirectory>,
    activity: Arc<dyn ActivitySource>,
    settings: SettingsProvider,
}

impl BillingCalculationService {
    pub fn new(
        directory: Arc<dyn ContractDirectory>,
        activity: Arc<dyn ActivitySource>,
        settings: SettingsProvider,
    ) -> Self {
        Self {
            directory,
            activity,
            settings,
        }
    }

    /// Price `contract_id` for `period_start..=period_end`.
    pub fn calculate_billing_for_contract(
        &self,
        contract_id: ContractId,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> BillingResult<BillingCalculation> {
        let period = BillingPeriod::new(period_start, period_end)?;
        self.calculate_for_period(contract_id, period)
    }

    pub fn calculate_for_period(
        &self,
        contract_id: ContractId,
        period: BillingPeriod,
    ) -> BillingResult<BillingCalculation> {
        let (contract, tariff) = self.load_contract(contract_id)?;
        let settings = self.settings.get_or_create(contract.company_id)?;
        let entities = self.activity.billable_entities(contract_id, period)?;

        let calculation =
            price_contract(&contract, &tariff, &entities, period, &settings.pricing_policy())?;
        debug!(
            contract_id = %contract_id,
            period = %period,
            lines = calculation.line_items.len(),
            total = %calculation.total,
            "contract priced"
        );
        Ok(calculation)
    }

    pub fn load_contract(&self, contract_id: ContractId) -> BillingResult<(Contract, TariffPlan)> {
        let contract = self
            .directory
            .contract(contract_id)?
            .ok_or_else(|| BillingError::not_found(format!("contract {contract_id}")))?;
        let tariff = self.directory.tariff(contract.tariff_id)?.ok_or_else(|| {
            BillingError::not_found(format!(
                "tariff {} of contract {contract_id}",
                contract.tariff_id
            ))
        })?;
        Ok((contract, tariff))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_support::{TestWorld, date};
    use rust_decimal_macros::dec;

    #[test]
    fn prices_january_with_exclusive_tax() {
        let world = TestWorld::new(date(2025, 2, 1));
        let contract = world.add_contract(1, 10, dec!(1000));

        let calc = world
            .engine
            .calculation()
            .calculate_billing_for_contract(contract, date(2025, 1, 1), date(2025, 1, 31))
            .unwrap();
        assert_eq!(calc.subtotal, dec!(1000));
        assert_eq!(calc.tax, dec!(200));
        assert_eq!(calc.total, dec!(1200));
    }

    #[test]
    fn inverted_period_is_invalid_input() {
        let world = TestWorld::new(date(2025, 2, 1));
        let contract = world.add_contract(1, 10, dec!(1000));

        let err = world
            .engine
            .calculation()
            .calculate_billing_for_contract(contract, date(2025, 1, 31), date(2025, 1, 1))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn missing_contract_or_tariff_is_not_found() {
        let world = TestWorld::new(date(2025, 2, 1));
        let err = world
            .engine
            .calculation()
            .calculate_billing_for_contract(ContractId::new(404), date(2025, 1, 1), date(2025, 1, 31))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let orphan = world.add_contract_without_tariff(1, 11);
        let err = world
            .engine
            .calculation()
            .calculate_billing_for_contract(orphan, date(2025, 1, 1), date(2025, 1, 31))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn calculation_is_idempotent() {
        let world = TestWorld::new(date(2025, 2, 1));
        let contract = world.add_contract(1, 10, dec!(1000));
        let calc = world.engine.calculation();

        let a = calc
            .calculate_billing_for_contract(contract, date(2025, 1, 1), date(2025, 1, 31))
            .unwrap();
        let b = calc
            .calculate_billing_for_contract(contract, date(2025, 1, 1), date(2025, 1, 31))
            .unwrap();
        assert_eq!(a, b);
    }
}
