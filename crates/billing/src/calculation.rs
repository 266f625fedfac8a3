//! Billing calculation: line items, tax and totals for one contract and period.
//!
//! A `BillingCalculation` is transient. It is produced fresh on every request and
//! copied into an invoice at generation time.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use forgebill_core::{CompanyId, ContractId, Currency, DomainError, DomainResult, EntityId, TariffId};

use crate::activity::{BillableEntity, EntityKind};
use crate::period::BillingPeriod;
use crate::proration::{Charge, ChargeBasis, InactiveDiscountPolicy, ProrationCalculator};
use crate::tariff::{Contract, TariffPlan};

/// Flat tax rate as a fraction (`0.20` = 20 %).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxPolicy {
    pub rate: Decimal,
    /// When true, line amounts already include tax and tax is backed out.
    pub included: bool,
}

/// Everything tenant-specific the calculation needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingPolicy {
    pub currency: Currency,
    pub tax: TaxPolicy,
    pub discount: InactiveDiscountPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    /// Entity the line charges for; `None` for the contract base fee.
    pub entity_id: Option<EntityId>,
    pub basis: ChargeBasis,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

impl LineItem {
    fn from_charge(description: String, entity_id: Option<EntityId>, charge: Charge) -> Self {
        Self {
            description,
            entity_id,
            basis: charge.basis,
            quantity: charge.quantity,
            unit_price: charge.unit_price,
            subtotal: charge.amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingCalculation {
    pub contract_id: ContractId,
    pub company_id: CompanyId,
    pub tariff_id: TariffId,
    pub period: BillingPeriod,
    pub currency: Currency,
    pub line_items: Vec<LineItem>,
    pub tax_rate: Decimal,
    pub tax_included: bool,
    /// Net amount (before tax), also when tax is included in line prices.
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

impl BillingCalculation {
    /// Aggregate line items and derive tax and totals.
    ///
    /// Exclusive tax: `tax = subtotal * rate`. Inclusive tax: the line sum is
    /// gross, `tax = gross - gross / (1 + rate)` and `subtotal = gross - tax`.
    /// `total = subtotal + tax` holds in both modes.
    pub fn assemble(
        contract: &Contract,
        period: BillingPeriod,
        currency: Currency,
        tax: TaxPolicy,
        line_items: Vec<LineItem>,
    ) -> DomainResult<Self> {
        if tax.rate < Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "tax rate must not be negative, got {}",
                tax.rate
            )));
        }

        let line_sum = line_items
            .iter()
            .try_fold(Decimal::ZERO, |acc, item| acc.checked_add(item.subtotal))
            .ok_or_else(|| DomainError::validation("line item sum overflowed"))?;

        let (subtotal, tax_amount) = if tax.included {
            let net = line_sum
                .checked_div(Decimal::ONE + tax.rate)
                .ok_or_else(|| DomainError::validation("tax back-out overflowed"))?;
            let tax_amount = currency.round(line_sum - net);
            (line_sum - tax_amount, tax_amount)
        } else {
            let tax_amount = line_sum
                .checked_mul(tax.rate)
                .map(|t| currency.round(t))
                .ok_or_else(|| DomainError::validation("tax calculation overflowed"))?;
            (line_sum, tax_amount)
        };

        Ok(Self {
            contract_id: contract.id,
            company_id: contract.company_id,
            tariff_id: contract.tariff_id,
            period,
            currency,
            line_items,
            tax_rate: tax.rate,
            tax_included: tax.included,
            subtotal,
            tax: tax_amount,
            total: subtotal + tax_amount,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.line_items.is_empty()
    }

    /// Sum of the line items as priced (gross when tax is included).
    pub fn gross(&self) -> Decimal {
        if self.tax_included { self.total } else { self.subtotal }
    }
}

fn basis_label(basis: &ChargeBasis) -> String {
    match basis {
        ChargeBasis::FullPeriod => "full period".to_string(),
        ChargeBasis::Prorated {
            active_days,
            period_days,
        } => format!("{active_days}/{period_days} days"),
        ChargeBasis::InactiveDiscount { ratio } => {
            format!("inactive, {}% rate", (ratio * Decimal::ONE_HUNDRED).normalize())
        }
        ChargeBasis::Daily { active_days } => format!("{active_days} days"),
    }
}

fn kind_label(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Equipment => "Equipment",
        EntityKind::Object => "Object",
    }
}

/// Price a contract for `period`.
///
/// Produces the base fee (prorated by the contract term) followed by one line
/// per billable entity, ordered by entity id, plus daily lines when the tariff
/// carries a daily rate. Entities without charge produce no line.
pub fn price_contract(
    contract: &Contract,
    tariff: &TariffPlan,
    entities: &[BillableEntity],
    period: BillingPeriod,
    policy: &PricingPolicy,
) -> DomainResult<BillingCalculation> {
    if contract.tariff_id != tariff.id {
        return Err(DomainError::invariant(format!(
            "contract {} is priced by tariff {}, got tariff {}",
            contract.id, contract.tariff_id, tariff.id
        )));
    }
    tariff.validate()?;

    let base_calc = ProrationCalculator::new(policy.currency.clone(), InactiveDiscountPolicy::disabled());
    let entity_calc = ProrationCalculator::new(policy.currency.clone(), policy.discount);

    let mut lines = Vec::new();

    if let Some(charge) = base_calc.prorate(tariff.base_rate, &period, &[contract.term()])? {
        let description = format!("Base fee: {} ({})", tariff.name, basis_label(&charge.basis));
        lines.push(LineItem::from_charge(description, None, charge));
    }

    let mut ordered: Vec<&BillableEntity> = entities.iter().collect();
    ordered.sort_by_key(|e| e.id);

    for entity in ordered {
        let label = kind_label(entity.kind);
        if let Some(charge) =
            entity_calc.prorate_or_discount(tariff.per_object_rate, &period, &entity.activity)?
        {
            let description = format!(
                "{label} {}: period rate ({})",
                entity.name,
                basis_label(&charge.basis)
            );
            lines.push(LineItem::from_charge(description, Some(entity.id), charge));
        }
        if let Some(daily_rate) = tariff.daily_rate {
            if let Some(charge) = entity_calc.daily(daily_rate, &period, &entity.activity)? {
                let description = format!(
                    "{label} {}: daily rate ({})",
                    entity.name,
                    basis_label(&charge.basis)
                );
                lines.push(LineItem::from_charge(description, Some(entity.id), charge));
            }
        }
    }

    BillingCalculation::assemble(contract, period, policy.currency.clone(), policy.tax, lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityInterval;
    use crate::tariff::ContractStatus;
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn test_contract() -> Contract {
        Contract {
            id: ContractId::new(7),
            company_id: CompanyId::new(1),
            tariff_id: TariffId::new(3),
            number: "C-7".to_string(),
            status: ContractStatus::Active,
            start_date: date(2024, 1, 1),
            end_date: None,
        }
    }

    fn test_tariff(base: Decimal, per_object: Decimal) -> TariffPlan {
        TariffPlan {
            id: TariffId::new(3),
            name: "Fleet".to_string(),
            base_rate: base,
            per_object_rate: per_object,
            daily_rate: None,
        }
    }

    fn test_policy(rate: Decimal, included: bool) -> PricingPolicy {
        PricingPolicy {
            currency: Currency::new("USD").unwrap(),
            tax: TaxPolicy { rate, included },
            discount: InactiveDiscountPolicy::disabled(),
        }
    }

    fn entity(id: u64, name: &str, from_day: Option<u32>) -> BillableEntity {
        BillableEntity {
            id: EntityId::new(id),
            kind: EntityKind::Equipment,
            name: name.to_string(),
            activity: from_day
                .map(|d| {
                    vec![
                        ActivityInterval::new(Utc.with_ymd_and_hms(2025, 1, d, 0, 0, 0).unwrap(), None)
                            .unwrap(),
                    ]
                })
                .unwrap_or_default(),
        }
    }

    #[test]
    fn january_with_exclusive_tax() {
        let jan = BillingPeriod::calendar_month(2025, 1).unwrap();
        let calc = price_contract(
            &test_contract(),
            &test_tariff(dec!(1000), Decimal::ZERO),
            &[],
            jan,
            &test_policy(dec!(0.20), false),
        )
        .unwrap();

        assert_eq!(calc.line_items.len(), 1);
        assert_eq!(calc.line_items[0].description, "Base fee: Fleet (full period)");
        assert_eq!(calc.subtotal, dec!(1000));
        assert_eq!(calc.tax, dec!(200.00));
        assert_eq!(calc.total, dec!(1200.00));
    }

    #[test]
    fn inclusive_tax_is_backed_out() {
        let jan = BillingPeriod::calendar_month(2025, 1).unwrap();
        let calc = price_contract(
            &test_contract(),
            &test_tariff(dec!(1200), Decimal::ZERO),
            &[],
            jan,
            &test_policy(dec!(0.20), true),
        )
        .unwrap();

        assert_eq!(calc.tax, dec!(200.00));
        assert_eq!(calc.subtotal, dec!(1000.00));
        assert_eq!(calc.total, dec!(1200));
        assert_eq!(calc.gross(), dec!(1200));
    }

    #[test]
    fn entities_are_prorated_and_ordered() {
        let jan = BillingPeriod::calendar_month(2025, 1).unwrap();
        let entities = [
            entity(20, "GPS-2", Some(17)),
            entity(10, "GPS-1", Some(1)),
            entity(30, "GPS-3", None),
        ];
        let calc = price_contract(
            &test_contract(),
            &test_tariff(Decimal::ZERO, dec!(31)),
            &entities,
            jan,
            &test_policy(Decimal::ZERO, false),
        )
        .unwrap();

        assert_eq!(calc.line_items.len(), 2);
        assert_eq!(calc.line_items[0].entity_id, Some(EntityId::new(10)));
        assert_eq!(calc.line_items[0].subtotal, dec!(31));
        assert_eq!(calc.line_items[1].description, "Equipment GPS-2: period rate (15/31 days)");
        assert_eq!(calc.line_items[1].subtotal, dec!(15));
        assert_eq!(calc.total, dec!(46));
    }

    #[test]
    fn inactive_entity_is_discounted_when_enabled() {
        let jan = BillingPeriod::calendar_month(2025, 1).unwrap();
        let mut policy = test_policy(Decimal::ZERO, false);
        policy.discount = InactiveDiscountPolicy {
            enabled: true,
            ratio: dec!(0.5),
        };
        let calc = price_contract(
            &test_contract(),
            &test_tariff(Decimal::ZERO, dec!(100)),
            &[entity(1, "Depot", None)],
            jan,
            &policy,
        )
        .unwrap();

        assert_eq!(calc.line_items[0].description, "Equipment Depot: period rate (inactive, 50% rate)");
        assert_eq!(calc.total, dec!(50));
    }

    #[test]
    fn contract_started_mid_period_prorates_base_fee() {
        let mut contract = test_contract();
        contract.start_date = date(2025, 4, 16);
        let april = BillingPeriod::calendar_month(2025, 4).unwrap();

        let calc = price_contract(
            &contract,
            &test_tariff(dec!(3000), Decimal::ZERO),
            &[],
            april,
            &test_policy(Decimal::ZERO, false),
        )
        .unwrap();
        assert_eq!(calc.subtotal, dec!(1500));
    }

    #[test]
    fn mismatched_tariff_is_rejected() {
        let mut tariff = test_tariff(dec!(1), Decimal::ZERO);
        tariff.id = TariffId::new(99);
        let jan = BillingPeriod::calendar_month(2025, 1).unwrap();
        assert!(
            price_contract(&test_contract(), &tariff, &[], jan, &test_policy(Decimal::ZERO, false))
                .is_err()
        );
    }
}
