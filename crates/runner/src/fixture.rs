//! JSON fixture describing the directory a runner invocation works against.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;

use forgebill_billing::{BillableEntity, BillingSettingsUpdate, Contract, TariffPlan};
use forgebill_core::{CompanyId, ContractId};
use forgebill_infra::BillingEngine;
use forgebill_infra::store::InMemoryDirectory;
use forgebill_invoicing::DeletionTarget;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Fixture {
    /// Pins the clock; the system clock is used when absent.
    pub today: Option<NaiveDate>,
    /// Companies without contracts; contracts register their own company.
    pub companies: Vec<CompanyId>,
    pub tariffs: Vec<TariffPlan>,
    pub contracts: Vec<Contract>,
    pub entities: Vec<EntityFixture>,
    pub settings: Vec<SettingsFixture>,
    pub deletions: Vec<DeletionFixture>,
}

#[derive(Debug, Deserialize)]
pub struct EntityFixture {
    pub contract_id: ContractId,
    #[serde(flatten)]
    pub entity: BillableEntity,
}

#[derive(Debug, Deserialize)]
pub struct SettingsFixture {
    pub company_id: CompanyId,
    #[serde(flatten)]
    pub update: BillingSettingsUpdate,
}

#[derive(Debug, Deserialize)]
pub struct DeletionFixture {
    pub company_id: CompanyId,
    pub target: DeletionTarget,
    pub requested_on: Option<NaiveDate>,
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading fixture {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing fixture {}", path.display()))
    }

    /// Load the directory tables, then apply settings and queued deletions
    /// through the engine so they get the usual validation.
    pub fn seed(self, directory: &InMemoryDirectory, engine: &BillingEngine) -> Result<()> {
        for company_id in self.companies {
            directory.add_company(company_id)?;
        }
        for tariff in self.tariffs {
            tariff
                .validate()
                .with_context(|| format!("tariff {}", tariff.id))?;
            directory.add_tariff(tariff)?;
        }
        for contract in self.contracts {
            directory.add_contract(contract)?;
        }
        for EntityFixture { contract_id, entity } in self.entities {
            let entity_id = entity.id;
            directory
                .add_entity(contract_id, entity)
                .with_context(|| format!("entity {entity_id}"))?;
        }
        for SettingsFixture { company_id, update } in self.settings {
            engine
                .update_settings(company_id, update)
                .with_context(|| format!("settings of company {company_id}"))?;
        }
        for deletion in self.deletions {
            engine
                .schedule_deletion(deletion.company_id, deletion.target, deletion.requested_on)
                .with_context(|| format!("deletion of {}", deletion.target))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_fixture_parses() {
        let raw = include_str!("../../../fixtures/demo.json");
        let fixture: Fixture = serde_json::from_str(raw).unwrap();
        assert!(fixture.today.is_some());
        assert!(!fixture.contracts.is_empty());
        assert_eq!(fixture.entities.len(), 3);
    }

    #[test]
    fn empty_object_is_an_empty_fixture() {
        let fixture: Fixture = serde_json::from_str("{}").unwrap();
        assert!(fixture.today.is_none());
        assert!(fixture.tariffs.is_empty());
    }
}
