use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use uuid::Uuid;

use forgebill_billing::{
    BillableEntity, BillingPeriod, BillingPlan, BillingSettings, Contract, Subscription, TariffPlan,
};
use forgebill_core::{
    AggregateRoot, CompanyId, ContractId, DeletionId, EntityId, ExpectedVersion, InvoiceId, PlanId,
    SubscriptionId, TariffId,
};
use forgebill_invoicing::{DeletionTarget, Invoice, InvoiceEvent, ScheduledDeletion};

use super::{
    ActivitySource, AssetRegistry, AuditRecord, ContractDirectory, DeletionQueue, InvoiceFilter,
    InvoiceStore, PlanStore, SettingsStore, StoreError,
};

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, StoreError> {
    lock.read()
        .map_err(|_| StoreError::Storage("lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, StoreError> {
    lock.write()
        .map_err(|_| StoreError::Storage("lock poisoned".to_string()))
}

#[derive(Debug, Default)]
struct InvoiceTables {
    invoices: BTreeMap<InvoiceId, Invoice>,
    audit: HashMap<InvoiceId, Vec<AuditRecord>>,
    sequences: HashMap<CompanyId, u64>,
    last_id: u64,
}

impl InvoiceTables {
    fn append_audit(&mut self, invoice: &Invoice, events: &[InvoiceEvent]) -> Result<(), StoreError> {
        let first = invoice.version().saturating_sub(events.len() as u64) + 1;
        let trail = self.audit.entry(invoice.id_typed()).or_default();
        for (offset, event) in events.iter().enumerate() {
            let payload = serde_json::to_value(event)
                .map_err(|e| StoreError::Storage(format!("serialize event: {e}")))?;
            trail.push(AuditRecord {
                event_id: Uuid::now_v7(),
                invoice_id: invoice.id_typed(),
                sequence_number: first + offset as u64,
                event_type: event.event_type().to_string(),
                occurred_at: event.occurred_at(),
                payload,
            });
        }
        Ok(())
    }
}

/// In-memory invoice store.
///
/// Intended for tests/dev. All checks happen under a single write lock, which
/// gives the same guarantees as a unique index plus a version column.
#[derive(Debug, Default)]
pub struct InMemoryInvoiceStore {
    inner: RwLock<InvoiceTables>,
}

impl InMemoryInvoiceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InvoiceStore for InMemoryInvoiceStore {
    fn next_invoice_id(&self) -> Result<InvoiceId, StoreError> {
        let mut tables = write(&self.inner)?;
        tables.last_id += 1;
        Ok(InvoiceId::new(tables.last_id))
    }

    fn next_sequence(&self, company_id: CompanyId) -> Result<u64, StoreError> {
        let mut tables = write(&self.inner)?;
        let seq = tables.sequences.entry(company_id).or_insert(0);
        *seq += 1;
        Ok(*seq)
    }

    fn insert(&self, invoice: &Invoice, events: &[InvoiceEvent]) -> Result<(), StoreError> {
        let period = invoice
            .period()
            .ok_or_else(|| StoreError::Storage("invoice without period".to_string()))?;
        let mut tables = write(&self.inner)?;

        if tables.invoices.contains_key(&invoice.id_typed()) {
            return Err(StoreError::Duplicate(format!("invoice {}", invoice.id_typed())));
        }
        for existing in tables.invoices.values() {
            if existing.is_live()
                && existing.contract_id() == invoice.contract_id()
                && existing.period() == Some(period)
            {
                return Err(StoreError::Duplicate(format!(
                    "contract {} already invoiced for {period} ({})",
                    invoice.contract_id(),
                    existing.number()
                )));
            }
            if existing.company_id() == invoice.company_id() && existing.number() == invoice.number() {
                return Err(StoreError::Duplicate(format!(
                    "invoice number {} already used",
                    invoice.number()
                )));
            }
        }

        tables.append_audit(invoice, events)?;
        tables.invoices.insert(invoice.id_typed(), invoice.clone());
        Ok(())
    }

    fn update(
        &self,
        invoice: &Invoice,
        events: &[InvoiceEvent],
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let mut tables = write(&self.inner)?;
        let current = tables
            .invoices
            .get(&invoice.id_typed())
            .map(|stored| stored.version())
            .ok_or_else(|| StoreError::NotFound(format!("invoice {}", invoice.id_typed())))?;

        if !expected.matches(current) {
            return Err(StoreError::Conflict(format!(
                "invoice {}: expected {expected:?}, found {current}",
                invoice.id_typed()
            )));
        }

        tables.append_audit(invoice, events)?;
        tables.invoices.insert(invoice.id_typed(), invoice.clone());
        Ok(())
    }

    fn get(&self, invoice_id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
        Ok(read(&self.inner)?.invoices.get(&invoice_id).cloned())
    }

    fn find_live_for_period(
        &self,
        contract_id: ContractId,
        period: BillingPeriod,
    ) -> Result<Option<Invoice>, StoreError> {
        let tables = read(&self.inner)?;
        Ok(tables
            .invoices
            .values()
            .find(|inv| {
                inv.is_live() && inv.contract_id() == contract_id && inv.period() == Some(period)
            })
            .cloned())
    }

    fn list(&self, filter: &InvoiceFilter) -> Result<Vec<Invoice>, StoreError> {
        let tables = read(&self.inner)?;
        let mut matched: Vec<Invoice> = tables
            .invoices
            .values()
            .filter(|inv| filter.matches(inv))
            .cloned()
            .collect();
        matched.sort_by_key(|inv| (inv.company_id(), inv.sequence()));
        Ok(matched)
    }

    fn audit_trail(&self, invoice_id: InvoiceId) -> Result<Vec<AuditRecord>, StoreError> {
        let tables = read(&self.inner)?;
        if !tables.invoices.contains_key(&invoice_id) {
            return Err(StoreError::NotFound(format!("invoice {invoice_id}")));
        }
        Ok(tables.audit.get(&invoice_id).cloned().unwrap_or_default())
    }
}

/// In-memory per-company settings.
#[derive(Debug, Default)]
pub struct InMemorySettingsStore {
    inner: RwLock<HashMap<CompanyId, BillingSettings>>,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for InMemorySettingsStore {
    fn get(&self, company_id: CompanyId) -> Result<Option<BillingSettings>, StoreError> {
        Ok(read(&self.inner)?.get(&company_id).cloned())
    }

    fn insert_if_absent(&self, settings: BillingSettings) -> Result<BillingSettings, StoreError> {
        let mut map = write(&self.inner)?;
        Ok(map.entry(settings.company_id).or_insert(settings).clone())
    }

    fn update(&self, settings: &BillingSettings) -> Result<(), StoreError> {
        let mut map = write(&self.inner)?;
        match map.get_mut(&settings.company_id) {
            Some(stored) => {
                *stored = settings.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!(
                "settings for company {}",
                settings.company_id
            ))),
        }
    }
}

#[derive(Debug, Default)]
struct DirectoryTables {
    companies: BTreeSet<CompanyId>,
    contracts: BTreeMap<ContractId, Contract>,
    tariffs: HashMap<TariffId, TariffPlan>,
    entities: BTreeMap<ContractId, Vec<BillableEntity>>,
}

/// In-memory stand-in for the contract/equipment systems.
///
/// Implements the directory, the activity source and the asset registry over
/// the same tables so deletions are visible to later lookups.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    inner: RwLock<DirectoryTables>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_company(&self, company_id: CompanyId) -> Result<(), StoreError> {
        write(&self.inner)?.companies.insert(company_id);
        Ok(())
    }

    pub fn add_tariff(&self, tariff: TariffPlan) -> Result<(), StoreError> {
        write(&self.inner)?.tariffs.insert(tariff.id, tariff);
        Ok(())
    }

    /// Register a contract (and its company).
    pub fn add_contract(&self, contract: Contract) -> Result<(), StoreError> {
        let mut tables = write(&self.inner)?;
        tables.companies.insert(contract.company_id);
        tables.contracts.insert(contract.id, contract);
        Ok(())
    }

    pub fn add_entity(&self, contract_id: ContractId, entity: BillableEntity) -> Result<(), StoreError> {
        let mut tables = write(&self.inner)?;
        if !tables.contracts.contains_key(&contract_id) {
            return Err(StoreError::NotFound(format!("contract {contract_id}")));
        }
        let entities = tables.entities.entry(contract_id).or_default();
        entities.retain(|e| e.id != entity.id);
        entities.push(entity);
        Ok(())
    }

    pub fn has_entity(&self, contract_id: ContractId, entity_id: EntityId) -> Result<bool, StoreError> {
        Ok(read(&self.inner)?
            .entities
            .get(&contract_id)
            .is_some_and(|list| list.iter().any(|e| e.id == entity_id)))
    }
}

impl ContractDirectory for InMemoryDirectory {
    fn companies(&self) -> Result<Vec<CompanyId>, StoreError> {
        Ok(read(&self.inner)?.companies.iter().copied().collect())
    }

    fn contract(&self, contract_id: ContractId) -> Result<Option<Contract>, StoreError> {
        Ok(read(&self.inner)?.contracts.get(&contract_id).cloned())
    }

    fn tariff(&self, tariff_id: TariffId) -> Result<Option<TariffPlan>, StoreError> {
        Ok(read(&self.inner)?.tariffs.get(&tariff_id).cloned())
    }

    fn contracts_for_company(&self, company_id: CompanyId) -> Result<Vec<Contract>, StoreError> {
        Ok(read(&self.inner)?
            .contracts
            .values()
            .filter(|c| c.company_id == company_id)
            .cloned()
            .collect())
    }
}

impl ActivitySource for InMemoryDirectory {
    fn billable_entities(
        &self,
        contract_id: ContractId,
        _period: BillingPeriod,
    ) -> Result<Vec<BillableEntity>, StoreError> {
        Ok(read(&self.inner)?
            .entities
            .get(&contract_id)
            .cloned()
            .unwrap_or_default())
    }
}

impl AssetRegistry for InMemoryDirectory {
    fn delete(&self, target: &DeletionTarget) -> Result<(), StoreError> {
        let mut tables = write(&self.inner)?;
        match *target {
            DeletionTarget::Contract { contract_id } => {
                tables
                    .contracts
                    .remove(&contract_id)
                    .ok_or_else(|| StoreError::NotFound(format!("contract {contract_id}")))?;
                tables.entities.remove(&contract_id);
            }
            DeletionTarget::Equipment {
                contract_id,
                entity_id,
            } => {
                let entities = tables
                    .entities
                    .get_mut(&contract_id)
                    .ok_or_else(|| StoreError::NotFound(format!("contract {contract_id}")))?;
                let before = entities.len();
                entities.retain(|e| e.id != entity_id);
                if entities.len() == before {
                    return Err(StoreError::NotFound(format!("equipment {entity_id}")));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDeletionQueue {
    inner: RwLock<Vec<ScheduledDeletion>>,
}

impl InMemoryDeletionQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeletionQueue for InMemoryDeletionQueue {
    fn schedule(&self, deletion: ScheduledDeletion) -> Result<(), StoreError> {
        let mut queue = write(&self.inner)?;
        if queue.iter().any(|d| d.target == deletion.target) {
            return Err(StoreError::Duplicate(format!(
                "{} is already scheduled for deletion",
                deletion.target
            )));
        }
        queue.push(deletion);
        Ok(())
    }

    fn pending(&self) -> Result<Vec<ScheduledDeletion>, StoreError> {
        let mut pending = read(&self.inner)?.clone();
        pending.sort_by_key(|d| d.requested_on);
        Ok(pending)
    }

    fn complete(&self, deletion_id: DeletionId) -> Result<(), StoreError> {
        let mut queue = write(&self.inner)?;
        let before = queue.len();
        queue.retain(|d| d.id != deletion_id);
        if queue.len() == before {
            return Err(StoreError::NotFound(format!("deletion {deletion_id}")));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct PlanTables {
    plans: BTreeMap<PlanId, BillingPlan>,
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
    last_plan_id: u64,
    last_subscription_id: u64,
}

#[derive(Debug, Default)]
pub struct InMemoryPlanStore {
    inner: RwLock<PlanTables>,
}

impl InMemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlanStore for InMemoryPlanStore {
    fn next_plan_id(&self) -> Result<PlanId, StoreError> {
        let mut tables = write(&self.inner)?;
        tables.last_plan_id += 1;
        Ok(PlanId::new(tables.last_plan_id))
    }

    fn next_subscription_id(&self) -> Result<SubscriptionId, StoreError> {
        let mut tables = write(&self.inner)?;
        tables.last_subscription_id += 1;
        Ok(SubscriptionId::new(tables.last_subscription_id))
    }

    fn insert_plan(&self, plan: &BillingPlan) -> Result<(), StoreError> {
        let mut tables = write(&self.inner)?;
        if tables.plans.contains_key(&plan.id) {
            return Err(StoreError::Duplicate(format!("plan {}", plan.id)));
        }
        tables.plans.insert(plan.id, plan.clone());
        Ok(())
    }

    fn get_plan(&self, plan_id: PlanId) -> Result<Option<BillingPlan>, StoreError> {
        Ok(read(&self.inner)?.plans.get(&plan_id).cloned())
    }

    fn update_plan(&self, plan: &BillingPlan) -> Result<(), StoreError> {
        let mut tables = write(&self.inner)?;
        match tables.plans.get_mut(&plan.id) {
            Some(stored) => {
                *stored = plan.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("plan {}", plan.id))),
        }
    }

    fn insert_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
        let mut tables = write(&self.inner)?;
        if tables.subscriptions.contains_key(&subscription.id) {
            return Err(StoreError::Duplicate(format!("subscription {}", subscription.id)));
        }
        tables.subscriptions.insert(subscription.id, subscription.clone());
        Ok(())
    }

    fn get_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Option<Subscription>, StoreError> {
        Ok(read(&self.inner)?.subscriptions.get(&subscription_id).cloned())
    }

    fn update_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
        let mut tables = write(&self.inner)?;
        match tables.subscriptions.get_mut(&subscription.id) {
            Some(stored) => {
                *stored = subscription.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("subscription {}", subscription.id))),
        }
    }

    fn subscriptions_for_plan(&self, plan_id: PlanId) -> Result<Vec<Subscription>, StoreError> {
        Ok(read(&self.inner)?
            .subscriptions
            .values()
            .filter(|s| s.plan_id == plan_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{date, issued_invoice, test_time};
    use forgebill_billing::SettingsDefaults;
    use forgebill_core::Aggregate;
    use forgebill_invoicing::{CancelInvoice, InvoiceCommand};

    fn jan() -> BillingPeriod {
        BillingPeriod::calendar_month(2025, 1).unwrap()
    }

    #[test]
    fn live_invoice_is_unique_per_contract_period() {
        let store = InMemoryInvoiceStore::new();
        let (first, events) = issued_invoice(1, 1, 7, jan(), "INV-0001");
        store.insert(&first, &events).unwrap();

        let (second, events) = issued_invoice(2, 1, 7, jan(), "INV-0002");
        let err = store.insert(&second, &events).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));

        let feb = BillingPeriod::calendar_month(2025, 2).unwrap();
        let (other_period, events) = issued_invoice(3, 1, 7, feb, "INV-0003");
        store.insert(&other_period, &events).unwrap();
    }

    #[test]
    fn cancelled_invoice_releases_its_period() {
        let store = InMemoryInvoiceStore::new();
        let (mut first, events) = issued_invoice(1, 1, 7, jan(), "INV-0001");
        store.insert(&first, &events).unwrap();

        let expected = ExpectedVersion::Exact(first.version());
        let events = first
            .execute(&InvoiceCommand::CancelInvoice(CancelInvoice {
                invoice_id: first.id_typed(),
                reason: "wrong tariff".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap();
        store.update(&first, &events, expected).unwrap();

        assert!(store.find_live_for_period(ContractId::new(7), jan()).unwrap().is_none());
        let (replacement, events) = issued_invoice(2, 1, 7, jan(), "INV-0002");
        store.insert(&replacement, &events).unwrap();

        let trail = store.audit_trail(first.id_typed()).unwrap();
        let types: Vec<_> = trail.iter().map(|r| r.event_type.as_str()).collect();
        assert_eq!(
            types,
            ["invoicing.invoice.drafted", "invoicing.invoice.issued", "invoicing.invoice.cancelled"]
        );
        assert_eq!(trail[2].sequence_number, 3);
    }

    #[test]
    fn stale_update_is_a_conflict() {
        let store = InMemoryInvoiceStore::new();
        let (invoice, events) = issued_invoice(1, 1, 7, jan(), "INV-0001");
        store.insert(&invoice, &events).unwrap();

        let err = store
            .update(&invoice, &[], ExpectedVersion::Exact(invoice.version() - 1))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn sequences_are_per_company_and_never_reused() {
        let store = InMemoryInvoiceStore::new();
        assert_eq!(store.next_sequence(CompanyId::new(1)).unwrap(), 1);
        assert_eq!(store.next_sequence(CompanyId::new(1)).unwrap(), 2);
        assert_eq!(store.next_sequence(CompanyId::new(2)).unwrap(), 1);
        assert_eq!(store.next_sequence(CompanyId::new(1)).unwrap(), 3);
    }

    #[test]
    fn settings_insert_if_absent_keeps_first_record() {
        let store = InMemorySettingsStore::new();
        let defaults = SettingsDefaults::default();
        let first = BillingSettings::new(CompanyId::new(1), &defaults, test_time());
        let mut second = first.clone();
        second.invoice_generation_day = 10;

        assert_eq!(store.insert_if_absent(first.clone()).unwrap(), first);
        assert_eq!(store.insert_if_absent(second).unwrap(), first);
    }

    #[test]
    fn deletion_queue_rejects_duplicate_targets() {
        let queue = InMemoryDeletionQueue::new();
        let target = DeletionTarget::Contract {
            contract_id: ContractId::new(7),
        };
        let deletion =
            ScheduledDeletion::new(DeletionId::new(), CompanyId::new(1), target, date(2025, 1, 5), 1)
                .unwrap();
        queue.schedule(deletion.clone()).unwrap();

        let again =
            ScheduledDeletion::new(DeletionId::new(), CompanyId::new(1), target, date(2025, 1, 6), 1)
                .unwrap();
        assert!(matches!(queue.schedule(again), Err(StoreError::Duplicate(_))));

        queue.complete(deletion.id).unwrap();
        assert!(queue.pending().unwrap().is_empty());
    }
}
