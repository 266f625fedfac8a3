//! Shared fixtures for infra tests.

use std::sync::Arc;

use chrono::{DateTime, Days, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use forgebill_billing::{
    ActivityInterval, BillableEntity, BillingPeriod, Contract, ContractStatus, EntityKind,
    TariffPlan,
};
use forgebill_core::{Aggregate, CompanyId, ContractId, Currency, EntityId, InvoiceId, TariffId};
use forgebill_invoicing::{
    CreateDraft, Invoice, InvoiceCommand, InvoiceEvent, InvoiceItem, IssueInvoice,
};

use crate::clock::FixedClock;
use crate::config::EngineConfig;
use crate::engine::{Backends, BillingEngine};
use crate::store::{ContractDirectory, InMemoryDirectory};

pub(crate) fn test_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap()
}

pub(crate) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

fn at_nine(day: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&day.and_hms_opt(9, 0, 0).unwrap())
}

/// An issued 1000 + 200 tax invoice, built through the aggregate.
///
/// Issued the day after the period ends, due 14 days later.
pub(crate) fn issued_invoice(
    id: u64,
    company: u64,
    contract: u64,
    period: BillingPeriod,
    number: &str,
) -> (Invoice, Vec<InvoiceEvent>) {
    let invoice_id = InvoiceId::new(id);
    let issue_date = period.end().checked_add_days(Days::new(1)).unwrap();
    let mut invoice = Invoice::empty(invoice_id);

    let mut events = invoice
        .execute(&InvoiceCommand::CreateDraft(CreateDraft {
            invoice_id,
            company_id: CompanyId::new(company),
            contract_id: ContractId::new(contract),
            number: number.to_string(),
            sequence: id,
            period,
            currency: Currency::usd(),
            tax_rate: dec!(0.20),
            tax_included: false,
            subtotal: dec!(1000),
            tax: dec!(200),
            total: dec!(1200),
            items: vec![InvoiceItem {
                line_no: 1,
                description: "Base fee".to_string(),
                quantity: Decimal::ONE,
                unit_price: dec!(1000),
                total: dec!(1000),
            }],
            occurred_at: test_time(),
        }))
        .unwrap();
    events.extend(
        invoice
            .execute(&InvoiceCommand::IssueInvoice(IssueInvoice {
                invoice_id,
                issue_date,
                due_date: issue_date.checked_add_days(Days::new(14)).unwrap(),
                occurred_at: test_time(),
            }))
            .unwrap(),
    );
    (invoice, events)
}

/// An engine over in-memory backends with a pinned clock.
pub(crate) struct TestWorld {
    pub engine: BillingEngine,
    pub directory: Arc<InMemoryDirectory>,
    pub clock: Arc<FixedClock>,
    pub backends: Backends,
}

impl TestWorld {
    pub fn new(today: NaiveDate) -> Self {
        let clock = Arc::new(FixedClock::new(at_nine(today)));
        let (backends, directory) = Backends::in_memory(clock.clone());
        let engine = BillingEngine::new(backends.clone(), &EngineConfig::default());
        Self {
            engine,
            directory,
            clock,
            backends,
        }
    }

    pub fn set_today(&self, today: NaiveDate) {
        self.clock.set(at_nine(today));
    }

    /// Active contract since 2024-01-01 on its own tariff with `base_rate`.
    pub fn add_contract(&self, company: u64, contract: u64, base_rate: Decimal) -> ContractId {
        let tariff_id = TariffId::new(contract);
        self.directory
            .add_tariff(TariffPlan {
                id: tariff_id,
                name: format!("Tariff {contract}"),
                base_rate,
                per_object_rate: Decimal::ZERO,
                daily_rate: None,
            })
            .unwrap();
        self.insert_contract(company, contract, tariff_id)
    }

    /// Contract pointing at a tariff that does not exist.
    pub fn add_contract_without_tariff(&self, company: u64, contract: u64) -> ContractId {
        self.insert_contract(company, contract, TariffId::new(90_000 + contract))
    }

    fn insert_contract(&self, company: u64, contract: u64, tariff_id: TariffId) -> ContractId {
        let contract_id = ContractId::new(contract);
        self.directory
            .add_contract(Contract {
                id: contract_id,
                company_id: CompanyId::new(company),
                tariff_id,
                number: format!("C-{contract}"),
                status: ContractStatus::Active,
                start_date: date(2024, 1, 1),
                end_date: None,
            })
            .unwrap();
        contract_id
    }

    pub fn set_per_object_rate(&self, contract_id: ContractId, rate: Decimal) {
        let contract = self.directory.contract(contract_id).unwrap().unwrap();
        let mut tariff = self.directory.tariff(contract.tariff_id).unwrap().unwrap();
        tariff.per_object_rate = rate;
        self.directory.add_tariff(tariff).unwrap();
    }

    pub fn set_contract_status(&self, contract_id: ContractId, status: ContractStatus) {
        let mut contract = self.directory.contract(contract_id).unwrap().unwrap();
        contract.status = status;
        self.directory.add_contract(contract).unwrap();
    }

    /// Equipment active on whole days `from..=until` (open-ended when `None`).
    pub fn add_equipment(
        &self,
        contract_id: ContractId,
        entity: u64,
        from: NaiveDate,
        until: Option<NaiveDate>,
    ) -> EntityId {
        let id = EntityId::new(entity);
        self.directory
            .add_entity(
                contract_id,
                BillableEntity {
                    id,
                    kind: EntityKind::Equipment,
                    name: format!("Unit {entity}"),
                    activity: vec![ActivityInterval::whole_days(from, until)],
                },
            )
            .unwrap();
        id
    }
}
