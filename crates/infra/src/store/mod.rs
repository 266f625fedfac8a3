//! Storage seams consumed by the engine.
//!
//! All traits are synchronous and object safe; services hold them as
//! `Arc<dyn Trait>`. `in_memory` provides implementations for tests and the
//! runner binary.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use forgebill_billing::{
    BillableEntity, BillingPeriod, BillingPlan, BillingSettings, Contract, Subscription, TariffPlan,
};
use forgebill_core::{
    CompanyId, ContractId, DeletionId, ExpectedVersion, InvoiceId, PlanId, SubscriptionId, TariffId,
};
use forgebill_invoicing::{DeletionTarget, Invoice, InvoiceEvent, InvoiceStatus, ScheduledDeletion};

use crate::query::Pagination;

pub mod in_memory;

pub use in_memory::{
    InMemoryDeletionQueue, InMemoryDirectory, InMemoryInvoiceStore, InMemoryPlanStore,
    InMemorySettingsStore,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness violation (live invoice per contract period, invoice number, ids).
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// Optimistic concurrency failure: the stored version moved on.
    #[error("concurrency conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// One persisted invoice event, kept as the invoice's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub event_id: Uuid,
    pub invoice_id: InvoiceId,
    /// Position in the invoice's history (1-based, equals the version after apply).
    pub sequence_number: u64,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: JsonValue,
}

/// Invoice selection used by list and page queries.
///
/// Period bounds select on `period_start`; `overlapping` selects any invoice
/// whose period intersects the given one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvoiceFilter {
    pub company_id: Option<CompanyId>,
    pub contract_id: Option<ContractId>,
    pub statuses: Option<Vec<InvoiceStatus>>,
    pub period_start_from: Option<NaiveDate>,
    pub period_start_to: Option<NaiveDate>,
    pub overlapping: Option<BillingPeriod>,
}

impl InvoiceFilter {
    pub fn for_company(company_id: CompanyId) -> Self {
        Self {
            company_id: Some(company_id),
            ..Self::default()
        }
    }

    pub fn for_contract(contract_id: ContractId) -> Self {
        Self {
            contract_id: Some(contract_id),
            ..Self::default()
        }
    }

    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = InvoiceStatus>) -> Self {
        self.statuses = Some(statuses.into_iter().collect());
        self
    }

    /// Invoices whose period starts inside `range`.
    pub fn starting_within(mut self, range: BillingPeriod) -> Self {
        self.period_start_from = Some(range.start());
        self.period_start_to = Some(range.end());
        self
    }

    pub fn overlapping(mut self, period: BillingPeriod) -> Self {
        self.overlapping = Some(period);
        self
    }

    pub fn matches(&self, invoice: &Invoice) -> bool {
        if self.company_id.is_some_and(|c| c != invoice.company_id()) {
            return false;
        }
        if self.contract_id.is_some_and(|c| c != invoice.contract_id()) {
            return false;
        }
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&invoice.status()) {
                return false;
            }
        }
        let Some(period) = invoice.period() else {
            return false;
        };
        if self.period_start_from.is_some_and(|from| period.start() < from) {
            return false;
        }
        if self.period_start_to.is_some_and(|to| period.start() > to) {
            return false;
        }
        if self.overlapping.is_some_and(|p| !p.overlaps(&period)) {
            return false;
        }
        true
    }
}

/// Invoice persistence with the transactional guarantees the lifecycle needs.
pub trait InvoiceStore: Send + Sync {
    fn next_invoice_id(&self) -> Result<InvoiceId, StoreError>;

    /// Allocate the next invoice sequence for a company.
    ///
    /// Strictly increasing per company; a value is never handed out twice,
    /// even if the invoice using it is never stored.
    fn next_sequence(&self, company_id: CompanyId) -> Result<u64, StoreError>;

    /// Store a new invoice.
    ///
    /// Fails with `Duplicate` when a live (non-cancelled) invoice already
    /// exists for the same contract and exact period, or the number is taken.
    fn insert(&self, invoice: &Invoice, events: &[InvoiceEvent]) -> Result<(), StoreError>;

    /// Replace an invoice if the stored version still equals `expected`.
    fn update(
        &self,
        invoice: &Invoice,
        events: &[InvoiceEvent],
        expected: ExpectedVersion,
    ) -> Result<(), StoreError>;

    fn get(&self, invoice_id: InvoiceId) -> Result<Option<Invoice>, StoreError>;

    fn find_live_for_period(
        &self,
        contract_id: ContractId,
        period: BillingPeriod,
    ) -> Result<Option<Invoice>, StoreError>;

    /// Matching invoices ordered by company, then sequence.
    fn list(&self, filter: &InvoiceFilter) -> Result<Vec<Invoice>, StoreError>;

    /// One page of [`list`](Self::list) plus the total match count.
    fn page(
        &self,
        filter: &InvoiceFilter,
        pagination: Pagination,
    ) -> Result<(Vec<Invoice>, u64), StoreError> {
        let all = self.list(filter)?;
        let total = all.len() as u64;
        let items = all
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .collect();
        Ok((items, total))
    }

    fn audit_trail(&self, invoice_id: InvoiceId) -> Result<Vec<AuditRecord>, StoreError>;
}

/// Per-company settings with atomic create-if-absent.
pub trait SettingsStore: Send + Sync {
    fn get(&self, company_id: CompanyId) -> Result<Option<BillingSettings>, StoreError>;

    /// Store `settings` unless the company already has settings; returns the
    /// stored record either way.
    fn insert_if_absent(&self, settings: BillingSettings) -> Result<BillingSettings, StoreError>;

    fn update(&self, settings: &BillingSettings) -> Result<(), StoreError>;
}

/// Read access to companies, contracts and tariffs owned by other systems.
pub trait ContractDirectory: Send + Sync {
    fn companies(&self) -> Result<Vec<CompanyId>, StoreError>;

    fn contract(&self, contract_id: ContractId) -> Result<Option<Contract>, StoreError>;

    fn tariff(&self, tariff_id: TariffId) -> Result<Option<TariffPlan>, StoreError>;

    fn contracts_for_company(&self, company_id: CompanyId) -> Result<Vec<Contract>, StoreError>;
}

/// Activity facts per contract and period.
pub trait ActivitySource: Send + Sync {
    fn billable_entities(
        &self,
        contract_id: ContractId,
        period: BillingPeriod,
    ) -> Result<Vec<BillableEntity>, StoreError>;
}

/// Removes contracts and equipment once their deletion is due.
pub trait AssetRegistry: Send + Sync {
    fn delete(&self, target: &DeletionTarget) -> Result<(), StoreError>;
}

pub trait DeletionQueue: Send + Sync {
    /// Queue a deletion; `Duplicate` if the target is already queued.
    fn schedule(&self, deletion: ScheduledDeletion) -> Result<(), StoreError>;

    fn pending(&self) -> Result<Vec<ScheduledDeletion>, StoreError>;

    fn complete(&self, deletion_id: DeletionId) -> Result<(), StoreError>;
}

pub trait PlanStore: Send + Sync {
    fn next_plan_id(&self) -> Result<PlanId, StoreError>;

    fn next_subscription_id(&self) -> Result<SubscriptionId, StoreError>;

    fn insert_plan(&self, plan: &BillingPlan) -> Result<(), StoreError>;

    fn get_plan(&self, plan_id: PlanId) -> Result<Option<BillingPlan>, StoreError>;

    fn update_plan(&self, plan: &BillingPlan) -> Result<(), StoreError>;

    fn insert_subscription(&self, subscription: &Subscription) -> Result<(), StoreError>;

    fn get_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Option<Subscription>, StoreError>;

    fn update_subscription(&self, subscription: &Subscription) -> Result<(), StoreError>;

    fn subscriptions_for_plan(&self, plan_id: PlanId) -> Result<Vec<Subscription>, StoreError>;
}
