//! Engine facade: wires the services over one set of backends.

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use forgebill_billing::{BillingCalculation, BillingSettings, BillingSettingsUpdate};
use forgebill_core::{CompanyId, ContractId, InvoiceId, PaymentId};
use forgebill_invoicing::{DeletionTarget, Invoice, ScheduledDeletion};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::BillingResult;
use crate::query::Page;
use crate::services::{
    BatchSummary, BillingAutomationService, BillingCalculationService, BillingHistoryEntry,
    BillingStatistics, DailyRun, InvoiceLifecycleManager, InvoiceSummary, NotificationPlanner,
    PlannedNotification, SettingsProvider, SubscriptionService,
};
use crate::store::{
    ActivitySource, AssetRegistry, AuditRecord, ContractDirectory, DeletionQueue,
    InMemoryDeletionQueue, InMemoryDirectory, InMemoryInvoiceStore, InMemoryPlanStore,
    InMemorySettingsStore, InvoiceStore, PlanStore, SettingsStore,
};

/// Storage and clock implementations the engine runs against.
#[derive(Clone)]
pub struct Backends {
    pub invoices: Arc<dyn InvoiceStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub directory: Arc<dyn ContractDirectory>,
    pub activity: Arc<dyn ActivitySource>,
    pub assets: Arc<dyn AssetRegistry>,
    pub deletions: Arc<dyn DeletionQueue>,
    pub plans: Arc<dyn PlanStore>,
    pub clock: Arc<dyn Clock>,
}

impl Backends {
    /// In-memory backends; the returned directory is shared with them so
    /// callers can seed companies, contracts and activity.
    pub fn in_memory(clock: Arc<dyn Clock>) -> (Self, Arc<InMemoryDirectory>) {
        let directory = Arc::new(InMemoryDirectory::new());
        let backends = Self {
            invoices: Arc::new(InMemoryInvoiceStore::new()),
            settings: Arc::new(InMemorySettingsStore::new()),
            directory: directory.clone(),
            activity: directory.clone(),
            assets: directory.clone(),
            deletions: Arc::new(InMemoryDeletionQueue::new()),
            plans: Arc::new(InMemoryPlanStore::new()),
            clock,
        };
        (backends, directory)
    }
}

#[derive(Clone)]
pub struct BillingEngine {
    settings: SettingsProvider,
    calculation: BillingCalculationService,
    lifecycle: InvoiceLifecycleManager,
    automation: BillingAutomationService,
    notifications: NotificationPlanner,
    subscriptions: SubscriptionService,
}

impl BillingEngine {
    pub fn new(backends: Backends, config: &EngineConfig) -> Self {
        let settings = SettingsProvider::new(
            backends.settings.clone(),
            config.settings_defaults.clone(),
            backends.clock.clone(),
        );
        let calculation = BillingCalculationService::new(
            backends.directory.clone(),
            backends.activity.clone(),
            settings.clone(),
        );
        let lifecycle = InvoiceLifecycleManager::new(
            backends.invoices.clone(),
            calculation.clone(),
            settings.clone(),
            backends.clock.clone(),
            config.payment_retry_limit,
        );
        let automation = BillingAutomationService::new(
            backends.invoices.clone(),
            backends.directory.clone(),
            backends.assets.clone(),
            backends.deletions.clone(),
            settings.clone(),
            lifecycle.clone(),
            backends.clock.clone(),
            config.default_page_size,
        );
        let notifications = NotificationPlanner::new(backends.invoices.clone(), settings.clone());
        let subscriptions = SubscriptionService::new(backends.plans, backends.clock);

        Self {
            settings,
            calculation,
            lifecycle,
            automation,
            notifications,
            subscriptions,
        }
    }

    pub fn settings(&self) -> &SettingsProvider {
        &self.settings
    }

    pub fn calculation(&self) -> &BillingCalculationService {
        &self.calculation
    }

    pub fn lifecycle(&self) -> &InvoiceLifecycleManager {
        &self.lifecycle
    }

    pub fn automation(&self) -> &BillingAutomationService {
        &self.automation
    }

    pub fn notifications(&self) -> &NotificationPlanner {
        &self.notifications
    }

    pub fn subscriptions(&self) -> &SubscriptionService {
        &self.subscriptions
    }

    pub fn get_or_create_settings(&self, company_id: CompanyId) -> BillingResult<BillingSettings> {
        self.settings.get_or_create(company_id)
    }

    pub fn update_settings(
        &self,
        company_id: CompanyId,
        update: BillingSettingsUpdate,
    ) -> BillingResult<BillingSettings> {
        self.settings.update(company_id, update)
    }

    pub fn calculate_billing_for_contract(
        &self,
        contract_id: ContractId,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> BillingResult<BillingCalculation> {
        self.calculation
            .calculate_billing_for_contract(contract_id, period_start, period_end)
    }

    pub fn generate_invoice_for_contract(
        &self,
        contract_id: ContractId,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> BillingResult<Invoice> {
        self.lifecycle
            .generate_invoice_for_contract(contract_id, period_start, period_end)
    }

    pub fn process_payment(
        &self,
        invoice_id: InvoiceId,
        amount: Decimal,
        method: &str,
        notes: Option<String>,
    ) -> BillingResult<Invoice> {
        self.lifecycle.process_payment(invoice_id, amount, method, notes)
    }

    pub fn confirm_payment(&self, invoice_id: InvoiceId, payment_id: PaymentId) -> BillingResult<Invoice> {
        self.lifecycle.confirm_payment(invoice_id, payment_id)
    }

    pub fn reject_payment(
        &self,
        invoice_id: InvoiceId,
        payment_id: PaymentId,
        reason: Option<String>,
    ) -> BillingResult<Invoice> {
        self.lifecycle.reject_payment(invoice_id, payment_id, reason)
    }

    pub fn cancel_invoice(&self, invoice_id: InvoiceId, reason: &str) -> BillingResult<Invoice> {
        self.lifecycle.cancel_invoice(invoice_id, reason)
    }

    pub fn get_invoice(&self, invoice_id: InvoiceId) -> BillingResult<Invoice> {
        self.lifecycle.get_invoice(invoice_id)
    }

    pub fn audit_trail(&self, invoice_id: InvoiceId) -> BillingResult<Vec<AuditRecord>> {
        self.lifecycle.audit_trail(invoice_id)
    }

    pub fn get_billing_history(
        &self,
        company_id: CompanyId,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> BillingResult<Page<BillingHistoryEntry>> {
        self.automation.get_billing_history(company_id, limit, offset)
    }

    pub fn get_overdue_invoices(
        &self,
        company_id: Option<CompanyId>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> BillingResult<Page<InvoiceSummary>> {
        self.automation.get_overdue_invoices(company_id, limit, offset)
    }

    pub fn auto_generate_invoices_for_month(
        &self,
        year: i32,
        month: u32,
    ) -> BillingResult<BatchSummary<InvoiceSummary>> {
        self.automation.auto_generate_invoices_for_month(year, month)
    }

    pub fn mark_overdue_invoices(&self) -> BillingResult<BatchSummary<InvoiceSummary>> {
        self.automation.mark_overdue_invoices()
    }

    pub fn schedule_deletion(
        &self,
        company_id: CompanyId,
        target: DeletionTarget,
        requested_on: Option<NaiveDate>,
    ) -> BillingResult<ScheduledDeletion> {
        self.automation.schedule_deletion(company_id, target, requested_on)
    }

    pub fn process_scheduled_deletions(&self) -> BillingResult<BatchSummary<ScheduledDeletion>> {
        self.automation.process_scheduled_deletions()
    }

    pub fn get_billing_statistics(
        &self,
        company_id: CompanyId,
        year: i32,
        month: Option<u32>,
    ) -> BillingResult<BillingStatistics> {
        self.automation.get_billing_statistics(company_id, year, month)
    }

    pub fn get_invoices_by_period(
        &self,
        company_id: Option<CompanyId>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> BillingResult<Vec<Invoice>> {
        self.automation.get_invoices_by_period(company_id, start, end)
    }

    pub fn pending_notifications(
        &self,
        company_id: CompanyId,
        today: NaiveDate,
    ) -> BillingResult<Vec<PlannedNotification>> {
        self.notifications.pending_notifications(company_id, today)
    }

    pub fn run_daily(&self, today: NaiveDate) -> BillingResult<DailyRun> {
        self.automation.run_daily(today)
    }
}
