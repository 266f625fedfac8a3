//! Batch automation and read-only reporting.
//!
//! Batch operations never abort on a single item: each contract, invoice or
//! deletion gets its own outcome in the returned [`BatchSummary`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use forgebill_billing::BillingPeriod;
use forgebill_core::{CompanyId, DeletionId};
use forgebill_invoicing::{
    DeletionDecision, DeletionTarget, Invoice, InvoiceStatus, ScheduledDeletion,
};

use crate::clock::Clock;
use crate::error::{BillingError, BillingResult, ErrorKind};
use crate::query::{Page, Pagination};
use crate::services::lifecycle::{GenerationOutcome, InvoiceLifecycleManager};
use crate::services::settings::SettingsProvider;
use crate::services::{BatchSummary, BillingHistoryEntry, InvoiceSummary};
use crate::store::{AssetRegistry, ContractDirectory, DeletionQueue, InvoiceFilter, InvoiceStore};

/// Count and amounts for one invoice status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTotals {
    pub count: u64,
    pub total: Decimal,
    pub paid: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingStatistics {
    pub company_id: CompanyId,
    pub range: BillingPeriod,
    pub invoice_count: u64,
    /// Sum of totals over non-cancelled invoices.
    pub total_billed: Decimal,
    pub total_paid: Decimal,
    /// Unpaid balance of open invoices.
    pub total_outstanding: Decimal,
    pub by_status: BTreeMap<InvoiceStatus, StatusTotals>,
}

/// Everything one daily tick did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyRun {
    pub today: NaiveDate,
    pub overdue: BatchSummary<InvoiceSummary>,
    pub generated: BatchSummary<InvoiceSummary>,
    pub deletions: BatchSummary<ScheduledDeletion>,
}

#[derive(Clone)]
pub struct BillingAutomationService {
    invoices: Arc<dyn InvoiceStore>,
    directory: Arc<dyn ContractDirectory>,
    assets: Arc<dyn AssetRegistry>,
    deletions: Arc<dyn DeletionQueue>,
    settings: SettingsProvider,
    lifecycle: InvoiceLifecycleManager,
    clock: Arc<dyn Clock>,
    default_page_size: u64,
}

impl BillingAutomationService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        invoices: Arc<dyn InvoiceStore>,
        directory: Arc<dyn ContractDirectory>,
        assets: Arc<dyn AssetRegistry>,
        deletions: Arc<dyn DeletionQueue>,
        settings: SettingsProvider,
        lifecycle: InvoiceLifecycleManager,
        clock: Arc<dyn Clock>,
        default_page_size: u64,
    ) -> Self {
        Self {
            invoices,
            directory,
            assets,
            deletions,
            settings,
            lifecycle,
            clock,
            default_page_size,
        }
    }

    /// Invoice every billable contract of every company with auto-generation
    /// enabled for the given calendar month.
    ///
    /// Re-running for the same month creates nothing new: already invoiced
    /// contracts are reported as skipped.
    pub fn auto_generate_invoices_for_month(
        &self,
        year: i32,
        month: u32,
    ) -> BillingResult<BatchSummary<InvoiceSummary>> {
        let period = BillingPeriod::calendar_month(year, month)?;
        self.generate_for(period, "auto_generate_invoices", |_| true)
    }

    /// Invoice the previous month for companies whose generation day is today.
    pub fn generate_due_invoices(
        &self,
        today: NaiveDate,
    ) -> BillingResult<BatchSummary<InvoiceSummary>> {
        let period = BillingPeriod::previous_month(today)?;
        let day = today.day();
        self.generate_for(period, "generate_due_invoices", |generation_day| {
            generation_day == day
        })
    }

    fn generate_for(
        &self,
        period: BillingPeriod,
        operation: &str,
        due_on: impl Fn(u32) -> bool,
    ) -> BillingResult<BatchSummary<InvoiceSummary>> {
        let mut summary = BatchSummary::start(operation, self.clock.now());
        info!(run_id = %summary.run_id, period = %period, operation, "invoice generation started");

        for company_id in self.directory.companies()? {
            let subject = format!("company {company_id}");
            let settings = match self.settings.get_or_create(company_id) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!(company_id = %company_id, error = %e, "cannot load billing settings");
                    summary.fail(subject, &e);
                    continue;
                }
            };
            if !settings.auto_generate_invoices {
                summary.skip(subject, "automatic invoice generation disabled");
                continue;
            }
            if !due_on(settings.invoice_generation_day) {
                summary.skip(
                    subject,
                    format!("invoice generation day is {}", settings.invoice_generation_day),
                );
                continue;
            }

            let contracts = match self.directory.contracts_for_company(company_id) {
                Ok(contracts) => contracts,
                Err(e) => {
                    let e = BillingError::from(e);
                    warn!(company_id = %company_id, error = %e, "cannot list contracts");
                    summary.fail(subject, &e);
                    continue;
                }
            };

            for contract in contracts {
                if !contract.is_billable_in(&period) {
                    debug!(contract_id = %contract.id, status = ?contract.status, "contract not billable");
                    continue;
                }
                let subject = format!("contract {}", contract.id);
                match self.lifecycle.try_generate(contract.id, period) {
                    Ok(GenerationOutcome::Generated(invoice)) => {
                        summary.succeeded.push(InvoiceSummary::from(&invoice));
                    }
                    Ok(GenerationOutcome::AlreadyInvoiced { number, .. }) => {
                        summary.skip(subject, format!("already invoiced ({number})"));
                    }
                    Ok(GenerationOutcome::NothingToBill) => {
                        summary.skip(subject, "nothing to bill");
                    }
                    Err(e) => {
                        warn!(contract_id = %contract.id, error = %e, "invoice generation failed");
                        summary.fail(subject, &e);
                    }
                }
            }
        }

        Ok(summary.finish(self.clock.now()))
    }

    pub fn mark_overdue_invoices(&self) -> BillingResult<BatchSummary<InvoiceSummary>> {
        self.mark_overdue_invoices_as_of(self.clock.today())
    }

    /// Move every unpaid invoice whose due date is before `today` to Overdue.
    pub fn mark_overdue_invoices_as_of(
        &self,
        today: NaiveDate,
    ) -> BillingResult<BatchSummary<InvoiceSummary>> {
        let mut summary = BatchSummary::start("mark_overdue_invoices", self.clock.now());
        let filter = InvoiceFilter::default()
            .with_statuses([InvoiceStatus::Issued, InvoiceStatus::PartiallyPaid]);

        for invoice in self.invoices.list(&filter)? {
            if !invoice.is_past_due(today) {
                continue;
            }
            let subject = format!("invoice {}", invoice.number());
            match self.lifecycle.mark_overdue(invoice.id_typed(), today) {
                Ok(updated) => summary.succeeded.push(InvoiceSummary::from(&updated)),
                // Paid or cancelled between the scan and the update.
                Err(e) if e.kind() == ErrorKind::InvalidStateTransition => {
                    summary.skip(subject, e.to_string());
                }
                Err(e) => {
                    warn!(invoice_id = %invoice.id_typed(), error = %e, "marking overdue failed");
                    summary.fail(subject, &e);
                }
            }
        }

        Ok(summary.finish(self.clock.now()))
    }

    /// Queue a contract or piece of equipment for deletion after the current
    /// billing cycle.
    pub fn schedule_deletion(
        &self,
        company_id: CompanyId,
        target: DeletionTarget,
        requested_on: Option<NaiveDate>,
    ) -> BillingResult<ScheduledDeletion> {
        let contract_id = target.contract_id();
        let contract = self
            .directory
            .contract(contract_id)?
            .ok_or_else(|| BillingError::not_found(format!("contract {contract_id}")))?;
        if contract.company_id != company_id {
            return Err(BillingError::invalid_input(format!(
                "contract {contract_id} does not belong to company {company_id}"
            )));
        }

        let requested_on = requested_on.unwrap_or_else(|| self.clock.today());
        let generation_day = self.settings.get_or_create(company_id)?.invoice_generation_day;
        let deletion = ScheduledDeletion::new(
            DeletionId::new(),
            company_id,
            target,
            requested_on,
            generation_day,
        )?;
        self.deletions.schedule(deletion.clone())?;
        info!(
            deletion_id = %deletion.id,
            target = %deletion.target,
            delete_after = %deletion.delete_after,
            "deletion scheduled"
        );
        Ok(deletion)
    }

    pub fn process_scheduled_deletions(&self) -> BillingResult<BatchSummary<ScheduledDeletion>> {
        self.process_scheduled_deletions_as_of(self.clock.today())
    }

    /// Perform every queued deletion whose grace period is over, whose final
    /// month has been invoiced and whose contract has no unpaid invoice still
    /// within its payment term.
    pub fn process_scheduled_deletions_as_of(
        &self,
        today: NaiveDate,
    ) -> BillingResult<BatchSummary<ScheduledDeletion>> {
        let mut summary = BatchSummary::start("process_scheduled_deletions", self.clock.now());

        for deletion in self.deletions.pending()? {
            let subject = deletion.target.to_string();
            let contract_id = deletion.target.contract_id();
            let lookup = self.invoices.list(&InvoiceFilter::for_contract(contract_id)).and_then(
                |invoices| Ok((invoices, self.directory.contract(contract_id)?)),
            );
            let (invoices, contract) = match lookup {
                Ok(found) => found,
                Err(e) => {
                    summary.fail(subject, &e.into());
                    continue;
                }
            };
            let final_invoice_expected =
                contract.is_some_and(|c| c.is_billable_in(&deletion.final_period));

            match deletion.evaluate(today, &invoices, final_invoice_expected) {
                DeletionDecision::Deferred { until, reason } => {
                    debug!(deletion_id = %deletion.id, %until, %reason, "deletion deferred");
                    summary.skip(subject, format!("{reason} (until {until})"));
                }
                DeletionDecision::AwaitingFinalInvoice { period } => {
                    debug!(deletion_id = %deletion.id, %period, "final cycle not invoiced yet");
                    summary.skip(subject, format!("final invoice for {period} not issued yet"));
                }
                DeletionDecision::Eligible => match self.delete(&deletion) {
                    Ok(()) => {
                        info!(deletion_id = %deletion.id, target = %deletion.target, "deletion performed");
                        summary.succeeded.push(deletion);
                    }
                    Err(e) => {
                        warn!(deletion_id = %deletion.id, error = %e, "deletion failed");
                        summary.fail(subject, &e);
                    }
                },
            }
        }

        Ok(summary.finish(self.clock.now()))
    }

    fn delete(&self, deletion: &ScheduledDeletion) -> BillingResult<()> {
        match self.assets.delete(&deletion.target) {
            Ok(()) => {}
            Err(crate::store::StoreError::NotFound(what)) => {
                debug!(deletion_id = %deletion.id, %what, "target already gone");
            }
            Err(e) => return Err(e.into()),
        }
        self.deletions.complete(deletion.id)?;
        Ok(())
    }

    /// Totals for invoices whose period starts in `year` (or one month of it).
    pub fn get_billing_statistics(
        &self,
        company_id: CompanyId,
        year: i32,
        month: Option<u32>,
    ) -> BillingResult<BillingStatistics> {
        let range = BillingPeriod::year_or_month(year, month)?;
        let invoices = self
            .invoices
            .list(&InvoiceFilter::for_company(company_id).starting_within(range))?;

        let mut by_status: BTreeMap<InvoiceStatus, StatusTotals> = InvoiceStatus::ALL
            .iter()
            .map(|status| (*status, StatusTotals::default()))
            .collect();
        let mut stats = BillingStatistics {
            company_id,
            range,
            invoice_count: 0,
            total_billed: Decimal::ZERO,
            total_paid: Decimal::ZERO,
            total_outstanding: Decimal::ZERO,
            by_status: BTreeMap::new(),
        };

        for invoice in &invoices {
            let entry = by_status.entry(invoice.status()).or_default();
            entry.count += 1;
            entry.total += invoice.total();
            entry.paid += invoice.paid_amount();

            stats.invoice_count += 1;
            stats.total_paid += invoice.paid_amount();
            if invoice.status() != InvoiceStatus::Cancelled {
                stats.total_billed += invoice.total();
            }
            if invoice.status().is_open() {
                stats.total_outstanding += invoice.balance();
            }
        }
        stats.by_status = by_status;
        Ok(stats)
    }

    /// Invoices whose period overlaps `start..=end`, across all companies
    /// when `company_id` is `None`.
    pub fn get_invoices_by_period(
        &self,
        company_id: Option<CompanyId>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> BillingResult<Vec<Invoice>> {
        let period = BillingPeriod::new(start, end)?;
        Ok(self.invoices.list(&company_filter(company_id).overlapping(period))?)
    }

    /// Overdue invoices, including unpaid ones past due that the daily sweep
    /// has not flagged yet. `None` lists every company.
    pub fn get_overdue_invoices(
        &self,
        company_id: Option<CompanyId>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> BillingResult<Page<InvoiceSummary>> {
        let today = self.clock.today();
        let pagination = self.pagination(limit, offset);
        let overdue: Vec<InvoiceSummary> = self
            .invoices
            .list(&company_filter(company_id).with_statuses([
                InvoiceStatus::Issued,
                InvoiceStatus::PartiallyPaid,
                InvoiceStatus::Overdue,
            ]))?
            .iter()
            .filter(|inv| inv.status() == InvoiceStatus::Overdue || inv.is_past_due(today))
            .map(InvoiceSummary::from)
            .collect();

        let total = overdue.len() as u64;
        let items = overdue
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .collect();
        Ok(Page::new(items, total, pagination))
    }

    /// All invoices of a company in sequence order with their payments, one
    /// page at a time.
    pub fn get_billing_history(
        &self,
        company_id: CompanyId,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> BillingResult<Page<BillingHistoryEntry>> {
        let pagination = self.pagination(limit, offset);
        let (items, total) = self
            .invoices
            .page(&InvoiceFilter::for_company(company_id), pagination)?;
        Ok(Page::new(items, total, pagination).map(|inv| BillingHistoryEntry::from(&inv)))
    }

    /// One scheduler tick: overdue sweep, due generation, then deletions.
    pub fn run_daily(&self, today: NaiveDate) -> BillingResult<DailyRun> {
        let overdue = self.mark_overdue_invoices_as_of(today)?;
        let generated = self.generate_due_invoices(today)?;
        let deletions = self.process_scheduled_deletions_as_of(today)?;
        Ok(DailyRun {
            today,
            overdue,
            generated,
            deletions,
        })
    }

    fn pagination(&self, limit: Option<i64>, offset: Option<i64>) -> Pagination {
        Pagination::with_default(limit, offset, self.default_page_size)
    }
}

fn company_filter(company_id: Option<CompanyId>) -> InvoiceFilter {
    company_id.map_or_else(InvoiceFilter::default, InvoiceFilter::for_company)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestWorld, date};
    use forgebill_billing::{BillingSettingsUpdate, ContractStatus};
    use forgebill_core::ContractId;
    use forgebill_invoicing::PaymentStatus;
    use rust_decimal_macros::dec;

    #[test]
    fn monthly_run_is_idempotent() {
        let world = TestWorld::new(date(2025, 2, 1));
        world.add_contract(1, 10, dec!(1000));
        world.add_contract(2, 20, dec!(300));
        let automation = world.engine.automation();

        let first = automation.auto_generate_invoices_for_month(2025, 1).unwrap();
        assert_eq!(first.succeeded.len(), 2);
        assert!(first.is_clean());

        let second = automation.auto_generate_invoices_for_month(2025, 1).unwrap();
        assert!(second.succeeded.is_empty());
        assert_eq!(second.skipped.len(), 2);
        assert!(second.skipped.iter().all(|s| s.reason.starts_with("already invoiced")));
    }

    #[test]
    fn run_skips_disabled_companies_and_inactive_contracts() {
        let world = TestWorld::new(date(2025, 2, 1));
        world.add_contract(1, 10, dec!(1000));
        let suspended = world.add_contract(1, 11, dec!(1000));
        world.set_contract_status(suspended, ContractStatus::Suspended);
        world.add_contract(2, 20, dec!(300));
        world
            .engine
            .settings()
            .update(
                CompanyId::new(2),
                BillingSettingsUpdate {
                    auto_generate_invoices: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();

        let summary = world
            .engine
            .automation()
            .auto_generate_invoices_for_month(2025, 1)
            .unwrap();
        assert_eq!(summary.succeeded.len(), 1);
        assert_eq!(summary.succeeded[0].contract_id, ContractId::new(10));
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.skipped[0].subject, "company 2");
    }

    #[test]
    fn one_broken_contract_does_not_stop_the_run() {
        let world = TestWorld::new(date(2025, 2, 1));
        world.add_contract(1, 10, dec!(1000));
        world.add_contract_without_tariff(1, 11);

        let summary = world
            .engine
            .automation()
            .auto_generate_invoices_for_month(2025, 1)
            .unwrap();
        assert_eq!(summary.succeeded.len(), 1);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].kind, ErrorKind::NotFound);
        assert_eq!(summary.failed[0].subject, "contract 11");
    }

    #[test]
    fn overdue_sweep_only_touches_past_due_unpaid_invoices() {
        let world = TestWorld::new(date(2025, 2, 1));
        let late = world.add_contract(1, 10, dec!(1000));
        let paid = world.add_contract(1, 11, dec!(1000));
        let lifecycle = world.engine.lifecycle();
        lifecycle
            .generate_invoice_for_contract(late, date(2025, 1, 1), date(2025, 1, 31))
            .unwrap();
        let settled = lifecycle
            .generate_invoice_for_contract(paid, date(2025, 1, 1), date(2025, 1, 31))
            .unwrap();
        lifecycle
            .process_payment(settled.id_typed(), dec!(1200), "card", None)
            .unwrap();

        let automation = world.engine.automation();
        let on_due_date = automation.mark_overdue_invoices_as_of(date(2025, 2, 15)).unwrap();
        assert!(on_due_date.succeeded.is_empty());

        world.set_today(date(2025, 2, 16));
        let after = automation.mark_overdue_invoices().unwrap();
        assert_eq!(after.succeeded.len(), 1);
        assert_eq!(after.succeeded[0].contract_id, late);
        assert_eq!(after.succeeded[0].status, InvoiceStatus::Overdue);
    }

    #[test]
    fn statistics_group_by_status() {
        let world = TestWorld::new(date(2025, 2, 1));
        let a = world.add_contract(1, 10, dec!(1000));
        let b = world.add_contract(1, 11, dec!(500));
        let automation = world.engine.automation();
        automation.auto_generate_invoices_for_month(2025, 1).unwrap();

        let lifecycle = world.engine.lifecycle();
        let invoices = automation
            .get_invoices_by_period(Some(CompanyId::new(1)), date(2025, 1, 1), date(2025, 1, 31))
            .unwrap();
        let first = invoices.iter().find(|i| i.contract_id() == a).unwrap();
        lifecycle
            .process_payment(first.id_typed(), dec!(1200), "card", None)
            .unwrap();
        let second = invoices.iter().find(|i| i.contract_id() == b).unwrap();
        lifecycle.cancel_invoice(second.id_typed(), "duplicate").unwrap();

        let stats = automation
            .get_billing_statistics(CompanyId::new(1), 2025, Some(1))
            .unwrap();
        assert_eq!(stats.invoice_count, 2);
        assert_eq!(stats.total_billed, dec!(1200));
        assert_eq!(stats.total_paid, dec!(1200));
        assert_eq!(stats.total_outstanding, Decimal::ZERO);
        assert_eq!(stats.by_status[&InvoiceStatus::Paid].count, 1);
        assert_eq!(stats.by_status[&InvoiceStatus::Cancelled].count, 1);
        assert_eq!(stats.by_status[&InvoiceStatus::Issued].count, 0);

        let february = automation
            .get_billing_statistics(CompanyId::new(1), 2025, Some(2))
            .unwrap();
        assert_eq!(february.invoice_count, 0);
    }

    #[test]
    fn history_pages_through_invoices() {
        let world = TestWorld::new(date(2025, 4, 1));
        let contract = world.add_contract(1, 10, dec!(100));
        let lifecycle = world.engine.lifecycle();
        for month in 1..=3 {
            let period = BillingPeriod::calendar_month(2025, month).unwrap();
            lifecycle
                .generate_invoice_for_contract(contract, period.start(), period.end())
                .unwrap();
        }

        let automation = world.engine.automation();
        let page = automation
            .get_billing_history(CompanyId::new(1), Some(2), None)
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert!(page.has_more);
        assert_eq!(page.items[0].invoice.number, "INV-0001");

        let rest = automation
            .get_billing_history(CompanyId::new(1), Some(2), Some(2))
            .unwrap();
        assert_eq!(rest.items.len(), 1);
        assert!(!rest.has_more);
    }

    #[test]
    fn overdue_listing_includes_unflagged_past_due_invoices() {
        let world = TestWorld::new(date(2025, 2, 1));
        let contract = world.add_contract(1, 10, dec!(1000));
        world
            .engine
            .lifecycle()
            .generate_invoice_for_contract(contract, date(2025, 1, 1), date(2025, 1, 31))
            .unwrap();

        let automation = world.engine.automation();
        assert_eq!(automation.get_overdue_invoices(Some(CompanyId::new(1)), None, None).unwrap().total, 0);

        world.set_today(date(2025, 3, 1));
        let page = automation.get_overdue_invoices(Some(CompanyId::new(1)), None, None).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].status, InvoiceStatus::Issued);
    }

    #[test]
    fn deletion_waits_for_grace_period_and_payment_term() {
        let world = TestWorld::new(date(2025, 1, 20));
        let contract = world.add_contract(1, 10, dec!(1000));
        let automation = world.engine.automation();

        let deletion = automation
            .schedule_deletion(CompanyId::new(1), DeletionTarget::Contract { contract_id: contract }, None)
            .unwrap();
        assert_eq!(deletion.delete_after, date(2025, 2, 1));

        // Issued on Feb 1, due Feb 15.
        world.set_today(date(2025, 2, 1));
        world
            .engine
            .lifecycle()
            .generate_invoice_for_contract(contract, date(2025, 1, 1), date(2025, 1, 31))
            .unwrap();

        let in_grace = automation.process_scheduled_deletions().unwrap();
        assert!(in_grace.succeeded.is_empty());
        assert_eq!(in_grace.skipped.len(), 1);

        let within_term = automation.process_scheduled_deletions_as_of(date(2025, 2, 10)).unwrap();
        assert!(within_term.succeeded.is_empty());
        assert!(within_term.skipped[0].reason.contains("payment term"));

        let after_term = automation.process_scheduled_deletions_as_of(date(2025, 2, 16)).unwrap();
        assert_eq!(after_term.succeeded.len(), 1);
        assert!(world.directory.contract(contract).unwrap().is_none());

        let again = automation.process_scheduled_deletions_as_of(date(2025, 2, 17)).unwrap();
        assert_eq!(again.processed(), 0);
    }

    #[test]
    fn deletion_for_foreign_contract_is_rejected() {
        let world = TestWorld::new(date(2025, 1, 20));
        let contract = world.add_contract(1, 10, dec!(1000));
        let err = world
            .engine
            .automation()
            .schedule_deletion(CompanyId::new(2), DeletionTarget::Contract { contract_id: contract }, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn daily_run_generates_on_generation_day_only() {
        let world = TestWorld::new(date(2025, 2, 1));
        world.add_contract(1, 10, dec!(1000));
        let automation = world.engine.automation();

        let off_day = automation.run_daily(date(2025, 2, 2)).unwrap();
        assert!(off_day.generated.succeeded.is_empty());
        assert_eq!(off_day.generated.skipped.len(), 1);
        assert_eq!(off_day.generated.skipped[0].subject, "company 1");
        assert_eq!(off_day.generated.skipped[0].reason, "invoice generation day is 1");

        let run = automation.run_daily(date(2025, 2, 1)).unwrap();
        assert_eq!(run.generated.succeeded.len(), 1);
        assert_eq!(
            run.generated.succeeded[0].period,
            Some(BillingPeriod::calendar_month(2025, 1).unwrap())
        );
    }

    #[test]
    fn deletion_waits_for_invoice_run_on_later_generation_day() {
        let world = TestWorld::new(date(2025, 1, 20));
        let contract = world.add_contract(1, 10, dec!(1000));
        world
            .engine
            .settings()
            .update(
                CompanyId::new(1),
                BillingSettingsUpdate {
                    invoice_generation_day: Some(5),
                    ..Default::default()
                },
            )
            .unwrap();
        let automation = world.engine.automation();

        let deletion = automation
            .schedule_deletion(CompanyId::new(1), DeletionTarget::Contract { contract_id: contract }, None)
            .unwrap();
        assert_eq!(deletion.delete_after, date(2025, 2, 5));

        world.set_today(date(2025, 2, 2));
        let early = automation.run_daily(date(2025, 2, 2)).unwrap();
        assert!(early.deletions.succeeded.is_empty());
        assert!(early.deletions.skipped[0].reason.contains("grace period"));

        // The run on the generation day bills January before anything is deleted.
        world.set_today(date(2025, 2, 5));
        let run_day = automation.run_daily(date(2025, 2, 5)).unwrap();
        assert_eq!(run_day.generated.succeeded.len(), 1);
        assert!(run_day.deletions.succeeded.is_empty());

        let january = automation
            .get_invoices_by_period(Some(CompanyId::new(1)), date(2025, 1, 1), date(2025, 1, 31))
            .unwrap();
        assert_eq!(january.len(), 1);
        assert_eq!(january[0].total(), dec!(1200));

        world.set_today(date(2025, 2, 6));
        let within_term = automation.run_daily(date(2025, 2, 6)).unwrap();
        assert!(within_term.deletions.succeeded.is_empty());
        assert!(within_term.deletions.skipped[0].reason.contains("payment term"));

        world
            .engine
            .lifecycle()
            .process_payment(january[0].id_typed(), dec!(1200), "card", None)
            .unwrap();
        world.set_today(date(2025, 2, 7));
        let settled = automation.run_daily(date(2025, 2, 7)).unwrap();
        assert_eq!(settled.deletions.succeeded.len(), 1);
        assert!(world.directory.contract(contract).unwrap().is_none());
    }

    #[test]
    fn deletion_waits_for_final_invoice() {
        let world = TestWorld::new(date(2025, 1, 20));
        let contract = world.add_contract(1, 10, dec!(1000));
        let automation = world.engine.automation();
        automation
            .schedule_deletion(CompanyId::new(1), DeletionTarget::Contract { contract_id: contract }, None)
            .unwrap();

        let unbilled = automation.process_scheduled_deletions_as_of(date(2025, 2, 10)).unwrap();
        assert!(unbilled.succeeded.is_empty());
        assert_eq!(unbilled.skipped.len(), 1);
        assert!(unbilled.skipped[0].reason.starts_with("final invoice for 2025-01-01..2025-01-31"));
        assert!(world.directory.contract(contract).unwrap().is_some());

        world.set_today(date(2025, 2, 10));
        let lifecycle = world.engine.lifecycle();
        let invoice = lifecycle
            .generate_invoice_for_contract(contract, date(2025, 1, 1), date(2025, 1, 31))
            .unwrap();
        lifecycle
            .process_payment(invoice.id_typed(), dec!(1200), "card", None)
            .unwrap();

        let billed = automation.process_scheduled_deletions_as_of(date(2025, 2, 11)).unwrap();
        assert_eq!(billed.succeeded.len(), 1);
    }

    #[test]
    fn suspended_contract_is_not_held_for_a_final_invoice() {
        let world = TestWorld::new(date(2025, 1, 20));
        let contract = world.add_contract(1, 10, dec!(1000));
        world.set_contract_status(contract, ContractStatus::Suspended);
        let automation = world.engine.automation();
        automation
            .schedule_deletion(CompanyId::new(1), DeletionTarget::Contract { contract_id: contract }, None)
            .unwrap();

        let sweep = automation.process_scheduled_deletions_as_of(date(2025, 2, 2)).unwrap();
        assert_eq!(sweep.succeeded.len(), 1);
    }

    #[test]
    fn views_without_company_span_all_companies() {
        let world = TestWorld::new(date(2025, 2, 1));
        world.add_contract(1, 10, dec!(1000));
        world.add_contract(2, 20, dec!(300));
        let automation = world.engine.automation();
        automation.auto_generate_invoices_for_month(2025, 1).unwrap();

        let all = automation
            .get_invoices_by_period(None, date(2025, 1, 1), date(2025, 1, 31))
            .unwrap();
        assert_eq!(all.len(), 2);
        let second = automation
            .get_invoices_by_period(Some(CompanyId::new(2)), date(2025, 1, 1), date(2025, 1, 31))
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].company_id(), CompanyId::new(2));

        world.set_today(date(2025, 3, 1));
        let overdue = automation.get_overdue_invoices(None, None, None).unwrap();
        assert_eq!(overdue.total, 2);
        let companies: Vec<_> = overdue.items.iter().map(|i| i.company_id).collect();
        assert_eq!(companies, vec![CompanyId::new(1), CompanyId::new(2)]);
        assert_eq!(
            automation
                .get_overdue_invoices(Some(CompanyId::new(2)), None, None)
                .unwrap()
                .total,
            1
        );
    }

    #[test]
    fn history_carries_payments() {
        let world = TestWorld::new(date(2025, 2, 1));
        let contract = world.add_contract(1, 10, dec!(1000));
        let lifecycle = world.engine.lifecycle();
        let invoice = lifecycle
            .generate_invoice_for_contract(contract, date(2025, 1, 1), date(2025, 1, 31))
            .unwrap();
        lifecycle
            .process_payment(invoice.id_typed(), dec!(500), "bank_transfer", Some("ref 7".into()))
            .unwrap();

        let history = world
            .engine
            .automation()
            .get_billing_history(CompanyId::new(1), None, None)
            .unwrap();
        let entry = &history.items[0];
        assert_eq!(entry.invoice.paid_amount, dec!(500));
        assert_eq!(entry.payments.len(), 1);
        assert_eq!(entry.payments[0].amount, dec!(500));
        assert_eq!(entry.payments[0].method, "bank_transfer");
        assert_eq!(entry.payments[0].notes.as_deref(), Some("ref 7"));
        assert_eq!(entry.payments[0].status, PaymentStatus::Confirmed);

        let json = serde_json::to_value(entry).unwrap();
        assert_eq!(json["number"], "INV-0001");
        assert_eq!(json["payments"][0]["method"], "bank_transfer");
    }
}
