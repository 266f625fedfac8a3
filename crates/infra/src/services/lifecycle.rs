//! Invoice lifecycle manager: generation, payments, overdue marking and
//! cancellation over the invoice store.
//!
//! Every mutation is a read-modify-write against the aggregate version. A
//! stale write is retried from a fresh read, so concurrent payments against
//! one invoice serialize instead of losing updates.

use std::sync::Arc;

use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use forgebill_billing::{BillingPeriod, BillingSettings};
use forgebill_core::{Aggregate, AggregateRoot, ContractId, ExpectedVersion, InvoiceId, PaymentId};
use forgebill_invoicing::{
    CancelInvoice, ConfirmPayment, CreateDraft, Invoice, InvoiceCommand, InvoiceItem,
    IssueInvoice, MarkOverdue, RegisterPayment, RejectPayment,
};

use crate::clock::Clock;
use crate::error::{BillingError, BillingResult};
use crate::services::calculation::BillingCalculationService;
use crate::services::settings::SettingsProvider;
use crate::store::{AuditRecord, InvoiceStore, StoreError};

/// Result of a generation attempt that is not an error for batch callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Generated(Invoice),
    /// A live invoice already covers the contract and period.
    AlreadyInvoiced { invoice_id: InvoiceId, number: String },
    /// The calculation produced no lines.
    NothingToBill,
}

#[derive(Clone)]
pub struct InvoiceLifecycleManager {
    invoices: Arc<dyn InvoiceStore>,
    calculator: BillingCalculationService,
    settings: SettingsProvider,
    clock: Arc<dyn Clock>,
    retry_limit: u32,
}

impl InvoiceLifecycleManager {
    pub fn new(
        invoices: Arc<dyn InvoiceStore>,
        calculator: BillingCalculationService,
        settings: SettingsProvider,
        clock: Arc<dyn Clock>,
        retry_limit: u32,
    ) -> Self {
        Self {
            invoices,
            calculator,
            settings,
            clock,
            retry_limit: retry_limit.max(1),
        }
    }

    /// Generate and issue the invoice for one contract period.
    ///
    /// Fails with `AlreadyExists` when a live invoice covers the period and
    /// `InvalidInput` when there is nothing to bill.
    pub fn generate_invoice_for_contract(
        &self,
        contract_id: ContractId,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> BillingResult<Invoice> {
        let period = BillingPeriod::new(period_start, period_end)?;
        match self.try_generate(contract_id, period)? {
            GenerationOutcome::Generated(invoice) => Ok(invoice),
            GenerationOutcome::AlreadyInvoiced { number, .. } => Err(BillingError::AlreadyExists(
                format!("contract {contract_id} is already invoiced for {period} ({number})"),
            )),
            GenerationOutcome::NothingToBill => Err(BillingError::invalid_input(format!(
                "nothing to bill for contract {contract_id} in {period}"
            ))),
        }
    }

    pub fn try_generate(
        &self,
        contract_id: ContractId,
        period: BillingPeriod,
    ) -> BillingResult<GenerationOutcome> {
        if let Some(existing) = self.invoices.find_live_for_period(contract_id, period)? {
            return Ok(already_invoiced(&existing));
        }

        let calculation = self.calculator.calculate_for_period(contract_id, period)?;
        if calculation.is_empty() {
            debug!(contract_id = %contract_id, period = %period, "nothing to bill");
            return Ok(GenerationOutcome::NothingToBill);
        }

        let settings = self.settings.get_or_create(calculation.company_id)?;
        let now = self.clock.now();
        let issue_date = now.date_naive();
        let due_date = due_date(&settings, issue_date)?;

        let invoice_id = self.invoices.next_invoice_id()?;
        let sequence = self.invoices.next_sequence(calculation.company_id)?;
        let number = settings.invoice_number_format.render(
            &settings.invoice_number_prefix,
            sequence,
            issue_date,
        );

        let items = calculation
            .line_items
            .iter()
            .zip(1u32..)
            .map(|(line, line_no)| InvoiceItem::from_line(line_no, line))
            .collect();

        let mut invoice = Invoice::empty(invoice_id);
        let mut events = invoice.execute(&InvoiceCommand::CreateDraft(CreateDraft {
            invoice_id,
            company_id: calculation.company_id,
            contract_id,
            number,
            sequence,
            period,
            currency: calculation.currency.clone(),
            tax_rate: calculation.tax_rate,
            tax_included: calculation.tax_included,
            subtotal: calculation.subtotal,
            tax: calculation.tax,
            total: calculation.total,
            items,
            occurred_at: now,
        }))?;
        events.extend(invoice.execute(&InvoiceCommand::IssueInvoice(IssueInvoice {
            invoice_id,
            issue_date,
            due_date,
            occurred_at: now,
        }))?);

        match self.invoices.insert(&invoice, &events) {
            Ok(()) => {
                info!(
                    invoice_id = %invoice_id,
                    number = %invoice.number(),
                    contract_id = %contract_id,
                    period = %period,
                    total = %invoice.total(),
                    due_date = %due_date,
                    "invoice issued"
                );
                Ok(GenerationOutcome::Generated(invoice))
            }
            // A concurrent generator won the period; report its invoice.
            Err(StoreError::Duplicate(msg)) => {
                match self.invoices.find_live_for_period(contract_id, period)? {
                    Some(existing) => Ok(already_invoiced(&existing)),
                    None => Err(StoreError::Duplicate(msg).into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Register a payment against an invoice.
    ///
    /// Applied immediately unless the company requires confirmation, in which
    /// case it stays pending until [`confirm_payment`](Self::confirm_payment).
    pub fn process_payment(
        &self,
        invoice_id: InvoiceId,
        amount: Decimal,
        method: &str,
        notes: Option<String>,
    ) -> BillingResult<Invoice> {
        let payment_id = PaymentId::new();
        let invoice = self.mutate(invoice_id, |settings, now| {
            InvoiceCommand::RegisterPayment(RegisterPayment {
                invoice_id,
                payment_id,
                amount,
                method: method.to_string(),
                notes: notes.clone(),
                allow_partial: settings.allow_partial_payments,
                require_confirmation: settings.require_payment_confirmation,
                occurred_at: now,
            })
        })?;
        info!(
            invoice_id = %invoice_id,
            payment_id = %payment_id,
            amount = %amount,
            paid = %invoice.paid_amount(),
            status = %invoice.status(),
            "payment processed"
        );
        Ok(invoice)
    }

    pub fn confirm_payment(
        &self,
        invoice_id: InvoiceId,
        payment_id: PaymentId,
    ) -> BillingResult<Invoice> {
        let invoice = self.mutate(invoice_id, |_, now| {
            InvoiceCommand::ConfirmPayment(ConfirmPayment {
                invoice_id,
                payment_id,
                occurred_at: now,
            })
        })?;
        info!(
            invoice_id = %invoice_id,
            payment_id = %payment_id,
            status = %invoice.status(),
            "payment confirmed"
        );
        Ok(invoice)
    }

    pub fn reject_payment(
        &self,
        invoice_id: InvoiceId,
        payment_id: PaymentId,
        reason: Option<String>,
    ) -> BillingResult<Invoice> {
        let invoice = self.mutate(invoice_id, |_, now| {
            InvoiceCommand::RejectPayment(RejectPayment {
                invoice_id,
                payment_id,
                reason: reason.clone(),
                occurred_at: now,
            })
        })?;
        info!(invoice_id = %invoice_id, payment_id = %payment_id, "payment rejected");
        Ok(invoice)
    }

    /// Flag an unpaid invoice whose due date is before `today`.
    pub fn mark_overdue(&self, invoice_id: InvoiceId, today: NaiveDate) -> BillingResult<Invoice> {
        let invoice = self.mutate(invoice_id, |_, now| {
            InvoiceCommand::MarkOverdue(MarkOverdue {
                invoice_id,
                today,
                occurred_at: now,
            })
        })?;
        info!(
            invoice_id = %invoice_id,
            number = %invoice.number(),
            outstanding = %invoice.balance(),
            "invoice marked overdue"
        );
        Ok(invoice)
    }

    pub fn cancel_invoice(&self, invoice_id: InvoiceId, reason: &str) -> BillingResult<Invoice> {
        let invoice = self.mutate(invoice_id, |_, now| {
            InvoiceCommand::CancelInvoice(CancelInvoice {
                invoice_id,
                reason: reason.to_string(),
                occurred_at: now,
            })
        })?;
        info!(invoice_id = %invoice_id, reason, "invoice cancelled");
        Ok(invoice)
    }

    pub fn get_invoice(&self, invoice_id: InvoiceId) -> BillingResult<Invoice> {
        self.load(invoice_id)
    }

    pub fn audit_trail(&self, invoice_id: InvoiceId) -> BillingResult<Vec<AuditRecord>> {
        self.load(invoice_id)?;
        Ok(self.invoices.audit_trail(invoice_id)?)
    }

    fn load(&self, invoice_id: InvoiceId) -> BillingResult<Invoice> {
        self.invoices
            .get(invoice_id)?
            .ok_or_else(|| BillingError::not_found(format!("invoice {invoice_id}")))
    }

    /// Run one command against the latest stored invoice, retrying on
    /// version conflicts up to the configured limit.
    fn mutate(
        &self,
        invoice_id: InvoiceId,
        build: impl Fn(&BillingSettings, DateTime<Utc>) -> InvoiceCommand,
    ) -> BillingResult<Invoice> {
        for attempt in 1..=self.retry_limit {
            let mut invoice = self.load(invoice_id)?;
            let settings = self.settings.get_or_create(invoice.company_id())?;
            let expected = ExpectedVersion::Exact(invoice.version());

            let command = build(&settings, self.clock.now());
            let events = invoice.execute(&command)?;

            match self.invoices.update(&invoice, &events, expected) {
                Ok(()) => return Ok(invoice),
                Err(StoreError::Conflict(msg)) => {
                    debug!(invoice_id = %invoice_id, attempt, %msg, "stale invoice, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(invoice_id = %invoice_id, attempts = self.retry_limit, "invoice update kept conflicting");
        Err(BillingError::DependencyFailure(format!(
            "invoice {invoice_id} changed concurrently {} times in a row",
            self.retry_limit
        )))
    }
}

fn already_invoiced(existing: &Invoice) -> GenerationOutcome {
    GenerationOutcome::AlreadyInvoiced {
        invoice_id: existing.id_typed(),
        number: existing.number().to_string(),
    }
}

fn due_date(settings: &BillingSettings, issue_date: NaiveDate) -> BillingResult<NaiveDate> {
    issue_date
        .checked_add_days(Days::new(u64::from(settings.invoice_payment_term_days)))
        .ok_or_else(|| {
            BillingError::invalid_input(format!(
                "payment term of {} days from {issue_date} is out of range",
                settings.invoice_payment_term_days
            ))
        })
}
