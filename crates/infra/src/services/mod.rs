//! Application services composing domain logic with the storage seams.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use forgebill_billing::BillingPeriod;
use forgebill_core::{BatchRunId, CompanyId, ContractId, Currency, InvoiceId};
use forgebill_invoicing::{Invoice, InvoiceStatus, Payment};

use crate::error::{BillingError, ErrorKind};

pub mod automation;
pub mod calculation;
pub mod lifecycle;
pub mod notifications;
pub mod settings;
pub mod subscriptions;

pub use automation::{BillingAutomationService, BillingStatistics, DailyRun, StatusTotals};
pub use calculation::BillingCalculationService;
pub use lifecycle::{GenerationOutcome, InvoiceLifecycleManager};
pub use notifications::{NotificationKind, NotificationPlanner, PlannedNotification};
pub use settings::SettingsProvider;
pub use subscriptions::SubscriptionService;

/// Flat view of an invoice for batch results and history listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceSummary {
    pub invoice_id: InvoiceId,
    pub number: String,
    pub company_id: CompanyId,
    pub contract_id: ContractId,
    pub period: Option<BillingPeriod>,
    pub status: InvoiceStatus,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub currency: Currency,
    pub total: Decimal,
    pub paid_amount: Decimal,
    pub balance: Decimal,
}

impl From<&Invoice> for InvoiceSummary {
    fn from(invoice: &Invoice) -> Self {
        Self {
            invoice_id: invoice.id_typed(),
            number: invoice.number().to_string(),
            company_id: invoice.company_id(),
            contract_id: invoice.contract_id(),
            period: invoice.period(),
            status: invoice.status(),
            issue_date: invoice.issue_date(),
            due_date: invoice.due_date(),
            currency: invoice.currency().clone(),
            total: invoice.total(),
            paid_amount: invoice.paid_amount(),
            balance: invoice.balance(),
        }
    }
}

/// One billing history line: the invoice and every payment submitted
/// against it, pending and rejected ones included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingHistoryEntry {
    #[serde(flatten)]
    pub invoice: InvoiceSummary,
    pub payments: Vec<Payment>,
}

impl From<&Invoice> for BillingHistoryEntry {
    fn from(invoice: &Invoice) -> Self {
        Self {
            invoice: InvoiceSummary::from(invoice),
            payments: invoice.payments().to_vec(),
        }
    }
}

/// An item a batch run deliberately left alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedItem {
    pub subject: String,
    pub reason: String,
}

/// An item a batch run failed on; the run continued past it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    pub subject: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Per-item outcomes of one batch operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary<T> {
    pub run_id: BatchRunId,
    pub operation: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub succeeded: Vec<T>,
    pub skipped: Vec<SkippedItem>,
    pub failed: Vec<FailedItem>,
}

impl<T> BatchSummary<T> {
    pub fn start(operation: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: BatchRunId::new(),
            operation: operation.to_string(),
            started_at,
            finished_at: started_at,
            succeeded: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn processed(&self) -> usize {
        self.succeeded.len() + self.skipped.len() + self.failed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn skip(&mut self, subject: impl Into<String>, reason: impl Into<String>) {
        self.skipped.push(SkippedItem {
            subject: subject.into(),
            reason: reason.into(),
        });
    }

    fn fail(&mut self, subject: impl Into<String>, error: &BillingError) {
        self.failed.push(FailedItem {
            subject: subject.into(),
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    fn finish(mut self, finished_at: DateTime<Utc>) -> Self {
        self.finished_at = finished_at;
        tracing::info!(
            run_id = %self.run_id,
            operation = %self.operation,
            succeeded = self.succeeded.len(),
            skipped = self.skipped.len(),
            failed = self.failed.len(),
            "batch run finished"
        );
        self
    }
}
