//! Notification planning.
//!
//! Works out which reminders a company's notifier should be sending on a
//! given day. Delivery lives outside the engine. A lead time of zero days
//! turns the corresponding reminder off.

use std::sync::Arc;

use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use forgebill_core::{CompanyId, InvoiceId};
use forgebill_invoicing::{Invoice, InvoiceStatus};

use crate::error::{BillingError, BillingResult};
use crate::services::settings::SettingsProvider;
use crate::store::{InvoiceFilter, InvoiceStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// The monthly invoice run is coming up.
    UpcomingInvoiceRun,
    PaymentDueSoon,
    PaymentOverdue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedNotification {
    pub company_id: CompanyId,
    pub kind: NotificationKind,
    pub invoice_id: Option<InvoiceId>,
    pub invoice_number: Option<String>,
    /// Generation date for run reminders, due date for payment reminders.
    pub reference_date: NaiveDate,
}

#[derive(Clone)]
pub struct NotificationPlanner {
    invoices: Arc<dyn InvoiceStore>,
    settings: SettingsProvider,
}

impl NotificationPlanner {
    pub fn new(invoices: Arc<dyn InvoiceStore>, settings: SettingsProvider) -> Self {
        Self { invoices, settings }
    }

    /// Reminders whose window contains `today`.
    ///
    /// * run reminder: `lead` days before the next generation day, up to the day before it
    /// * due soon: from `lead` days before the due date through the due date
    /// * overdue: from `lead` days after the due date while the invoice is unpaid
    pub fn pending_notifications(
        &self,
        company_id: CompanyId,
        today: NaiveDate,
    ) -> BillingResult<Vec<PlannedNotification>> {
        let settings = self.settings.get_or_create(company_id)?;
        let mut planned = Vec::new();

        if settings.auto_generate_invoices && settings.notify_before_invoice_days > 0 {
            let run = next_generation_date(today, settings.invoice_generation_day)?;
            let from = sub_days(run, settings.notify_before_invoice_days)?;
            if from <= today && today < run {
                planned.push(PlannedNotification {
                    company_id,
                    kind: NotificationKind::UpcomingInvoiceRun,
                    invoice_id: None,
                    invoice_number: None,
                    reference_date: run,
                });
            }
        }

        let unpaid = self.invoices.list(&InvoiceFilter::for_company(company_id).with_statuses([
            InvoiceStatus::Issued,
            InvoiceStatus::PartiallyPaid,
            InvoiceStatus::Overdue,
        ]))?;

        for invoice in &unpaid {
            let Some(due) = invoice.due_date() else {
                continue;
            };

            if settings.notify_before_due_days > 0 && today <= due {
                let from = sub_days(due, settings.notify_before_due_days)?;
                if from <= today {
                    planned.push(invoice_notification(invoice, NotificationKind::PaymentDueSoon, due));
                }
            }

            if settings.notify_after_overdue_days > 0 && today > due {
                let from = add_days(due, settings.notify_after_overdue_days)?;
                if from <= today {
                    planned.push(invoice_notification(invoice, NotificationKind::PaymentOverdue, due));
                }
            }
        }

        Ok(planned)
    }
}

fn invoice_notification(
    invoice: &Invoice,
    kind: NotificationKind,
    reference_date: NaiveDate,
) -> PlannedNotification {
    PlannedNotification {
        company_id: invoice.company_id(),
        kind,
        invoice_id: Some(invoice.id_typed()),
        invoice_number: Some(invoice.number().to_string()),
        reference_date,
    }
}

/// First date on or after `today` falling on `day` of its month.
fn next_generation_date(today: NaiveDate, day: u32) -> BillingResult<NaiveDate> {
    let this_month = today.with_day(day);
    match this_month {
        Some(date) if date >= today => Ok(date),
        _ => today
            .with_day(1)
            .and_then(|first| first.checked_add_months(Months::new(1)))
            .and_then(|next| next.with_day(day))
            .ok_or_else(|| out_of_range(today)),
    }
}

fn sub_days(date: NaiveDate, days: u32) -> BillingResult<NaiveDate> {
    date.checked_sub_days(Days::new(u64::from(days)))
        .ok_or_else(|| out_of_range(date))
}

fn add_days(date: NaiveDate, days: u32) -> BillingResult<NaiveDate> {
    date.checked_add_days(Days::new(u64::from(days)))
        .ok_or_else(|| out_of_range(date))
}

fn out_of_range(date: NaiveDate) -> BillingError {
    BillingError::invalid_input(format!("date arithmetic around {date} is out of range"))
}
