use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use forgebill_billing::{BillingPeriod, LineItem};
use forgebill_core::{
    Aggregate, AggregateRoot, CompanyId, ContractId, Currency, DomainError, DomainResult,
    InvoiceId, PaymentId,
};

use crate::payment::{Payment, PaymentStatus};

/// Invoice status lifecycle.
///
/// `draft -> issued -> {partially_paid -> paid | overdue} -> cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Issued,
    PartiallyPaid,
    Paid,
    Overdue,
    Cancelled,
}

/// Inputs to the central status transition function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTransition {
    Issue,
    PartialPayment,
    FullPayment,
    MarkOverdue,
    Cancel,
}

impl InvoiceStatus {
    pub const ALL: [InvoiceStatus; 6] = [
        InvoiceStatus::Draft,
        InvoiceStatus::Issued,
        InvoiceStatus::PartiallyPaid,
        InvoiceStatus::Paid,
        InvoiceStatus::Overdue,
        InvoiceStatus::Cancelled,
    ];

    /// The single place where invoice status changes are decided.
    pub fn transition(self, transition: StatusTransition) -> DomainResult<InvoiceStatus> {
        use InvoiceStatus::*;
        use StatusTransition as T;

        let next = match (self, transition) {
            (Draft, T::Issue) => Issued,
            (Issued | PartiallyPaid, T::PartialPayment) => PartiallyPaid,
            (Overdue, T::PartialPayment) => Overdue,
            (Issued | PartiallyPaid | Overdue, T::FullPayment) => Paid,
            (Issued | PartiallyPaid, T::MarkOverdue) => Overdue,
            (Draft | Issued | Overdue, T::Cancel) => Cancelled,
            (from, t) => {
                return Err(DomainError::invalid_transition(format!(
                    "{t:?} is not allowed from status {}",
                    from.as_str()
                )));
            }
        };
        Ok(next)
    }

    /// True while the invoice can still receive money.
    pub fn is_open(self) -> bool {
        matches!(
            self,
            InvoiceStatus::Issued | InvoiceStatus::PartiallyPaid | InvoiceStatus::Overdue
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Issued => "issued",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invoice line copied from a billing calculation line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub line_no: u32,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total: Decimal,
}

impl InvoiceItem {
    pub fn from_line(line_no: u32, line: &LineItem) -> Self {
        Self {
            line_no,
            description: line.description.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            total: line.subtotal,
        }
    }
}

/// Aggregate root: Invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    id: InvoiceId,
    company_id: CompanyId,
    contract_id: ContractId,
    number: String,
    sequence: u64,
    period: Option<BillingPeriod>,
    currency: Currency,
    tax_rate: Decimal,
    tax_included: bool,
    subtotal: Decimal,
    tax: Decimal,
    total: Decimal,
    paid_amount: Decimal,
    status: InvoiceStatus,
    issue_date: Option<NaiveDate>,
    due_date: Option<NaiveDate>,
    items: Vec<InvoiceItem>,
    payments: Vec<Payment>,
    cancellation_reason: Option<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Invoice {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: InvoiceId) -> Self {
        Self {
            id,
            company_id: CompanyId::new(0),
            contract_id: ContractId::new(0),
            number: String::new(),
            sequence: 0,
            period: None,
            currency: Currency::usd(),
            tax_rate: Decimal::ZERO,
            tax_included: false,
            subtotal: Decimal::ZERO,
            tax: Decimal::ZERO,
            total: Decimal::ZERO,
            paid_amount: Decimal::ZERO,
            status: InvoiceStatus::Draft,
            issue_date: None,
            due_date: None,
            items: Vec::new(),
            payments: Vec::new(),
            cancellation_reason: None,
            created_at: None,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn company_id(&self) -> CompanyId {
        self.company_id
    }

    pub fn contract_id(&self) -> ContractId {
        self.contract_id
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn period(&self) -> Option<BillingPeriod> {
        self.period
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn tax_rate(&self) -> Decimal {
        self.tax_rate
    }

    pub fn tax_included(&self) -> bool {
        self.tax_included
    }

    pub fn subtotal(&self) -> Decimal {
        self.subtotal
    }

    pub fn tax(&self) -> Decimal {
        self.tax
    }

    pub fn total(&self) -> Decimal {
        self.total
    }

    pub fn paid_amount(&self) -> Decimal {
        self.paid_amount
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn issue_date(&self) -> Option<NaiveDate> {
        self.issue_date
    }

    pub fn due_date(&self) -> Option<NaiveDate> {
        self.due_date
    }

    pub fn items(&self) -> &[InvoiceItem] {
        &self.items
    }

    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Sum of payments recorded but not yet confirmed.
    pub fn pending_amount(&self) -> Decimal {
        self.payments
            .iter()
            .filter(|p| p.is_pending())
            .map(|p| p.amount)
            .sum()
    }

    /// Amount still owed, ignoring pending payments.
    pub fn balance(&self) -> Decimal {
        self.total - self.paid_amount
    }

    /// Amount a new payment may still cover.
    pub fn remaining(&self) -> Decimal {
        self.total - self.paid_amount - self.pending_amount()
    }

    /// Cancelled invoices no longer occupy their contract period.
    pub fn is_live(&self) -> bool {
        self.created && self.status != InvoiceStatus::Cancelled
    }

    /// Unpaid and not yet past its due date.
    pub fn is_within_payment_term(&self, today: NaiveDate) -> bool {
        matches!(self.status, InvoiceStatus::Issued | InvoiceStatus::PartiallyPaid)
            && self.due_date.is_some_and(|due| today <= due)
    }

    /// Open and past its due date (`today > due_date`).
    pub fn is_past_due(&self, today: NaiveDate) -> bool {
        matches!(self.status, InvoiceStatus::Issued | InvoiceStatus::PartiallyPaid)
            && self.due_date.is_some_and(|due| today > due)
    }

    /// Verify the amount/status invariants of a created invoice.
    pub fn check_invariants(&self) -> DomainResult<()> {
        if !self.created {
            return Ok(());
        }
        if self.paid_amount < Decimal::ZERO || self.paid_amount > self.total {
            return Err(DomainError::invariant(format!(
                "invoice {}: paid {} outside 0..={}",
                self.number, self.paid_amount, self.total
            )));
        }
        if self.subtotal + self.tax != self.total {
            return Err(DomainError::invariant(format!(
                "invoice {}: subtotal {} + tax {} != total {}",
                self.number, self.subtotal, self.tax, self.total
            )));
        }

        let confirmed: Decimal = self
            .payments
            .iter()
            .filter(|p| p.is_confirmed())
            .map(|p| p.amount)
            .sum();
        if confirmed != self.paid_amount {
            return Err(DomainError::invariant(format!(
                "invoice {}: paid {} != confirmed payments {confirmed}",
                self.number, self.paid_amount
            )));
        }

        let items: Decimal = self.items.iter().map(|i| i.total).sum();
        let expected = if self.tax_included { self.total } else { self.subtotal };
        if items != expected {
            return Err(DomainError::invariant(format!(
                "invoice {}: items sum {items} != {expected}",
                self.number
            )));
        }

        let consistent = match self.status {
            InvoiceStatus::Paid => self.paid_amount == self.total,
            InvoiceStatus::PartiallyPaid => {
                self.paid_amount > Decimal::ZERO && self.paid_amount < self.total
            }
            InvoiceStatus::Overdue => self.paid_amount < self.total,
            InvoiceStatus::Draft | InvoiceStatus::Issued | InvoiceStatus::Cancelled => {
                self.paid_amount.is_zero()
            }
        };
        if !consistent {
            return Err(DomainError::invariant(format!(
                "invoice {}: status {} inconsistent with paid {} of {}",
                self.number, self.status, self.paid_amount, self.total
            )));
        }
        Ok(())
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateDraft (priced invoice, not yet sent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDraft {
    pub invoice_id: InvoiceId,
    pub company_id: CompanyId,
    pub contract_id: ContractId,
    pub number: String,
    pub sequence: u64,
    pub period: BillingPeriod,
    pub currency: Currency,
    pub tax_rate: Decimal,
    pub tax_included: bool,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub items: Vec<InvoiceItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: IssueInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueInvoice {
    pub invoice_id: InvoiceId,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RegisterPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPayment {
    pub invoice_id: InvoiceId,
    pub payment_id: PaymentId,
    pub amount: Decimal,
    pub method: String,
    pub notes: Option<String>,
    /// Company setting: accept amounts smaller than the balance.
    pub allow_partial: bool,
    /// Company setting: record as pending until confirmed.
    pub require_confirmation: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmPayment {
    pub invoice_id: InvoiceId,
    pub payment_id: PaymentId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectPayment {
    pub invoice_id: InvoiceId,
    pub payment_id: PaymentId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkOverdue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkOverdue {
    pub invoice_id: InvoiceId,
    pub today: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelInvoice {
    pub invoice_id: InvoiceId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    CreateDraft(CreateDraft),
    IssueInvoice(IssueInvoice),
    RegisterPayment(RegisterPayment),
    ConfirmPayment(ConfirmPayment),
    RejectPayment(RejectPayment),
    MarkOverdue(MarkOverdue),
    CancelInvoice(CancelInvoice),
}

/// Event: InvoiceDrafted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceDrafted {
    pub invoice_id: InvoiceId,
    pub company_id: CompanyId,
    pub contract_id: ContractId,
    pub number: String,
    pub sequence: u64,
    pub period: BillingPeriod,
    pub currency: Currency,
    pub tax_rate: Decimal,
    pub tax_included: bool,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub items: Vec<InvoiceItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceIssued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceIssued {
    pub invoice_id: InvoiceId,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentReceived (recorded as pending).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceived {
    pub invoice_id: InvoiceId,
    pub payment_id: PaymentId,
    pub amount: Decimal,
    pub method: String,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentApplied (counts towards `paid_amount`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentApplied {
    pub invoice_id: InvoiceId,
    pub payment_id: PaymentId,
    pub amount: Decimal,
    pub new_paid_amount: Decimal,
    pub status: InvoiceStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRejected {
    pub invoice_id: InvoiceId,
    pub payment_id: PaymentId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceMarkedOverdue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceMarkedOverdue {
    pub invoice_id: InvoiceId,
    pub due_date: NaiveDate,
    pub outstanding: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCancelled {
    pub invoice_id: InvoiceId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    InvoiceDrafted(InvoiceDrafted),
    InvoiceIssued(InvoiceIssued),
    PaymentReceived(PaymentReceived),
    PaymentApplied(PaymentApplied),
    PaymentRejected(PaymentRejected),
    InvoiceMarkedOverdue(InvoiceMarkedOverdue),
    InvoiceCancelled(InvoiceCancelled),
}

impl InvoiceEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::InvoiceDrafted(_) => "invoicing.invoice.drafted",
            InvoiceEvent::InvoiceIssued(_) => "invoicing.invoice.issued",
            InvoiceEvent::PaymentReceived(_) => "invoicing.invoice.payment_received",
            InvoiceEvent::PaymentApplied(_) => "invoicing.invoice.payment_applied",
            InvoiceEvent::PaymentRejected(_) => "invoicing.invoice.payment_rejected",
            InvoiceEvent::InvoiceMarkedOverdue(_) => "invoicing.invoice.marked_overdue",
            InvoiceEvent::InvoiceCancelled(_) => "invoicing.invoice.cancelled",
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::InvoiceDrafted(e) => e.occurred_at,
            InvoiceEvent::InvoiceIssued(e) => e.occurred_at,
            InvoiceEvent::PaymentReceived(e) => e.occurred_at,
            InvoiceEvent::PaymentApplied(e) => e.occurred_at,
            InvoiceEvent::PaymentRejected(e) => e.occurred_at,
            InvoiceEvent::InvoiceMarkedOverdue(e) => e.occurred_at,
            InvoiceEvent::InvoiceCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Invoice {
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::InvoiceDrafted(e) => {
                self.id = e.invoice_id;
                self.company_id = e.company_id;
                self.contract_id = e.contract_id;
                self.number = e.number.clone();
                self.sequence = e.sequence;
                self.period = Some(e.period);
                self.currency = e.currency.clone();
                self.tax_rate = e.tax_rate;
                self.tax_included = e.tax_included;
                self.subtotal = e.subtotal;
                self.tax = e.tax;
                self.total = e.total;
                self.items = e.items.clone();
                self.paid_amount = Decimal::ZERO;
                self.status = InvoiceStatus::Draft;
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            InvoiceEvent::InvoiceIssued(e) => {
                self.issue_date = Some(e.issue_date);
                self.due_date = Some(e.due_date);
                self.status = InvoiceStatus::Issued;
            }
            InvoiceEvent::PaymentReceived(e) => {
                self.payments.push(Payment {
                    id: e.payment_id,
                    amount: e.amount,
                    method: e.method.clone(),
                    notes: e.notes.clone(),
                    status: PaymentStatus::Pending,
                    received_at: e.occurred_at,
                    settled_at: None,
                });
            }
            InvoiceEvent::PaymentApplied(e) => {
                if let Some(p) = self.payments.iter_mut().find(|p| p.id == e.payment_id) {
                    p.status = PaymentStatus::Confirmed;
                    p.settled_at = Some(e.occurred_at);
                }
                self.paid_amount = e.new_paid_amount;
                self.status = e.status;
            }
            InvoiceEvent::PaymentRejected(e) => {
                if let Some(p) = self.payments.iter_mut().find(|p| p.id == e.payment_id) {
                    p.status = PaymentStatus::Rejected;
                    p.settled_at = Some(e.occurred_at);
                }
            }
            InvoiceEvent::InvoiceMarkedOverdue(_) => {
                self.status = InvoiceStatus::Overdue;
            }
            InvoiceEvent::InvoiceCancelled(e) => {
                self.status = InvoiceStatus::Cancelled;
                self.cancellation_reason = Some(e.reason.clone());
            }
        }

        self.updated_at = Some(event.occurred_at());
        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::CreateDraft(cmd) => self.handle_create_draft(cmd),
            InvoiceCommand::IssueInvoice(cmd) => self.handle_issue(cmd),
            InvoiceCommand::RegisterPayment(cmd) => self.handle_register_payment(cmd),
            InvoiceCommand::ConfirmPayment(cmd) => self.handle_confirm_payment(cmd),
            InvoiceCommand::RejectPayment(cmd) => self.handle_reject_payment(cmd),
            InvoiceCommand::MarkOverdue(cmd) => self.handle_mark_overdue(cmd),
            InvoiceCommand::CancelInvoice(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Invoice {
    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("invoice {}", self.id)));
        }
        Ok(())
    }

    fn ensure_invoice_id(&self, invoice_id: InvoiceId) -> Result<(), DomainError> {
        if self.id != invoice_id {
            return Err(DomainError::invariant("invoice_id mismatch"));
        }
        Ok(())
    }

    fn payment_status_after(&self, new_paid: Decimal) -> DomainResult<InvoiceStatus> {
        let transition = if new_paid == self.total {
            StatusTransition::FullPayment
        } else {
            StatusTransition::PartialPayment
        };
        self.status.transition(transition)
    }

    fn handle_create_draft(&self, cmd: &CreateDraft) -> Result<Vec<InvoiceEvent>, DomainError> {
        if self.created {
            return Err(DomainError::already_exists(format!("invoice {}", cmd.invoice_id)));
        }
        if cmd.number.trim().is_empty() {
            return Err(DomainError::validation("invoice number is required"));
        }
        if cmd.items.is_empty() {
            return Err(DomainError::validation(
                "cannot create invoice without items",
            ));
        }
        for item in &cmd.items {
            if item.quantity <= Decimal::ZERO {
                return Err(DomainError::validation(
                    "invoice item quantity must be positive",
                ));
            }
            if item.total < Decimal::ZERO || item.unit_price < Decimal::ZERO {
                return Err(DomainError::validation(
                    "invoice item amounts must not be negative",
                ));
            }
        }
        if cmd.subtotal < Decimal::ZERO || cmd.tax < Decimal::ZERO {
            return Err(DomainError::validation("invoice amounts must not be negative"));
        }
        if cmd.subtotal + cmd.tax != cmd.total {
            return Err(DomainError::invariant("invoice total must equal subtotal + tax"));
        }
        if cmd.total <= Decimal::ZERO {
            return Err(DomainError::validation("invoice total must be positive"));
        }
        let items: Decimal = cmd.items.iter().map(|i| i.total).sum();
        let expected = if cmd.tax_included { cmd.total } else { cmd.subtotal };
        if items != expected {
            return Err(DomainError::invariant(format!(
                "invoice items sum {items} does not match {expected}"
            )));
        }

        Ok(vec![InvoiceEvent::InvoiceDrafted(InvoiceDrafted {
            invoice_id: cmd.invoice_id,
            company_id: cmd.company_id,
            contract_id: cmd.contract_id,
            number: cmd.number.trim().to_string(),
            sequence: cmd.sequence,
            period: cmd.period,
            currency: cmd.currency.clone(),
            tax_rate: cmd.tax_rate,
            tax_included: cmd.tax_included,
            subtotal: cmd.subtotal,
            tax: cmd.tax,
            total: cmd.total,
            items: cmd.items.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_issue(&self, cmd: &IssueInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_invoice_id(cmd.invoice_id)?;
        self.status.transition(StatusTransition::Issue)?;

        if cmd.due_date < cmd.issue_date {
            return Err(DomainError::validation("due date precedes issue date"));
        }

        Ok(vec![InvoiceEvent::InvoiceIssued(InvoiceIssued {
            invoice_id: cmd.invoice_id,
            issue_date: cmd.issue_date,
            due_date: cmd.due_date,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_register_payment(
        &self,
        cmd: &RegisterPayment,
    ) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_invoice_id(cmd.invoice_id)?;

        if cmd.amount <= Decimal::ZERO {
            return Err(DomainError::validation("payment amount must be positive"));
        }
        if cmd.method.trim().is_empty() {
            return Err(DomainError::validation("payment method is required"));
        }
        if !self.status.is_open() {
            return Err(DomainError::invalid_transition(format!(
                "invoice {} in status {} does not accept payments",
                self.number, self.status
            )));
        }
        if self.payments.iter().any(|p| p.id == cmd.payment_id) {
            return Err(DomainError::already_exists(format!("payment {}", cmd.payment_id)));
        }

        let remaining = self.remaining();
        if cmd.amount > remaining {
            return Err(DomainError::invalid_transition(format!(
                "payment {} exceeds remaining balance {remaining}",
                cmd.amount
            )));
        }
        if !cmd.allow_partial && cmd.amount != remaining {
            return Err(DomainError::invalid_transition(format!(
                "partial payments are not allowed; payment must equal {remaining}"
            )));
        }

        let mut events = vec![InvoiceEvent::PaymentReceived(PaymentReceived {
            invoice_id: cmd.invoice_id,
            payment_id: cmd.payment_id,
            amount: cmd.amount,
            method: cmd.method.trim().to_string(),
            notes: cmd.notes.clone(),
            occurred_at: cmd.occurred_at,
        })];

        if !cmd.require_confirmation {
            let new_paid_amount = self.paid_amount + cmd.amount;
            events.push(InvoiceEvent::PaymentApplied(PaymentApplied {
                invoice_id: cmd.invoice_id,
                payment_id: cmd.payment_id,
                amount: cmd.amount,
                new_paid_amount,
                status: self.payment_status_after(new_paid_amount)?,
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }

    fn pending_payment(&self, payment_id: PaymentId) -> DomainResult<&Payment> {
        let payment = self
            .payments
            .iter()
            .find(|p| p.id == payment_id)
            .ok_or_else(|| DomainError::not_found(format!("payment {payment_id}")))?;
        if !payment.is_pending() {
            return Err(DomainError::invalid_transition(format!(
                "payment {payment_id} is already {:?}",
                payment.status
            )));
        }
        Ok(payment)
    }

    fn handle_confirm_payment(
        &self,
        cmd: &ConfirmPayment,
    ) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_invoice_id(cmd.invoice_id)?;
        let payment = self.pending_payment(cmd.payment_id)?;

        let new_paid_amount = self.paid_amount + payment.amount;
        if new_paid_amount > self.total {
            return Err(DomainError::invalid_transition("confirming would overpay invoice"));
        }

        Ok(vec![InvoiceEvent::PaymentApplied(PaymentApplied {
            invoice_id: cmd.invoice_id,
            payment_id: cmd.payment_id,
            amount: payment.amount,
            new_paid_amount,
            status: self.payment_status_after(new_paid_amount)?,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject_payment(&self, cmd: &RejectPayment) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_invoice_id(cmd.invoice_id)?;
        self.pending_payment(cmd.payment_id)?;

        Ok(vec![InvoiceEvent::PaymentRejected(PaymentRejected {
            invoice_id: cmd.invoice_id,
            payment_id: cmd.payment_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_overdue(&self, cmd: &MarkOverdue) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_invoice_id(cmd.invoice_id)?;
        self.status.transition(StatusTransition::MarkOverdue)?;

        let due_date = self
            .due_date
            .ok_or_else(|| DomainError::invariant("issued invoice without due date"))?;
        if cmd.today <= due_date {
            return Err(DomainError::invalid_transition(format!(
                "invoice {} is not due until {due_date}",
                self.number
            )));
        }

        Ok(vec![InvoiceEvent::InvoiceMarkedOverdue(InvoiceMarkedOverdue {
            invoice_id: cmd.invoice_id,
            due_date,
            outstanding: self.balance(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_invoice_id(cmd.invoice_id)?;

        if self.paid_amount > Decimal::ZERO {
            return Err(DomainError::invalid_transition(format!(
                "invoice {} has {} applied and cannot be cancelled",
                self.number, self.paid_amount
            )));
        }
        if self.payments.iter().any(Payment::is_pending) {
            return Err(DomainError::invalid_transition(format!(
                "invoice {} has pending payments",
                self.number
            )));
        }
        self.status.transition(StatusTransition::Cancel)?;

        let reason = cmd.reason.trim();
        if reason.is_empty() {
            return Err(DomainError::validation("cancellation reason is required"));
        }

        Ok(vec![InvoiceEvent::InvoiceCancelled(InvoiceCancelled {
            invoice_id: cmd.invoice_id,
            reason: reason.to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn test_invoice_id() -> InvoiceId {
        InvoiceId::new(1)
    }

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 1, 8, 0, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn test_draft(subtotal: Decimal, tax: Decimal) -> CreateDraft {
        CreateDraft {
            invoice_id: test_invoice_id(),
            company_id: CompanyId::new(1),
            contract_id: ContractId::new(7),
            number: "INV-0001".to_string(),
            sequence: 1,
            period: BillingPeriod::calendar_month(2025, 1).unwrap(),
            currency: Currency::usd(),
            tax_rate: dec!(0.20),
            tax_included: false,
            subtotal,
            tax,
            total: subtotal + tax,
            items: vec![InvoiceItem {
                line_no: 1,
                description: "Base fee: Fleet (full period)".to_string(),
                quantity: Decimal::ONE,
                unit_price: subtotal,
                total: subtotal,
            }],
            occurred_at: test_time(),
        }
    }

    fn issued_invoice(subtotal: Decimal, tax: Decimal) -> Invoice {
        let mut invoice = Invoice::empty(test_invoice_id());
        invoice
            .execute(&InvoiceCommand::CreateDraft(test_draft(subtotal, tax)))
            .unwrap();
        invoice
            .execute(&InvoiceCommand::IssueInvoice(IssueInvoice {
                invoice_id: test_invoice_id(),
                issue_date: date(2025, 2, 1),
                due_date: date(2025, 2, 15),
                occurred_at: test_time(),
            }))
            .unwrap();
        invoice
    }

    fn pay(amount: Decimal, allow_partial: bool, require_confirmation: bool) -> InvoiceCommand {
        InvoiceCommand::RegisterPayment(RegisterPayment {
            invoice_id: test_invoice_id(),
            payment_id: PaymentId::new(),
            amount,
            method: "bank_transfer".to_string(),
            notes: None,
            allow_partial,
            require_confirmation,
            occurred_at: test_time(),
        })
    }

    fn overdue(today: NaiveDate) -> InvoiceCommand {
        InvoiceCommand::MarkOverdue(MarkOverdue {
            invoice_id: test_invoice_id(),
            today,
            occurred_at: test_time(),
        })
    }

    fn cancel() -> InvoiceCommand {
        InvoiceCommand::CancelInvoice(CancelInvoice {
            invoice_id: test_invoice_id(),
            reason: "duplicate".to_string(),
            occurred_at: test_time(),
        })
    }

    #[test]
    fn transition_table() {
        use InvoiceStatus::*;
        use StatusTransition as T;

        assert_eq!(Draft.transition(T::Issue).unwrap(), Issued);
        assert_eq!(Issued.transition(T::PartialPayment).unwrap(), PartiallyPaid);
        assert_eq!(Overdue.transition(T::PartialPayment).unwrap(), Overdue);
        assert_eq!(Overdue.transition(T::FullPayment).unwrap(), Paid);
        assert_eq!(PartiallyPaid.transition(T::MarkOverdue).unwrap(), Overdue);
        assert_eq!(Overdue.transition(T::Cancel).unwrap(), Cancelled);

        assert!(Paid.transition(T::PartialPayment).is_err());
        assert!(Paid.transition(T::Cancel).is_err());
        assert!(Cancelled.transition(T::FullPayment).is_err());
        assert!(Draft.transition(T::FullPayment).is_err());
        assert!(Issued.transition(T::Issue).is_err());
        assert!(Overdue.transition(T::MarkOverdue).is_err());
    }

    #[test]
    fn draft_then_issue_sets_dates() {
        let invoice = issued_invoice(dec!(1000), dec!(200));
        assert_eq!(invoice.status(), InvoiceStatus::Issued);
        assert_eq!(invoice.total(), dec!(1200));
        assert_eq!(invoice.due_date(), Some(date(2025, 2, 15)));
        assert_eq!(invoice.version(), 2);
        invoice.check_invariants().unwrap();
    }

    #[test]
    fn draft_without_items_is_rejected() {
        let mut cmd = test_draft(dec!(10), dec!(2));
        cmd.items.clear();
        let err = Invoice::empty(test_invoice_id())
            .handle(&InvoiceCommand::CreateDraft(cmd))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn full_payment_marks_paid_and_blocks_further_payments() {
        let mut invoice = issued_invoice(dec!(1000), dec!(200));
        let events = invoice.execute(&pay(dec!(1200), true, false)).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(invoice.status(), InvoiceStatus::Paid);
        assert_eq!(invoice.paid_amount(), dec!(1200));

        let err = invoice.handle(&pay(dec!(1), true, false)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
        invoice.check_invariants().unwrap();
    }

    #[test]
    fn non_positive_payment_is_invalid_input() {
        let invoice = issued_invoice(dec!(1000), dec!(200));
        for amount in [dec!(0), dec!(-5)] {
            let err = invoice.handle(&pay(amount, true, false)).unwrap_err();
            assert!(matches!(err, DomainError::Validation(_)));
        }
    }

    #[test]
    fn overpayment_is_rejected() {
        let invoice = issued_invoice(dec!(1000), dec!(200));
        let err = invoice.handle(&pay(dec!(1200.01), true, false)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn partial_payment_requires_setting() {
        let mut invoice = issued_invoice(dec!(1000), dec!(200));
        let err = invoice.handle(&pay(dec!(500), false, false)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));

        invoice.execute(&pay(dec!(500), true, false)).unwrap();
        assert_eq!(invoice.status(), InvoiceStatus::PartiallyPaid);
        assert_eq!(invoice.balance(), dec!(700));
    }

    #[test]
    fn overdue_invoice_stays_overdue_until_fully_paid() {
        let mut invoice = issued_invoice(dec!(1000), dec!(200));
        let err = invoice.handle(&overdue(date(2025, 2, 15))).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));

        invoice.execute(&overdue(date(2025, 2, 16))).unwrap();
        assert_eq!(invoice.status(), InvoiceStatus::Overdue);
        assert_eq!(invoice.paid_amount(), Decimal::ZERO);

        invoice.execute(&pay(dec!(200), true, false)).unwrap();
        assert_eq!(invoice.status(), InvoiceStatus::Overdue);
        invoice.execute(&pay(dec!(1000), true, false)).unwrap();
        assert_eq!(invoice.status(), InvoiceStatus::Paid);
        invoice.check_invariants().unwrap();
    }

    #[test]
    fn cancel_only_without_money_applied() {
        let mut invoice = issued_invoice(dec!(1000), dec!(200));
        invoice.execute(&pay(dec!(100), true, false)).unwrap();
        let err = invoice.handle(&cancel()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));

        let mut fresh = issued_invoice(dec!(1000), dec!(200));
        fresh.execute(&cancel()).unwrap();
        assert_eq!(fresh.status(), InvoiceStatus::Cancelled);
        assert_eq!(fresh.cancellation_reason(), Some("duplicate"));
        assert!(!fresh.is_live());
        assert!(fresh.handle(&pay(dec!(1200), true, false)).is_err());
    }

    #[test]
    fn pending_payment_is_applied_on_confirmation() {
        let mut invoice = issued_invoice(dec!(1000), dec!(200));
        let events = invoice.execute(&pay(dec!(1200), true, true)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(invoice.status(), InvoiceStatus::Issued);
        assert_eq!(invoice.pending_amount(), dec!(1200));

        // Pending money counts against the balance and blocks cancellation.
        assert!(invoice.handle(&pay(dec!(1), true, true)).is_err());
        assert!(invoice.handle(&cancel()).is_err());

        let payment_id = invoice.payments()[0].id;
        invoice
            .execute(&InvoiceCommand::ConfirmPayment(ConfirmPayment {
                invoice_id: test_invoice_id(),
                payment_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        assert_eq!(invoice.status(), InvoiceStatus::Paid);
        assert_eq!(invoice.pending_amount(), Decimal::ZERO);
        invoice.check_invariants().unwrap();
    }

    #[test]
    fn rejected_payment_frees_the_balance() {
        let mut invoice = issued_invoice(dec!(1000), dec!(200));
        invoice.execute(&pay(dec!(1200), true, true)).unwrap();
        let payment_id = invoice.payments()[0].id;

        invoice
            .execute(&InvoiceCommand::RejectPayment(RejectPayment {
                invoice_id: test_invoice_id(),
                payment_id,
                reason: Some("bounced".to_string()),
                occurred_at: test_time(),
            }))
            .unwrap();
        assert_eq!(invoice.remaining(), dec!(1200));
        assert!(
            invoice
                .handle(&InvoiceCommand::ConfirmPayment(ConfirmPayment {
                    invoice_id: test_invoice_id(),
                    payment_id,
                    occurred_at: test_time(),
                }))
                .is_err()
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn invariants_hold_for_any_payment_sequence(
            payments in proptest::collection::vec(-50i64..800, 1..12),
            mark_overdue_at in 0usize..12,
        ) {
            let mut invoice = issued_invoice(dec!(1000), dec!(200));
            for (i, cents) in payments.into_iter().enumerate() {
                if i == mark_overdue_at {
                    let _ = invoice.execute(&overdue(date(2025, 3, 1)));
                }
                let _ = invoice.execute(&pay(Decimal::new(cents * 100, 2), true, false));
                prop_assert!(invoice.check_invariants().is_ok());
                prop_assert!(invoice.paid_amount() <= invoice.total());
                if invoice.status() == InvoiceStatus::Paid {
                    prop_assert_eq!(invoice.paid_amount(), invoice.total());
                }
            }
        }
    }
}
