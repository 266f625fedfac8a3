//! Invoicing domain module.
//!
//! Business rules for invoices, payments and scheduled deletions, implemented
//! purely as deterministic domain logic (no IO, no storage).

pub mod deletion;
pub mod invoice;
pub mod payment;

pub use deletion::{DeletionDecision, DeletionTarget, ScheduledDeletion};
pub use invoice::{
    CancelInvoice, ConfirmPayment, CreateDraft, Invoice, InvoiceCancelled, InvoiceCommand,
    InvoiceDrafted, InvoiceEvent, InvoiceIssued, InvoiceItem, InvoiceMarkedOverdue, InvoiceStatus,
    IssueInvoice, MarkOverdue, PaymentApplied, PaymentReceived, PaymentRejected, RegisterPayment,
    RejectPayment, StatusTransition,
};
pub use payment::{Payment, PaymentStatus};
