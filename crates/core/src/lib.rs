//! `forgebill-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the domain error model, aggregate versioning and money rounding.

pub mod aggregate;
pub mod error;
pub mod id;
pub mod money;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{
    BatchRunId, CompanyId, ContractId, DeletionId, EntityId, InvoiceId, PaymentId, PlanId,
    SubscriptionId, TariffId,
};
pub use money::Currency;
