//! Infrastructure layer: storage seams, services, config and the engine facade.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod query;
pub mod services;
pub mod store;


#[cfg(test)]
pub(crate) mod test_support;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::EngineConfig;
pub use engine::{Backends, BillingEngine};
pub use error::{BillingError, BillingResult, ErrorKind};
pub use query::{DEFAULT_PAGE_SIZE, Page, Pagination};
pub use services::{BatchSummary, BillingHistoryEntry, FailedItem, InvoiceSummary, SkippedItem};
