//! Billing domain module: periods, tariffs, proration and price calculation.
//!
//! Pure, deterministic domain logic only (no IO, no storage). The infra crate
//! loads contracts, tariffs and activity facts and feeds them through here.

pub mod activity;
pub mod calculation;
pub mod numbering;
pub mod period;
pub mod plan;
pub mod proration;
pub mod settings;
pub mod tariff;

pub use activity::{ActivityInterval, BillableEntity, EntityKind, active_days};
pub use calculation::{BillingCalculation, LineItem, PricingPolicy, TaxPolicy, price_contract};
pub use numbering::InvoiceNumberFormat;
pub use period::BillingPeriod;
pub use plan::{BillingCycle, BillingPlan, PlanUpdate, Subscription, SubscriptionStatus};
pub use proration::{Charge, ChargeBasis, InactiveDiscountPolicy, ProrationCalculator};
pub use settings::{BillingSettings, BillingSettingsUpdate, SettingsDefaults};
pub use tariff::{Contract, ContractStatus, TariffPlan};
