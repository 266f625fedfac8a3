//! Per-company billing settings.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use forgebill_core::{CompanyId, Currency, DomainError, DomainResult};

use crate::calculation::{PricingPolicy, TaxPolicy};
use crate::numbering::InvoiceNumberFormat;
use crate::proration::InactiveDiscountPolicy;

pub const MAX_GENERATION_DAY: u32 = 28;
pub const MAX_PAYMENT_TERM_DAYS: u32 = 365;

/// Values used when a company's settings are created lazily.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsDefaults {
    pub currency: Currency,
    pub tax_rate: Decimal,
    pub tax_included: bool,
    pub payment_term_days: u32,
    pub generation_day: u32,
    pub invoice_number_prefix: String,
    pub invoice_number_format: InvoiceNumberFormat,
    pub inactive_discount_ratio: Decimal,
}

impl Default for SettingsDefaults {
    fn default() -> Self {
        Self {
            currency: Currency::usd(),
            tax_rate: Decimal::new(20, 2),
            tax_included: false,
            payment_term_days: 14,
            generation_day: 1,
            invoice_number_prefix: "INV".to_string(),
            invoice_number_format: InvoiceNumberFormat::default(),
            inactive_discount_ratio: Decimal::new(5, 1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingSettings {
    pub company_id: CompanyId,
    pub auto_generate_invoices: bool,
    /// Day of month (1..=28) on which the previous month is invoiced.
    pub invoice_generation_day: u32,
    pub invoice_payment_term_days: u32,
    pub default_tax_rate: Decimal,
    pub tax_included: bool,
    pub notify_before_invoice_days: u32,
    pub notify_before_due_days: u32,
    pub notify_after_overdue_days: u32,
    pub invoice_number_prefix: String,
    pub invoice_number_format: InvoiceNumberFormat,
    pub currency: Currency,
    pub allow_partial_payments: bool,
    pub require_payment_confirmation: bool,
    pub enable_inactive_discounts: bool,
    pub inactive_discount_ratio: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BillingSettings {
    pub fn new(company_id: CompanyId, defaults: &SettingsDefaults, now: DateTime<Utc>) -> Self {
        Self {
            company_id,
            auto_generate_invoices: true,
            invoice_generation_day: defaults.generation_day,
            invoice_payment_term_days: defaults.payment_term_days,
            default_tax_rate: defaults.tax_rate,
            tax_included: defaults.tax_included,
            notify_before_invoice_days: 3,
            notify_before_due_days: 3,
            notify_after_overdue_days: 1,
            invoice_number_prefix: defaults.invoice_number_prefix.clone(),
            invoice_number_format: defaults.invoice_number_format.clone(),
            currency: defaults.currency.clone(),
            allow_partial_payments: true,
            require_payment_confirmation: false,
            enable_inactive_discounts: false,
            inactive_discount_ratio: defaults.inactive_discount_ratio,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if !(1..=MAX_GENERATION_DAY).contains(&self.invoice_generation_day) {
            return Err(DomainError::validation(format!(
                "invoice_generation_day must be between 1 and {MAX_GENERATION_DAY}, got {}",
                self.invoice_generation_day
            )));
        }
        if self.invoice_payment_term_days > MAX_PAYMENT_TERM_DAYS {
            return Err(DomainError::validation(format!(
                "invoice_payment_term_days must be at most {MAX_PAYMENT_TERM_DAYS}, got {}",
                self.invoice_payment_term_days
            )));
        }
        if !is_fraction(self.default_tax_rate) {
            return Err(DomainError::validation(format!(
                "default_tax_rate must be between 0 and 1, got {}",
                self.default_tax_rate
            )));
        }
        if !is_fraction(self.inactive_discount_ratio) {
            return Err(DomainError::validation(format!(
                "inactive_discount_ratio must be between 0 and 1, got {}",
                self.inactive_discount_ratio
            )));
        }
        if self.invoice_number_prefix.trim().is_empty() {
            return Err(DomainError::validation("invoice_number_prefix is required"));
        }
        Ok(())
    }

    /// Return a copy with `update` applied, validated as a whole.
    pub fn apply(&self, update: BillingSettingsUpdate, now: DateTime<Utc>) -> DomainResult<Self> {
        let mut next = self.clone();

        if let Some(v) = update.auto_generate_invoices {
            next.auto_generate_invoices = v;
        }
        if let Some(v) = update.invoice_generation_day {
            next.invoice_generation_day = v;
        }
        if let Some(v) = update.invoice_payment_term_days {
            next.invoice_payment_term_days = v;
        }
        if let Some(v) = update.default_tax_rate {
            next.default_tax_rate = v;
        }
        if let Some(v) = update.tax_included {
            next.tax_included = v;
        }
        if let Some(v) = update.notify_before_invoice_days {
            next.notify_before_invoice_days = v;
        }
        if let Some(v) = update.notify_before_due_days {
            next.notify_before_due_days = v;
        }
        if let Some(v) = update.notify_after_overdue_days {
            next.notify_after_overdue_days = v;
        }
        if let Some(v) = update.invoice_number_prefix {
            next.invoice_number_prefix = v.trim().to_string();
        }
        if let Some(v) = update.invoice_number_format {
            next.invoice_number_format = InvoiceNumberFormat::parse(&v)?;
        }
        if let Some(v) = update.currency {
            next.currency = Currency::new(v)?;
        }
        if let Some(v) = update.allow_partial_payments {
            next.allow_partial_payments = v;
        }
        if let Some(v) = update.require_payment_confirmation {
            next.require_payment_confirmation = v;
        }
        if let Some(v) = update.enable_inactive_discounts {
            next.enable_inactive_discounts = v;
        }
        if let Some(v) = update.inactive_discount_ratio {
            next.inactive_discount_ratio = v;
        }

        next.validate()?;
        next.updated_at = now;
        Ok(next)
    }

    pub fn pricing_policy(&self) -> PricingPolicy {
        PricingPolicy {
            currency: self.currency.clone(),
            tax: TaxPolicy {
                rate: self.default_tax_rate,
                included: self.tax_included,
            },
            discount: InactiveDiscountPolicy {
                enabled: self.enable_inactive_discounts,
                ratio: self.inactive_discount_ratio,
            },
        }
    }
}

/// Partial settings change; absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingSettingsUpdate {
    pub auto_generate_invoices: Option<bool>,
    pub invoice_generation_day: Option<u32>,
    pub invoice_payment_term_days: Option<u32>,
    pub default_tax_rate: Option<Decimal>,
    pub tax_included: Option<bool>,
    pub notify_before_invoice_days: Option<u32>,
    pub notify_before_due_days: Option<u32>,
    pub notify_after_overdue_days: Option<u32>,
    pub invoice_number_prefix: Option<String>,
    pub invoice_number_format: Option<String>,
    pub currency: Option<String>,
    pub allow_partial_payments: Option<bool>,
    pub require_payment_confirmation: Option<bool>,
    pub enable_inactive_discounts: Option<bool>,
    pub inactive_discount_ratio: Option<Decimal>,
}

fn is_fraction(value: Decimal) -> bool {
    value >= Decimal::ZERO && value <= Decimal::ONE
}
