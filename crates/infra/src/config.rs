//! Engine configuration (environment driven).

use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;

use forgebill_billing::{BillingSettings, SettingsDefaults};
use forgebill_core::{CompanyId, Currency};

use crate::query::DEFAULT_PAGE_SIZE;

pub const ENV_DEFAULT_CURRENCY: &str = "FORGEBILL_DEFAULT_CURRENCY";
pub const ENV_DEFAULT_TAX_RATE: &str = "FORGEBILL_DEFAULT_TAX_RATE";
pub const ENV_PAYMENT_TERM_DAYS: &str = "FORGEBILL_PAYMENT_TERM_DAYS";
pub const ENV_GENERATION_DAY: &str = "FORGEBILL_GENERATION_DAY";
pub const ENV_PAGE_SIZE: &str = "FORGEBILL_PAGE_SIZE";
pub const ENV_PAYMENT_RETRY_LIMIT: &str = "FORGEBILL_PAYMENT_RETRY_LIMIT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Used when a company's settings are created lazily.
    pub settings_defaults: SettingsDefaults,
    /// Page size for history/overdue views when the caller gives none.
    pub default_page_size: u64,
    /// Attempts for an optimistic read-modify-write before giving up.
    pub payment_retry_limit: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            settings_defaults: SettingsDefaults::default(),
            default_page_size: DEFAULT_PAGE_SIZE,
            payment_retry_limit: 5,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `FORGEBILL_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment, a map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let defaults = &mut config.settings_defaults;

        if let Some(code) = lookup(ENV_DEFAULT_CURRENCY) {
            defaults.currency =
                Currency::new(&code).with_context(|| format!("{ENV_DEFAULT_CURRENCY}={code}"))?;
        }
        if let Some(rate) = parse::<Decimal>(&lookup, ENV_DEFAULT_TAX_RATE)? {
            defaults.tax_rate = rate;
        }
        if let Some(days) = parse::<u32>(&lookup, ENV_PAYMENT_TERM_DAYS)? {
            defaults.payment_term_days = days;
        }
        if let Some(day) = parse::<u32>(&lookup, ENV_GENERATION_DAY)? {
            defaults.generation_day = day;
        }
        if let Some(size) = parse::<u64>(&lookup, ENV_PAGE_SIZE)? {
            anyhow::ensure!(size > 0, "{ENV_PAGE_SIZE} must be at least 1");
            config.default_page_size = size;
        }
        if let Some(limit) = parse::<u32>(&lookup, ENV_PAYMENT_RETRY_LIMIT)? {
            anyhow::ensure!(limit > 0, "{ENV_PAYMENT_RETRY_LIMIT} must be at least 1");
            config.payment_retry_limit = limit;
        }

        // Defaults must produce valid settings for every lazily created company.
        BillingSettings::new(CompanyId::new(0), &config.settings_defaults, Utc::now())
            .validate()
            .context("invalid settings defaults")?;

        Ok(config)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("{key}={raw}")),
    }
}
