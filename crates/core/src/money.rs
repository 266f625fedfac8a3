//! Currency and minor-unit rounding.
//!
//! Money is always carried as `rust_decimal::Decimal`. A `Currency` knows how
//! many minor units it has and rounds amounts half-up to that precision.

use core::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// ISO-4217 style currency code (three ASCII letters, upper-case).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

const ZERO_DECIMAL: &[&str] = &["CLP", "ISK", "JPY", "KRW", "UGX", "VND"];
const THREE_DECIMAL: &[&str] = &["BHD", "IQD", "JOD", "KWD", "LYD", "OMR", "TND"];

impl Currency {
    pub fn new(code: impl AsRef<str>) -> Result<Self, DomainError> {
        let code = code.as_ref().trim().to_ascii_uppercase();
        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(DomainError::validation(format!(
                "currency code must be three letters, got {code:?}"
            )));
        }
        Ok(Self(code))
    }

    pub fn usd() -> Self {
        Self("USD".to_string())
    }

    pub fn code(&self) -> &str {
        &self.0
    }

    /// Number of decimal places of the smallest currency unit.
    pub fn minor_units(&self) -> u32 {
        if ZERO_DECIMAL.contains(&self.0.as_str()) {
            0
        } else if THREE_DECIMAL.contains(&self.0.as_str()) {
            3
        } else {
            2
        }
    }

    /// Round to the minor unit, half away from zero (half-up for money).
    pub fn round(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.minor_units(), RoundingStrategy::MidpointAwayFromZero)
    }
}

impl core::fmt::Display for Currency {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Currency {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Currency {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rounds_half_up_to_cents() {
        let usd = Currency::new("usd").unwrap();
        assert_eq!(usd.code(), "USD");
        assert_eq!(usd.round(dec!(10.005)), dec!(10.01));
        assert_eq!(usd.round(dec!(10.004)), dec!(10.00));
        assert_eq!(usd.round(dec!(1500)), dec!(1500));
    }

    #[test]
    fn zero_and_three_decimal_currencies() {
        assert_eq!(Currency::new("JPY").unwrap().round(dec!(100.5)), dec!(101));
        assert_eq!(Currency::new("KWD").unwrap().round(dec!(1.2345)), dec!(1.235));
    }

    #[test]
    fn rejects_malformed_codes() {
        assert!(Currency::new("US").is_err());
        assert!(Currency::new("US1").is_err());
        assert!("EURO".parse::<Currency>().is_err());
    }

    #[test]
    fn deserialization_validates() {
        let ok: Currency = serde_json::from_str("\"eur\"").unwrap();
        assert_eq!(ok.code(), "EUR");
        assert!(serde_json::from_str::<Currency>("\"euro\"").is_err());
    }
}
