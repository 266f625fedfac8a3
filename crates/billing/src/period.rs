//! Billing periods (inclusive calendar date ranges).

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use forgebill_core::{DomainError, DomainResult};

/// A billing period `[start, end]`, both ends inclusive, no time component.
///
/// A one-day period (`start == end`) is valid; `end < start` is rejected.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BillingPeriod {
    start: NaiveDate,
    end: NaiveDate,
}

impl BillingPeriod {
    pub fn new(start: NaiveDate, end: NaiveDate) -> DomainResult<Self> {
        if end < start {
            return Err(DomainError::validation(format!(
                "billing period end {end} precedes start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    /// The full calendar month `year-month`.
    pub fn calendar_month(year: i32, month: u32) -> DomainResult<Self> {
        let start = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| DomainError::validation(format!("invalid month {year}-{month}")))?;
        let next = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)
        };
        let end = next
            .and_then(|d| d.pred_opt())
            .ok_or_else(|| DomainError::validation(format!("invalid month {year}-{month}")))?;
        Self::new(start, end)
    }

    /// The calendar month preceding the month of `date`.
    pub fn previous_month(date: NaiveDate) -> DomainResult<Self> {
        if date.month() == 1 {
            Self::calendar_month(date.year() - 1, 12)
        } else {
            Self::calendar_month(date.year(), date.month() - 1)
        }
    }

    /// A whole calendar year, or a single month of it.
    pub fn year_or_month(year: i32, month: Option<u32>) -> DomainResult<Self> {
        match month {
            Some(m) => Self::calendar_month(year, m),
            None => {
                let start = NaiveDate::from_ymd_opt(year, 1, 1)
                    .ok_or_else(|| DomainError::validation(format!("invalid year {year}")))?;
                let end = NaiveDate::from_ymd_opt(year, 12, 31)
                    .ok_or_else(|| DomainError::validation(format!("invalid year {year}")))?;
                Self::new(start, end)
            }
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of calendar days in the period (inclusive of both ends).
    pub fn days(&self) -> u32 {
        (self.end.signed_duration_since(self.start).num_days() + 1) as u32
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn overlaps(&self, other: &BillingPeriod) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Every calendar day of the period, in order.
    pub fn iter_days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        self.start.iter_days().take(self.days() as usize)
    }
}

impl core::fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn inverted_period_is_rejected() {
        let err = BillingPeriod::new(date(2025, 1, 31), date(2025, 1, 1)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn single_day_period_has_one_day() {
        let p = BillingPeriod::new(date(2025, 3, 5), date(2025, 3, 5)).unwrap();
        assert_eq!(p.days(), 1);
        assert_eq!(p.iter_days().collect::<Vec<_>>(), vec![date(2025, 3, 5)]);
    }

    #[test]
    fn calendar_months_have_real_lengths() {
        assert_eq!(BillingPeriod::calendar_month(2025, 1).unwrap().days(), 31);
        assert_eq!(BillingPeriod::calendar_month(2025, 2).unwrap().days(), 28);
        assert_eq!(BillingPeriod::calendar_month(2024, 2).unwrap().days(), 29);
        assert_eq!(BillingPeriod::calendar_month(2025, 4).unwrap().days(), 30);

        let dec = BillingPeriod::calendar_month(2025, 12).unwrap();
        assert_eq!(dec.start(), date(2025, 12, 1));
        assert_eq!(dec.end(), date(2025, 12, 31));
    }

    #[test]
    fn invalid_month_is_rejected() {
        assert!(BillingPeriod::calendar_month(2025, 13).is_err());
        assert!(BillingPeriod::calendar_month(2025, 0).is_err());
    }

    #[test]
    fn previous_month_wraps_the_year() {
        let p = BillingPeriod::previous_month(date(2025, 1, 15)).unwrap();
        assert_eq!(p, BillingPeriod::calendar_month(2024, 12).unwrap());
    }

    #[test]
    fn year_or_month_selects_range() {
        let year = BillingPeriod::year_or_month(2025, None).unwrap();
        assert_eq!(year.days(), 365);
        let march = BillingPeriod::year_or_month(2025, Some(3)).unwrap();
        assert_eq!(march.start(), date(2025, 3, 1));
    }

    #[test]
    fn overlap_is_inclusive() {
        let jan = BillingPeriod::calendar_month(2025, 1).unwrap();
        let edge = BillingPeriod::new(date(2025, 1, 31), date(2025, 2, 10)).unwrap();
        let feb = BillingPeriod::calendar_month(2025, 2).unwrap();
        assert!(jan.overlaps(&edge));
        assert!(!jan.overlaps(&feb));
    }
}
