//! Activity facts for billable entities (equipment / objects under a contract).

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use forgebill_core::{DomainError, DomainResult, EntityId};

use crate::period::BillingPeriod;

/// Half-open activity interval `[from, until)`; `until = None` means still active.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityInterval {
    pub from: DateTime<Utc>,
    pub until: Option<DateTime<Utc>>,
}

impl ActivityInterval {
    pub fn new(from: DateTime<Utc>, until: Option<DateTime<Utc>>) -> DomainResult<Self> {
        if let Some(until) = until {
            if until <= from {
                return Err(DomainError::validation(format!(
                    "activity interval ends ({until}) before it starts ({from})"
                )));
            }
        }
        Ok(Self { from, until })
    }

    /// Interval covering whole calendar days `start..=end` (open-ended when `end` is None).
    pub fn whole_days(start: NaiveDate, end: Option<NaiveDate>) -> Self {
        Self {
            from: day_start(start),
            until: end.map(|e| day_start(e) + chrono::Duration::days(1)),
        }
    }

    /// True when `[from, until)` lies entirely inside this interval.
    pub fn covers(&self, from: DateTime<Utc>, until: DateTime<Utc>) -> bool {
        self.from <= from && self.until.is_none_or(|end| end >= until)
    }
}

/// What kind of billable entity a contract carries.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Equipment,
    Object,
}

/// A billable entity under a contract with its activity within a period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillableEntity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub name: String,
    #[serde(default)]
    pub activity: Vec<ActivityInterval>,
}

fn day_start(day: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN))
}

/// Merge overlapping or touching intervals so a day split across two adjacent
/// intervals still counts as one continuous stretch of activity.
fn merge(intervals: &[ActivityInterval]) -> Vec<ActivityInterval> {
    let mut sorted: Vec<ActivityInterval> = intervals.to_vec();
    sorted.sort_by_key(|i| i.from);

    let mut merged: Vec<ActivityInterval> = Vec::with_capacity(sorted.len());
    for interval in sorted {
        match merged.last_mut() {
            Some(last) => match last.until {
                None => {}
                Some(last_until) if interval.from <= last_until => {
                    last.until = match interval.until {
                        None => None,
                        Some(u) => Some(u.max(last_until)),
                    };
                }
                Some(_) => merged.push(interval),
            },
            None => merged.push(interval),
        }
    }
    merged
}

/// Count the days of `period` that are *entirely* covered by activity.
///
/// A day with only partial activity (e.g. installed at noon) counts as zero.
pub fn active_days(period: &BillingPeriod, intervals: &[ActivityInterval]) -> u32 {
    let merged = merge(intervals);
    if merged.is_empty() {
        return 0;
    }

    period
        .iter_days()
        .filter(|day| {
            let from = day_start(*day);
            let until = from + chrono::Duration::days(1);
            merged.iter().any(|i| i.covers(from, until))
        })
        .count() as u32
}
