use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use forgebill_core::PaymentId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Recorded, awaiting confirmation; does not count towards `paid_amount`.
    Pending,
    Confirmed,
    Rejected,
}

/// Append-only record of funds submitted against an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub amount: Decimal,
    pub method: String,
    pub notes: Option<String>,
    pub status: PaymentStatus,
    pub received_at: DateTime<Utc>,
    /// When the payment was confirmed or rejected.
    pub settled_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn is_pending(&self) -> bool {
        self.status == PaymentStatus::Pending
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == PaymentStatus::Confirmed
    }
}
