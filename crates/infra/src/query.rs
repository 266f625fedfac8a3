//! Pagination for read-only invoice views.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: u64 = 20;

/// Pagination parameters.
///
/// The limit has a floor of 1 and a default, but no upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of items to return.
    pub limit: u64,
    /// Offset for pagination (0-based).
    pub offset: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        Self::with_default(limit, offset, DEFAULT_PAGE_SIZE)
    }

    /// Missing or non-positive limits fall back to `default_limit`; negative
    /// offsets are treated as 0.
    pub fn with_default(limit: Option<i64>, offset: Option<i64>, default_limit: u64) -> Self {
        let limit = match limit {
            Some(l) if l > 0 => l as u64,
            _ => default_limit.max(1),
        };
        let offset = offset.filter(|o| *o > 0).map(|o| o as u64).unwrap_or(0);
        Self { limit, offset }
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total number of matches across all pages.
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, pagination: Pagination) -> Self {
        let has_more = total > pagination.offset.saturating_add(pagination.limit);
        Self {
            items,
            total,
            pagination,
            has_more,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            pagination: self.pagination,
            has_more: self.has_more,
        }
    }
}
