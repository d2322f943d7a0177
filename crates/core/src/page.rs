//! Pagination primitives shared by all list endpoints.

use serde::{Deserialize, Serialize};

/// Default page size when the caller omits or sends an out-of-range limit.
pub const DEFAULT_LIMIT: i64 = 50;
/// Largest page size a caller may request.
pub const MAX_LIMIT: i64 = 100;

/// A validated limit/offset pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: i64,
    pub offset: i64,
}

impl PageRequest {
    /// Clamp raw query values into a valid page request.
    ///
    /// Limits outside (0, 100] fall back to the default of 50; negative
    /// offsets become 0.
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        let limit = match limit {
            Some(l) if l > 0 && l <= MAX_LIMIT => l,
            _ => DEFAULT_LIMIT,
        };
        Self {
            limit,
            offset: offset.unwrap_or(0).max(0),
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

/// One page of results plus the total row count for the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

impl<T> Page<T> {
    /// Build a page echoing the request that produced it.
    pub fn new(data: Vec<T>, total: i64, req: PageRequest) -> Self {
        Self {
            data,
            total,
            limit: req.limit,
            offset: req.offset,
        }
    }
}
