//! Public entity and operation argument types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single measurement of a named series.
///
/// `(name, created_at)` identifies the point. `value` is an arbitrary JSON
/// payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DataPoint {
    /// Series name.
    pub name: String,
    /// Sortable timestamp string.
    pub created_at: String,
    /// Payload.
    pub value: Value,
}

impl DataPoint {
    /// Creates a data point.
    pub fn new(name: impl Into<String>, created_at: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { name: name.into(), created_at: created_at.into(), value: value.into() }
    }

    /// Logical key of this point.
    #[must_use]
    pub fn key(&self) -> DataPointKey {
        DataPointKey { name: self.name.clone(), created_at: self.created_at.clone() }
    }
}

/// Logical identity of a data point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DataPointKey {
    /// Series name.
    pub name: String,
    /// Sortable timestamp string.
    pub created_at: String,
}

impl DataPointKey {
    /// Creates a key.
    pub fn new(name: impl Into<String>, created_at: impl Into<String>) -> Self {
        Self { name: name.into(), created_at: created_at.into() }
    }
}

/// Inclusive `createdAt` bounds.
///
/// `to` also admits every timestamp it is a prefix of, so a date bound like
/// `"2024-01-31"` covers the whole day. Full RFC 3339 bounds compare as
/// instants, whatever their offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DateRange {
    /// Lower bound.
    pub from: String,
    /// Upper bound.
    pub to: String,
}

impl DateRange {
    /// Creates a range.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self { from: from.into(), to: to.into() }
    }
}

/// Pagination arguments for `listDataPoints`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Pagination {
    /// Page size; the table default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Token from the previous page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

impl Pagination {
    /// First page of `limit` items.
    #[must_use]
    pub fn first(limit: usize) -> Self {
        Self { limit: Some(limit), next_token: None }
    }

    /// Page following `next_token`.
    #[must_use]
    pub fn after(limit: usize, next_token: impl Into<String>) -> Self {
        Self { limit: Some(limit), next_token: Some(next_token.into()) }
    }
}

/// One page of `listDataPoints`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPointPage {
    /// Items in key order.
    pub items: Vec<DataPoint>,
    /// Token for the next page, `None` on the last page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}
