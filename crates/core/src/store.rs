//! The storage abstraction implemented by every backend family.
//!
//! One uniform trait over three backends with different trade-offs:
//! an embedded single-file row store (dev), a networked row store with
//! JSON-typed columns (production), and a columnar analytics store
//! (high volume). Implementations live in `lens-store`.
//!
//! Every read that returns traces or spans is filtered by project id;
//! operations taking a `(project_id, trace_id)` pair return
//! [`StoreError::NotFound`] when the pair does not match. Cross-tenant
//! leakage is a fatal invariant violation, not a recoverable error.

use crate::error::StoreError;
use crate::page::{Page, PageRequest};
use crate::project::Project;
use crate::span::Span;
use crate::trace::{Trace, TraceStatus, TraceWithMetrics, TraceWithSpans};
use crate::user::User;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Filters for trace listing. All fields are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct TraceFilter {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub status: Option<TraceStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Mutable trace fields for `PATCH`-style updates. `None` leaves the field
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct TraceUpdate {
    pub name: Option<String>,
    pub status: Option<TraceStatus>,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Per-session rollup across the traces sharing a session id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub trace_count: i64,
    pub total_tokens: i64,
    pub total_cost_usd: f64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Project-level stats over a time window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStats {
    pub total_traces: i64,
    pub total_spans: i64,
    pub total_tokens: i64,
    pub total_cost_usd: f64,
    pub avg_duration_ms: f64,
    /// 100 * (traces in error) / max(1, total traces).
    pub error_rate: f64,
}

/// One interval of the time-series usage query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageBucket {
    pub bucket_start: DateTime<Utc>,
    pub trace_count: i64,
    pub total_tokens: i64,
    pub total_cost_usd: f64,
}

/// Granularity of the usage time series. Served by the backend's native
/// date-truncation primitive, never by per-row post-processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    Day,
    Week,
}

impl Granularity {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hour" => Some(Self::Hour),
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            _ => None,
        }
    }
}

/// Health probe result for one backend.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreCheck {
    pub status: &'static str,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The uniform storage interface.
///
/// All methods are suspension points; implementations must release pooled
/// connections on every exit path, including error and cancellation.
#[async_trait]
pub trait Store: Send + Sync {
    /// Backend family tag ("sqlite", "postgres", "clickhouse").
    fn name(&self) -> &str;

    /// Cheap liveness probe.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Idempotent schema evolution. Safe to run on every startup.
    async fn migrate(&self) -> Result<(), StoreError>;

    // ── Users ─────────────────────────────────────────────────────────

    async fn create_user(&self, user: &User) -> Result<(), StoreError>;
    async fn user_by_id(&self, id: &str) -> Result<Option<User>, StoreError>;
    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn user_by_google_id(&self, google_id: &str) -> Result<Option<User>, StoreError>;

    // ── Projects ──────────────────────────────────────────────────────

    async fn create_project(&self, project: &Project) -> Result<(), StoreError>;
    async fn project_by_id(&self, id: &str) -> Result<Option<Project>, StoreError>;
    async fn project_by_api_key_hash(&self, hash: &str) -> Result<Option<Project>, StoreError>;
    async fn projects_by_owner(&self, owner_email: &str) -> Result<Vec<Project>, StoreError>;
    async fn update_project(
        &self,
        id: &str,
        name: Option<&str>,
        settings: Option<&serde_json::Value>,
    ) -> Result<(), StoreError>;
    /// Delete the project and cascade to its traces and spans.
    async fn delete_project(&self, id: &str) -> Result<(), StoreError>;
    /// Atomically replace the stored API key hash.
    async fn rotate_api_key(&self, id: &str, new_hash: &str) -> Result<(), StoreError>;

    // ── Traces ────────────────────────────────────────────────────────

    /// Create the trace if absent; otherwise augment it: fill in name,
    /// session id and user id only where the stored row has none (first
    /// writer wins across batches).
    async fn create_or_augment_trace(&self, trace: &Trace) -> Result<(), StoreError>;

    async fn update_trace(
        &self,
        project_id: &str,
        trace_id: &str,
        update: &TraceUpdate,
    ) -> Result<(), StoreError>;

    /// Fetch one trace with its spans, scoped to the project. Spans come
    /// back ordered by (started_at, id).
    async fn trace_with_spans(
        &self,
        project_id: &str,
        trace_id: &str,
    ) -> Result<Option<TraceWithSpans>, StoreError>;

    async fn list_traces(
        &self,
        project_id: &str,
        filter: &TraceFilter,
        page: PageRequest,
    ) -> Result<Page<TraceWithMetrics>, StoreError>;

    /// Delete every trace (and span) in the project. Returns the number of
    /// traces removed.
    async fn delete_traces(&self, project_id: &str) -> Result<u64, StoreError>;

    // ── Spans ─────────────────────────────────────────────────────────

    async fn insert_span(&self, project_id: &str, span: &Span) -> Result<(), StoreError>;

    /// Bulk insert using the backend's batching primitive. Idempotent on
    /// (project_id, trace_id, span_id): a duplicate insert is a no-op or an
    /// update, never a second row visible to readers.
    async fn insert_spans(&self, project_id: &str, spans: &[Span]) -> Result<(), StoreError>;

    // ── Aggregates ────────────────────────────────────────────────────

    async fn list_sessions(
        &self,
        project_id: &str,
        page: PageRequest,
    ) -> Result<Page<SessionSummary>, StoreError>;

    async fn project_stats(
        &self,
        project_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<ProjectStats, StoreError>;

    async fn usage_series(
        &self,
        project_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        granularity: Granularity,
    ) -> Result<Vec<UsageBucket>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn granularity_parses_known_values_only() {
        assert_eq!(Granularity::parse("hour"), Some(Granularity::Hour));
        assert_eq!(Granularity::parse("day"), Some(Granularity::Day));
        assert_eq!(Granularity::parse("week"), Some(Granularity::Week));
        assert_eq!(Granularity::parse("month"), None);
    }

    #[test]
    fn error_rate_default_is_zero() {
        let stats = ProjectStats::default();
        assert_eq!(stats.error_rate, 0.0);
        assert_eq!(stats.total_traces, 0);
    }
}
