//! The trace data model — a logical unit of work owning a set of spans.

use crate::span::Span;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a trace. Transitions form a DAG: `active` may move to
/// `completed` or `error`; both are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    #[default]
    Active,
    Completed,
    Error,
}

impl TraceStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: TraceStatus) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::Completed) | (Self::Active, Self::Error)
        ) || *self == next
    }
}

impl std::fmt::Display for TraceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A logical unit of work: an agent turn, a single LLM call, or a
/// multi-step workflow. Created on first ingest mentioning its id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    pub id: String,
    pub project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub status: TraceStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Rollup figures recomputed from the span set at read time. Never
/// persisted as denormalized counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TraceMetrics {
    pub total_spans: u64,
    /// Input + output tokens of LLM spans. Cache tokens are not counted.
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    /// Sum of span durations, which may exceed wall clock for parallel
    /// tool fan-out.
    pub total_duration_ms: u64,
}

/// A trace joined with its read-time metrics, as returned by list queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceWithMetrics {
    #[serde(flatten)]
    pub trace: Trace,
    #[serde(flatten)]
    pub metrics: TraceMetrics,
}

/// A trace plus its full span set, as returned by the single-trace read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceWithSpans {
    #[serde(flatten)]
    pub trace: Trace,
    pub spans: Vec<Span>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_form_a_dag() {
        assert!(TraceStatus::Active.can_transition_to(TraceStatus::Completed));
        assert!(TraceStatus::Active.can_transition_to(TraceStatus::Error));
        assert!(!TraceStatus::Completed.can_transition_to(TraceStatus::Active));
        assert!(!TraceStatus::Error.can_transition_to(TraceStatus::Completed));
        // Idempotent self-transition is allowed.
        assert!(TraceStatus::Completed.can_transition_to(TraceStatus::Completed));
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert_eq!(TraceStatus::parse("running"), None);
        assert_eq!(TraceStatus::parse("error"), Some(TraceStatus::Error));
    }

    #[test]
    fn metrics_flatten_into_trace_json() {
        let trace = Trace {
            id: "t1".into(),
            project_id: "p1".into(),
            name: Some("checkout-agent".into()),
            session_id: None,
            user_id: None,
            status: TraceStatus::Active,
            tags: vec![],
            metadata: serde_json::Map::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let with_metrics = TraceWithMetrics {
            trace,
            metrics: TraceMetrics {
                total_spans: 3,
                total_tokens: 150,
                total_cost_usd: 0.0075,
                total_duration_ms: 1200,
            },
        };
        let json = serde_json::to_value(&with_metrics).unwrap();
        assert_eq!(json["id"], "t1");
        assert_eq!(json["totalSpans"], 3);
        assert_eq!(json["totalTokens"], 150);
    }
}
