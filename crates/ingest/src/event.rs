//! The SDK ingest envelope.
//!
//! One `POST /ingest` carries a batch of events. Every field except
//! `traceId` is optional: a span with only a type and status is valid, and
//! the assembler fills the gaps from the raw provider payload when one is
//! attached.

use chrono::{DateTime, Utc};
use lens_core::ToolUse;
use serde::Deserialize;

/// The request body of `POST /ingest`.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestBatch {
    #[serde(default)]
    pub events: Vec<IngestEvent>,
}

/// One SDK event describing a single span.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestEvent {
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub span_id: Option<String>,
    #[serde(default)]
    pub parent_span_id: Option<String>,
    #[serde(default)]
    pub span_type: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub input: Option<serde_json::Value>,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    /// Raw vendor payload; parsed when present.
    #[serde(default)]
    pub raw_response: Option<serde_json::Value>,
    #[serde(default)]
    pub input_tokens: Option<u32>,
    #[serde(default)]
    pub output_tokens: Option<u32>,
    #[serde(default)]
    pub cache_read_tokens: Option<u32>,
    #[serde(default)]
    pub cache_write_tokens: Option<u32>,
    #[serde(default)]
    pub reasoning_tokens: Option<u32>,
    #[serde(default)]
    pub first_token_ms: Option<u64>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub thinking: Option<String>,
    #[serde(default)]
    pub tool_uses: Option<Vec<ToolUse>>,
    #[serde(default)]
    pub sub_type: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// RFC 3339 start timestamp. Malformed values fall back to ingest time
    /// rather than rejecting the batch.
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl IngestEvent {
    /// Parse the SDK timestamp when well-formed; otherwise `None`.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}
