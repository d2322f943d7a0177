//! The span data model — a single operation within a trace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of work a span represents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SpanType {
    /// Workflow boundary; at most one agent span acts as the trace root.
    Agent,
    /// An LLM completion call.
    Llm,
    /// A tool execution.
    Tool,
    /// A retrieval / vector search operation.
    Retrieval,
    /// An embedding computation.
    Embedding,
    /// A guardrail / safety check.
    Guardrail,
    /// A rerank operation.
    Rerank,
    /// Anything else the SDK wants to record.
    Custom,
}

impl SpanType {
    /// Parse an SDK-supplied type tag, defaulting to `llm` when the value is
    /// missing or unrecognized.
    pub fn parse_or_default(s: Option<&str>) -> Self {
        match s {
            Some("agent") => Self::Agent,
            Some("llm") => Self::Llm,
            Some("tool") => Self::Tool,
            Some("retrieval") => Self::Retrieval,
            Some("embedding") => Self::Embedding,
            Some("guardrail") => Self::Guardrail,
            Some("rerank") => Self::Rerank,
            Some("custom") => Self::Custom,
            _ => Self::Llm,
        }
    }

    /// Stable lowercase tag, used for storage and display.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Llm => "llm",
            Self::Tool => "tool",
            Self::Retrieval => "retrieval",
            Self::Embedding => "embedding",
            Self::Guardrail => "guardrail",
            Self::Rerank => "rerank",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for SpanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a span.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    Pending,
    #[default]
    Success,
    Error,
}

impl SpanStatus {
    pub fn parse_or_default(s: Option<&str>) -> Self {
        match s {
            Some("pending") => Self::Pending,
            Some("error") => Self::Error,
            _ => Self::Success,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Display classification for LLM spans: did the model emit tool calls
/// (`planning`) or a final answer (`response`)?
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SpanSubType {
    Planning,
    Response,
}

impl SpanSubType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "planning" => Some(Self::Planning),
            "response" => Some(Self::Response),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Response => "response",
        }
    }
}

/// One tool invocation declared in an LLM response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolUse {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub input: serde_json::Value,
}

/// A single operation within a trace.
///
/// Spans are append-only: once persisted they are never mutated. Token
/// fields distinguish zero (`Some(0)`) from unreported (`None`); the cost
/// field is always derived from the pricing catalog, never trusted from the
/// wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    /// Unique within the trace; client-supplied ids are preserved verbatim.
    pub id: String,
    /// Owning trace.
    pub trace_id: String,
    /// Sibling reference within the same trace (None for roots).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    #[serde(rename = "type")]
    pub span_type: SpanType,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_write_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u32>,
    /// Derived by the pricing catalog at assembly time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_token_ms: Option<u64>,
    pub status: SpanStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_uses: Vec<ToolUse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<SpanSubType>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Span {
    /// Input + output tokens, treating unreported as zero. Cache and
    /// reasoning tokens are deliberately excluded.
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.unwrap_or(0) as u64 + self.output_tokens.unwrap_or(0) as u64
    }

    /// Whether this span contributes to trace-level token rollups.
    pub fn is_llm(&self) -> bool {
        self.span_type == SpanType::Llm
    }
}
