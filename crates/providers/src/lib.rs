//! Provider response parsing for Lens ingest.
//!
//! SDK events may carry the raw vendor payload of an LLM call. Each provider
//! formats usage, output, tool calls and stop reasons differently; the
//! extractors here walk the known paths of each format explicitly and
//! produce a uniform [`ParsedResponse`].
//!
//! Parsing never fails: an unrecognized payload goes through the generic
//! best-effort extractor and comes back with whatever fields it could
//! populate. Selection is by the SDK-supplied provider tag, falling back to
//! shape-based auto-detection.

use lens_core::{SpanSubType, ToolUse};
use serde_json::Value;

mod anthropic;
mod bedrock;
mod gemini;
mod generic;
mod openai;

/// The uniform result of parsing one vendor payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedResponse {
    /// Canonical text output, or the original content array when tool-use
    /// blocks are present.
    pub output: Option<Value>,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub cache_read_tokens: Option<u32>,
    pub cache_write_tokens: Option<u32>,
    pub reasoning_tokens: Option<u32>,
    pub stop_reason: Option<String>,
    /// Extended-thinking text, excluded from the canonical output.
    pub thinking: Option<String>,
    pub tool_uses: Vec<ToolUse>,
    pub sub_type: Option<SpanSubType>,
}

impl ParsedResponse {
    /// Derive the display sub-type: tool calls mean the model was planning;
    /// plain generated output means it was responding.
    fn classify(&mut self) {
        self.sub_type = if !self.tool_uses.is_empty() {
            Some(SpanSubType::Planning)
        } else if has_output(self.output.as_ref()) {
            Some(SpanSubType::Response)
        } else {
            None
        };
    }
}

fn has_output(output: Option<&Value>) -> bool {
    match output {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(_) => true,
    }
}

/// The sealed family of known payload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    OpenAi,
    Anthropic,
    Bedrock,
    Gemini,
}

/// Parse a raw vendor payload into a [`ParsedResponse`].
///
/// `provider` is the SDK-supplied tag ("openai", "anthropic", "bedrock",
/// "gemini", "openrouter", ...). When absent or unknown, the payload shape
/// decides; when nothing matches, the generic extractor runs.
pub fn parse(provider: Option<&str>, raw: &Value) -> ParsedResponse {
    let format = provider.and_then(format_for_tag).or_else(|| detect(raw));

    let mut parsed = match format {
        Some(Format::OpenAi) => openai::extract(raw),
        Some(Format::Anthropic) => anthropic::extract(raw),
        Some(Format::Bedrock) => bedrock::extract(raw),
        Some(Format::Gemini) => gemini::extract(raw),
        None => generic::extract(raw),
    };
    parsed.classify();
    parsed
}

fn format_for_tag(tag: &str) -> Option<Format> {
    match tag.to_lowercase().as_str() {
        // OpenRouter proxies the OpenAI chat-completions shape.
        "openai" | "openrouter" | "azure-openai" => Some(Format::OpenAi),
        "anthropic" => Some(Format::Anthropic),
        "bedrock" | "aws-bedrock" => Some(Format::Bedrock),
        "gemini" | "google" | "vertex" => Some(Format::Gemini),
        _ => None,
    }
}

/// Shape-based detection, in fixed priority order: an anthropic `tool_use`
/// content block, then the OpenAI `choices[0].message` envelope, then the
/// Bedrock Converse `output.message.content`, then the Gemini
/// `candidates[0].content.parts`.
fn detect(raw: &Value) -> Option<Format> {
    if raw["content"]
        .as_array()
        .is_some_and(|blocks| blocks.iter().any(|b| b["type"] == "tool_use"))
    {
        return Some(Format::Anthropic);
    }
    if raw["choices"][0]["message"].is_object() {
        return Some(Format::OpenAi);
    }
    if raw["output"]["message"]["content"].is_array() {
        return Some(Format::Bedrock);
    }
    if raw["candidates"][0]["content"]["parts"].is_array() {
        return Some(Format::Gemini);
    }
    None
}

/// Read a token count, tolerating either number or numeric-string encoding.
pub(crate) fn token_count(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().map(|v| v as u32),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tag_steers_dispatch() {
        let raw = json!({
            "choices": [{"message": {"content": "hi"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1}
        });
        let parsed = parse(Some("openrouter"), &raw);
        assert_eq!(parsed.input_tokens, Some(3));
        assert_eq!(parsed.output, Some(json!("hi")));
    }

    #[test]
    fn detection_prefers_anthropic_tool_use() {
        // A payload that also has "choices" must still detect as anthropic
        // when a tool_use block is present.
        let raw = json!({
            "content": [{"type": "tool_use", "id": "t1", "name": "search", "input": {}}],
            "choices": [{"message": {"content": "x"}}]
        });
        assert_eq!(detect(&raw), Some(Format::Anthropic));
    }

    #[test]
    fn detection_order_matches_table() {
        assert_eq!(
            detect(&json!({"choices": [{"message": {"content": "x"}}]})),
            Some(Format::OpenAi)
        );
        assert_eq!(
            detect(&json!({"output": {"message": {"content": []}}})),
            Some(Format::Bedrock)
        );
        assert_eq!(
            detect(&json!({"candidates": [{"content": {"parts": []}}]})),
            Some(Format::Gemini)
        );
        assert_eq!(detect(&json!({"foo": "bar"})), None);
    }

    #[test]
    fn untagged_text_without_tool_use_falls_to_generic() {
        // Without a provider tag and without a tool_use block, none of the
        // four discriminators match; the generic extractor still recovers
        // tokens and stop reason best-effort.
        let raw = json!({
            "content": [{"type": "text", "text": "Hi"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        });
        assert_eq!(detect(&raw), None);
        let parsed = parse(None, &raw);
        assert_eq!(parsed.input_tokens, Some(10));
        assert_eq!(parsed.output_tokens, Some(5));
        assert_eq!(parsed.stop_reason.as_deref(), Some("end_turn"));
    }

    #[test]
    fn unknown_payload_never_errors() {
        let parsed = parse(None, &json!({"weird": true}));
        assert_eq!(parsed.output, None);
        assert_eq!(parsed.sub_type, None);
        assert!(parsed.tool_uses.is_empty());
    }

    #[test]
    fn classification_planning_beats_response() {
        let mut parsed = ParsedResponse {
            output: Some(json!("some text")),
            tool_uses: vec![ToolUse {
                id: "t".into(),
                name: "search".into(),
                input: json!({}),
            }],
            ..Default::default()
        };
        parsed.classify();
        assert_eq!(parsed.sub_type, Some(SpanSubType::Planning));
    }

    #[test]
    fn classification_empty_output_is_unset() {
        let mut parsed = ParsedResponse {
            output: Some(json!("")),
            ..Default::default()
        };
        parsed.classify();
        assert_eq!(parsed.sub_type, None);
    }
}
