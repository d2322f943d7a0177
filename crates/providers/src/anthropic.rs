//! Extractor for the Anthropic Messages API response shape.
//!
//! Usage lives under `usage.{input_tokens, output_tokens,
//! cache_read_input_tokens, cache_creation_input_tokens}`; output is a
//! `content` array of typed blocks (`text`, `tool_use`, `thinking`); the
//! stop reason is the top-level `stop_reason`.

use crate::{ParsedResponse, token_count};
use lens_core::ToolUse;
use serde_json::Value;

pub(crate) fn extract(raw: &Value) -> ParsedResponse {
    let usage = &raw["usage"];
    let mut parsed = ParsedResponse {
        input_tokens: token_count(&usage["input_tokens"]),
        output_tokens: token_count(&usage["output_tokens"]),
        cache_read_tokens: token_count(&usage["cache_read_input_tokens"]),
        cache_write_tokens: token_count(&usage["cache_creation_input_tokens"]),
        stop_reason: raw["stop_reason"].as_str().map(str::to_owned),
        ..Default::default()
    };

    let Some(blocks) = raw["content"].as_array() else {
        return parsed;
    };

    let mut text_parts: Vec<&str> = Vec::new();
    let mut thinking_parts: Vec<&str> = Vec::new();

    for block in blocks {
        match block["type"].as_str() {
            Some("text") => {
                if let Some(text) = block["text"].as_str() {
                    text_parts.push(text);
                }
            }
            Some("thinking") => {
                if let Some(thinking) = block["thinking"].as_str() {
                    thinking_parts.push(thinking);
                }
            }
            Some("tool_use") => {
                parsed.tool_uses.push(ToolUse {
                    id: block["id"].as_str().unwrap_or_default().to_string(),
                    name: block["name"].as_str().unwrap_or_default().to_string(),
                    input: block["input"].clone(),
                });
            }
            _ => {}
        }
    }

    if !thinking_parts.is_empty() {
        parsed.thinking = Some(thinking_parts.join("\n"));
    }

    // With tool calls present the original block array is the output; the
    // dashboard renders it structurally. Otherwise join the text blocks.
    if !parsed.tool_uses.is_empty() {
        parsed.output = Some(raw["content"].clone());
    } else if !text_parts.is_empty() {
        parsed.output = Some(Value::String(text_parts.join("\n")));
    }

    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use lens_core::SpanSubType;
    use serde_json::json;

    #[test]
    fn text_response_with_cache_usage() {
        let raw = json!({
            "content": [{"type": "text", "text": "Hi"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 5, "cache_read_input_tokens": 500}
        });
        let parsed = crate::parse(Some("anthropic"), &raw);
        assert_eq!(parsed.input_tokens, Some(10));
        assert_eq!(parsed.output_tokens, Some(5));
        assert_eq!(parsed.cache_read_tokens, Some(500));
        assert_eq!(parsed.cache_write_tokens, None);
        assert_eq!(parsed.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(parsed.output, Some(json!("Hi")));
        assert_eq!(parsed.sub_type, Some(SpanSubType::Response));
    }

    #[test]
    fn tool_use_keeps_original_content_array() {
        let raw = json!({
            "content": [
                {"type": "text", "text": "Let me look"},
                {"type": "tool_use", "id": "toolu_9", "name": "search_products",
                 "input": {"query": "desk"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 20, "output_tokens": 12}
        });
        let parsed = crate::parse(Some("anthropic"), &raw);
        assert_eq!(parsed.tool_uses.len(), 1);
        assert_eq!(parsed.tool_uses[0].id, "toolu_9");
        assert_eq!(parsed.tool_uses[0].name, "search_products");
        assert_eq!(parsed.tool_uses[0].input["query"], "desk");
        assert_eq!(parsed.sub_type, Some(SpanSubType::Planning));
        // Output is the untouched content array, not the joined text.
        assert!(parsed.output.as_ref().unwrap().is_array());
    }

    #[test]
    fn thinking_is_split_out_of_output() {
        let raw = json!({
            "content": [
                {"type": "thinking", "thinking": "user wants a summary"},
                {"type": "text", "text": "Here it is."}
            ],
            "usage": {"input_tokens": 8, "output_tokens": 30}
        });
        let parsed = extract(&raw);
        assert_eq!(parsed.thinking.as_deref(), Some("user wants a summary"));
        assert_eq!(parsed.output, Some(json!("Here it is.")));
    }

    #[test]
    fn multiple_text_blocks_join_with_newline() {
        let raw = json!({
            "content": [
                {"type": "text", "text": "one"},
                {"type": "text", "text": "two"}
            ],
            "usage": {}
        });
        let parsed = extract(&raw);
        assert_eq!(parsed.output, Some(json!("one\ntwo")));
    }

    #[test]
    fn missing_usage_leaves_tokens_unset() {
        let parsed = extract(&json!({"content": []}));
        assert_eq!(parsed.input_tokens, None);
        assert_eq!(parsed.output_tokens, None);
        assert_eq!(parsed.output, None);
    }
}
