//! Extractor for AWS Bedrock responses.
//!
//! Bedrock has two shapes: the Converse API (`output.message.content` with
//! camelCase usage keys) and InvokeModel, which for Anthropic models passes
//! the Messages API body through unchanged. The presence of
//! `output.message.content` discriminates; everything else defers to the
//! anthropic extractor.

use crate::{ParsedResponse, anthropic, token_count};
use lens_core::ToolUse;
use serde_json::Value;

pub(crate) fn extract(raw: &Value) -> ParsedResponse {
    if raw["output"]["message"]["content"].is_array() {
        extract_converse(raw)
    } else {
        anthropic::extract(raw)
    }
}

fn extract_converse(raw: &Value) -> ParsedResponse {
    let usage = &raw["usage"];
    let mut parsed = ParsedResponse {
        input_tokens: token_count(&usage["inputTokens"]),
        output_tokens: token_count(&usage["outputTokens"]),
        cache_read_tokens: token_count(&usage["cacheReadInputTokens"]),
        cache_write_tokens: token_count(&usage["cacheWriteInputTokens"]),
        stop_reason: raw["stopReason"].as_str().map(str::to_owned),
        ..Default::default()
    };

    let content = &raw["output"]["message"]["content"];
    let Some(blocks) = content.as_array() else {
        return parsed;
    };

    let mut text_parts: Vec<&str> = Vec::new();
    for block in blocks {
        if let Some(text) = block["text"].as_str() {
            text_parts.push(text);
        }
        let tool_use = &block["toolUse"];
        if tool_use.is_object() {
            parsed.tool_uses.push(ToolUse {
                id: tool_use["toolUseId"].as_str().unwrap_or_default().to_string(),
                name: tool_use["name"].as_str().unwrap_or_default().to_string(),
                input: tool_use["input"].clone(),
            });
        }
    }

    if !parsed.tool_uses.is_empty() {
        parsed.output = Some(content.clone());
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
    fn converse_text_response() {
        let raw = json!({
            "output": {"message": {"role": "assistant",
                "content": [{"text": "The answer is 4."}]}},
            "stopReason": "end_turn",
            "usage": {"inputTokens": 25, "outputTokens": 8}
        });
        let parsed = crate::parse(Some("bedrock"), &raw);
        assert_eq!(parsed.input_tokens, Some(25));
        assert_eq!(parsed.output_tokens, Some(8));
        assert_eq!(parsed.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(parsed.output, Some(json!("The answer is 4.")));
        assert_eq!(parsed.sub_type, Some(SpanSubType::Response));
    }

    #[test]
    fn converse_tool_use() {
        let raw = json!({
            "output": {"message": {"content": [
                {"toolUse": {"toolUseId": "tooluse_X", "name": "lookup",
                             "input": {"sku": "A1"}}}
            ]}},
            "stopReason": "tool_use",
            "usage": {"inputTokens": 30, "outputTokens": 15}
        });
        let parsed = crate::parse(Some("bedrock"), &raw);
        assert_eq!(parsed.tool_uses.len(), 1);
        assert_eq!(parsed.tool_uses[0].id, "tooluse_X");
        assert_eq!(parsed.tool_uses[0].name, "lookup");
        assert_eq!(parsed.sub_type, Some(SpanSubType::Planning));
        assert!(parsed.output.as_ref().unwrap().is_array());
    }

    #[test]
    fn invoke_model_falls_through_to_anthropic_shape() {
        let raw = json!({
            "content": [{"type": "text", "text": "Hi"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        });
        let parsed = crate::parse(Some("bedrock"), &raw);
        assert_eq!(parsed.input_tokens, Some(10));
        assert_eq!(parsed.output, Some(json!("Hi")));
        assert_eq!(parsed.stop_reason.as_deref(), Some("end_turn"));
    }
}
