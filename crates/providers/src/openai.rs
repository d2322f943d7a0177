//! Extractor for the OpenAI chat-completions response shape.
//!
//! Usage lives under `usage.{prompt_tokens, completion_tokens}` with
//! reasoning tokens nested in `completion_tokens_details` and cached prompt
//! tokens in `prompt_tokens_details`; output is the message content string
//! of the first choice; tool calls carry a JSON-string `arguments` field
//! that is decoded here.

use crate::{ParsedResponse, token_count};
use lens_core::ToolUse;
use serde_json::Value;

pub(crate) fn extract(raw: &Value) -> ParsedResponse {
    let usage = &raw["usage"];
    let message = &raw["choices"][0]["message"];

    let mut parsed = ParsedResponse {
        input_tokens: token_count(&usage["prompt_tokens"]),
        output_tokens: token_count(&usage["completion_tokens"]),
        reasoning_tokens: token_count(&usage["completion_tokens_details"]["reasoning_tokens"]),
        cache_read_tokens: token_count(&usage["prompt_tokens_details"]["cached_tokens"]),
        stop_reason: raw["choices"][0]["finish_reason"].as_str().map(str::to_owned),
        ..Default::default()
    };

    if let Some(content) = message["content"].as_str() {
        if !content.is_empty() {
            parsed.output = Some(Value::String(content.to_string()));
        }
    }

    if let Some(calls) = message["tool_calls"].as_array() {
        for call in calls {
            let function = &call["function"];
            // Arguments arrive as a JSON-encoded string; fall back to the
            // raw string when it does not decode.
            let args = function["arguments"].as_str().map_or(Value::Null, |s| {
                serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.to_string()))
            });
            parsed.tool_uses.push(ToolUse {
                id: call["id"].as_str().unwrap_or_default().to_string(),
                name: function["name"].as_str().unwrap_or_default().to_string(),
                input: args,
            });
        }
    }

    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use lens_core::SpanSubType;
    use serde_json::json;

    #[test]
    fn plain_completion() {
        let raw = json!({
            "choices": [{"message": {"content": "Hello!"}, "finish_reason": "stop"}],
            "usage": {
                "prompt_tokens": 1000,
                "completion_tokens": 500,
                "completion_tokens_details": {"reasoning_tokens": 128}
            }
        });
        let parsed = crate::parse(Some("openai"), &raw);
        assert_eq!(parsed.input_tokens, Some(1000));
        assert_eq!(parsed.output_tokens, Some(500));
        assert_eq!(parsed.reasoning_tokens, Some(128));
        assert_eq!(parsed.stop_reason.as_deref(), Some("stop"));
        assert_eq!(parsed.output, Some(json!("Hello!")));
        assert_eq!(parsed.sub_type, Some(SpanSubType::Response));
    }

    #[test]
    fn tool_call_arguments_decode_from_json_string() {
        let raw = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "get_weather", "arguments": "{\"city\":\"Oslo\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 40, "completion_tokens": 12}
        });
        let parsed = crate::parse(Some("openai"), &raw);
        assert_eq!(parsed.tool_uses.len(), 1);
        assert_eq!(parsed.tool_uses[0].id, "call_abc");
        assert_eq!(parsed.tool_uses[0].name, "get_weather");
        assert_eq!(parsed.tool_uses[0].input["city"], "Oslo");
        assert_eq!(parsed.sub_type, Some(SpanSubType::Planning));
    }

    #[test]
    fn malformed_arguments_fall_back_to_raw_string() {
        let raw = json!({
            "choices": [{
                "message": {
                    "tool_calls": [{
                        "id": "call_1",
                        "function": {"name": "f", "arguments": "not json"}
                    }]
                }
            }]
        });
        let parsed = extract(&raw);
        assert_eq!(parsed.tool_uses[0].input, json!("not json"));
    }

    #[test]
    fn cached_prompt_tokens_are_read() {
        let raw = json!({
            "choices": [{"message": {"content": "ok"}}],
            "usage": {
                "prompt_tokens": 100,
                "completion_tokens": 5,
                "prompt_tokens_details": {"cached_tokens": 64}
            }
        });
        let parsed = extract(&raw);
        assert_eq!(parsed.cache_read_tokens, Some(64));
    }

    #[test]
    fn empty_choices_is_fine() {
        let parsed = extract(&json!({"choices": []}));
        assert_eq!(parsed.output, None);
        assert!(parsed.tool_uses.is_empty());
    }
}
