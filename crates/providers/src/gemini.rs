//! Extractor for the Gemini generateContent response shape.
//!
//! Usage lives under `usageMetadata.{promptTokenCount, candidatesTokenCount,
//! thoughtsTokenCount}`; output is the joined `parts[].text` of the first
//! candidate; function calls are `parts[].functionCall` with inline `args`
//! and no call id (one is synthesized downstream by the tree builder).

use crate::{ParsedResponse, token_count};
use lens_core::ToolUse;
use serde_json::Value;

pub(crate) fn extract(raw: &Value) -> ParsedResponse {
    let usage = &raw["usageMetadata"];
    let candidate = &raw["candidates"][0];

    let mut parsed = ParsedResponse {
        input_tokens: token_count(&usage["promptTokenCount"]),
        output_tokens: token_count(&usage["candidatesTokenCount"]),
        cache_read_tokens: token_count(&usage["cachedContentTokenCount"]),
        reasoning_tokens: token_count(&usage["thoughtsTokenCount"]),
        stop_reason: candidate["finishReason"].as_str().map(str::to_owned),
        ..Default::default()
    };

    let parts = &candidate["content"]["parts"];
    let Some(part_list) = parts.as_array() else {
        return parsed;
    };

    let mut text_parts: Vec<&str> = Vec::new();
    for part in part_list {
        if let Some(text) = part["text"].as_str() {
            text_parts.push(text);
        }
        let call = &part["functionCall"];
        if call.is_object() {
            parsed.tool_uses.push(ToolUse {
                id: String::new(),
                name: call["name"].as_str().unwrap_or_default().to_string(),
                input: call["args"].clone(),
            });
        }
    }

    if !parsed.tool_uses.is_empty() {
        parsed.output = Some(parts.clone());
    } else if !text_parts.is_empty() {
        parsed.output = Some(Value::String(text_parts.join("\n")));
    }

    parsed
}
