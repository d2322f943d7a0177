//! Best-effort extractor for payloads no known format claims.
//!
//! Tries each known token-location tuple in the same order as the format
//! table (OpenAI, Anthropic, Bedrock Converse, Gemini), takes the first
//! output path that yields text, and records which fields it could not
//! populate.

use crate::{ParsedResponse, token_count};
use serde_json::Value;

pub(crate) fn extract(raw: &Value) -> ParsedResponse {
    let mut parsed = ParsedResponse::default();

    // Token tuples in table order; first tuple with an input count wins.
    let token_paths: [(&Value, &Value); 4] = [
        (&raw["usage"]["prompt_tokens"], &raw["usage"]["completion_tokens"]),
        (&raw["usage"]["input_tokens"], &raw["usage"]["output_tokens"]),
        (&raw["usage"]["inputTokens"], &raw["usage"]["outputTokens"]),
        (
            &raw["usageMetadata"]["promptTokenCount"],
            &raw["usageMetadata"]["candidatesTokenCount"],
        ),
    ];
    for (input, output) in token_paths {
        if let Some(tokens) = token_count(input) {
            parsed.input_tokens = Some(tokens);
            parsed.output_tokens = token_count(output);
            break;
        }
    }
    parsed.cache_read_tokens = token_count(&raw["usage"]["cache_read_input_tokens"]);
    parsed.cache_write_tokens = token_count(&raw["usage"]["cache_creation_input_tokens"]);

    parsed.output = first_output(raw);

    parsed.stop_reason = [
        &raw["choices"][0]["finish_reason"],
        &raw["stop_reason"],
        &raw["stopReason"],
        &raw["candidates"][0]["finishReason"],
    ]
    .into_iter()
    .find_map(|v| v.as_str())
    .map(str::to_owned);

    let mut missing: Vec<&str> = Vec::new();
    if parsed.input_tokens.is_none() {
        missing.push("input_tokens");
    }
    if parsed.output_tokens.is_none() {
        missing.push("output_tokens");
    }
    if parsed.output.is_none() {
        missing.push("output");
    }
    if parsed.stop_reason.is_none() {
        missing.push("stop_reason");
    }
    if !missing.is_empty() {
        tracing::debug!(?missing, "generic extractor could not populate all fields");
    }

    parsed
}

/// Try each known output location in table order.
fn first_output(raw: &Value) -> Option<Value> {
    if let Some(content) = raw["choices"][0]["message"]["content"].as_str() {
        if !content.is_empty() {
            return Some(Value::String(content.to_string()));
        }
    }
    for blocks in [
        &raw["content"],
        &raw["output"]["message"]["content"],
        &raw["candidates"][0]["content"]["parts"],
    ] {
        if let Some(text) = join_text_blocks(blocks) {
            return Some(Value::String(text));
        }
    }
    None
}

/// Join the `text` fields of an array of blocks, if any.
fn join_text_blocks(blocks: &Value) -> Option<String> {
    let parts: Vec<&str> = blocks
        .as_array()?
        .iter()
        .filter_map(|b| b["text"].as_str())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn snake_case_usage_tuple() {
        let parsed = extract(&json!({
            "usage": {"prompt_tokens": 7, "completion_tokens": 3}
        }));
        assert_eq!(parsed.input_tokens, Some(7));
        assert_eq!(parsed.output_tokens, Some(3));
    }

    #[test]
    fn camel_case_usage_tuple() {
        let parsed = extract(&json!({
            "usage": {"inputTokens": 11, "outputTokens": 6}
        }));
        assert_eq!(parsed.input_tokens, Some(11));
        assert_eq!(parsed.output_tokens, Some(6));
    }

    #[test]
    fn first_tuple_wins() {
        let parsed = extract(&json!({
            "usage": {"prompt_tokens": 1, "completion_tokens": 2,
                      "input_tokens": 100, "output_tokens": 200}
        }));
        assert_eq!(parsed.input_tokens, Some(1));
        assert_eq!(parsed.output_tokens, Some(2));
    }

    #[test]
    fn finds_text_in_unclaimed_content_array() {
        let parsed = extract(&json!({
            "content": [{"text": "fragment"}],
            "stopReason": "done"
        }));
        assert_eq!(parsed.output, Some(json!("fragment")));
        assert_eq!(parsed.stop_reason.as_deref(), Some("done"));
    }

    #[test]
    fn empty_payload_yields_empty_parse() {
        let parsed = extract(&json!({}));
        assert_eq!(parsed, ParsedResponse::default());
    }
}
