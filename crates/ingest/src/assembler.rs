//! Span assembly: merge one SDK event with its parsed provider response
//! into a canonical span record.
//!
//! Precedence is field-by-field: SDK-supplied values always win over
//! parser-derived values, and zero is a valid preserved token count,
//! distinct from absent. Cost is derived here from the final model and
//! token counts; whatever the wire claimed is ignored.

use crate::event::IngestEvent;
use chrono::{Duration, Utc};
use lens_core::{Span, SpanStatus, SpanSubType, SpanType, new_id};
use lens_pricing::PricingCatalog;
use lens_providers::ParsedResponse;

/// Assemble a canonical span from an event and the optional parse of its
/// raw provider payload. `trace_id` has already been validated by the
/// orchestrator.
pub fn assemble_span(
    trace_id: &str,
    event: &IngestEvent,
    parsed: Option<&ParsedResponse>,
    catalog: &PricingCatalog,
) -> Span {
    let span_type = SpanType::parse_or_default(event.span_type.as_deref());

    let input_tokens = event
        .input_tokens
        .or_else(|| parsed.and_then(|p| p.input_tokens));
    let output_tokens = event
        .output_tokens
        .or_else(|| parsed.and_then(|p| p.output_tokens));
    let cache_read_tokens = event
        .cache_read_tokens
        .or_else(|| parsed.and_then(|p| p.cache_read_tokens));
    let cache_write_tokens = event
        .cache_write_tokens
        .or_else(|| parsed.and_then(|p| p.cache_write_tokens));
    let reasoning_tokens = event
        .reasoning_tokens
        .or_else(|| parsed.and_then(|p| p.reasoning_tokens));

    let model = event.model.clone();
    let stop_reason = event
        .stop_reason
        .clone()
        .or_else(|| parsed.and_then(|p| p.stop_reason.clone()));
    let thinking = event
        .thinking
        .clone()
        .or_else(|| parsed.and_then(|p| p.thinking.clone()));
    let tool_uses = event
        .tool_uses
        .clone()
        .or_else(|| {
            parsed.and_then(|p| (!p.tool_uses.is_empty()).then(|| p.tool_uses.clone()))
        })
        .unwrap_or_default();
    let sub_type = event
        .sub_type
        .as_deref()
        .and_then(SpanSubType::parse)
        .or_else(|| parsed.and_then(|p| p.sub_type));
    let output = event
        .output
        .clone()
        .or_else(|| parsed.and_then(|p| p.output.clone()));

    let cost_usd = derive_cost(
        catalog,
        model.as_deref(),
        input_tokens,
        output_tokens,
        cache_read_tokens,
        cache_write_tokens,
    );

    let started_at = event.started_at().unwrap_or_else(Utc::now);
    let ended_at = event
        .duration_ms
        .map(|ms| started_at + Duration::milliseconds(ms as i64));

    let name = event.name.clone().unwrap_or_else(|| {
        model
            .clone()
            .unwrap_or_else(|| span_type.as_str().to_string())
    });

    Span {
        id: event.span_id.clone().unwrap_or_else(new_id),
        trace_id: trace_id.to_string(),
        parent_span_id: event.parent_span_id.clone(),
        span_type,
        name,
        input: event.input.clone(),
        output,
        input_tokens,
        output_tokens,
        cache_read_tokens,
        cache_write_tokens,
        reasoning_tokens,
        cost_usd: Some(cost_usd),
        duration_ms: event.duration_ms,
        first_token_ms: event.first_token_ms,
        status: SpanStatus::parse_or_default(event.status.as_deref()),
        stop_reason,
        error_message: event.error_message.clone(),
        model,
        provider: event.provider.clone(),
        thinking,
        tool_uses,
        sub_type,
        metadata: event.metadata.clone().unwrap_or_default(),
        started_at,
        ended_at,
    }
}

/// Cost from the pricing catalog. Spans without a model (tool, retrieval,
/// embedding) cost zero without touching the catalog, so its unknown-model
/// observation stays meaningful.
fn derive_cost(
    catalog: &PricingCatalog,
    model: Option<&str>,
    input: Option<u32>,
    output: Option<u32>,
    cache_read: Option<u32>,
    cache_write: Option<u32>,
) -> f64 {
    match model {
        Some(model) => catalog.cost(
            model,
            input.unwrap_or(0),
            output.unwrap_or(0),
            cache_read.unwrap_or(0),
            cache_write.unwrap_or(0),
        ),
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(json: serde_json::Value) -> IngestEvent {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn preserves_client_supplied_ids_verbatim() {
        let e = event(json!({
            "traceId": "T1", "spanId": "S1", "parentSpanId": "P1", "spanType": "tool"
        }));
        let span = assemble_span("T1", &e, None, &PricingCatalog::default());
        assert_eq!(span.id, "S1");
        assert_eq!(span.trace_id, "T1");
        assert_eq!(span.parent_span_id.as_deref(), Some("P1"));
    }

    #[test]
    fn generates_id_only_when_absent() {
        let e = event(json!({"traceId": "T1"}));
        let span = assemble_span("T1", &e, None, &PricingCatalog::default());
        assert_eq!(span.id.len(), 32);
    }

    #[test]
    fn sdk_tokens_win_over_parser_per_field() {
        let parsed = ParsedResponse {
            input_tokens: Some(10),
            output_tokens: Some(5),
            cache_read_tokens: Some(500),
            ..Default::default()
        };
        // SDK supplies output_tokens = 0: zero must be preserved, and the
        // parser's input/cache values fill the gaps.
        let e = event(json!({"traceId": "T1", "outputTokens": 0}));
        let span = assemble_span("T1", &e, Some(&parsed), &PricingCatalog::default());
        assert_eq!(span.input_tokens, Some(10));
        assert_eq!(span.output_tokens, Some(0));
        assert_eq!(span.cache_read_tokens, Some(500));
    }

    #[test]
    fn parser_fills_output_stop_reason_and_sub_type() {
        let parsed = lens_providers::parse(
            Some("anthropic"),
            &json!({
                "content": [{"type": "text", "text": "Hi"}],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 10, "output_tokens": 5,
                          "cache_read_input_tokens": 500}
            }),
        );
        let e = event(json!({"traceId": "T1", "spanId": "S1", "provider": "anthropic"}));
        let span = assemble_span("T1", &e, Some(&parsed), &PricingCatalog::default());
        assert_eq!(span.input_tokens, Some(10));
        assert_eq!(span.output_tokens, Some(5));
        assert_eq!(span.cache_read_tokens, Some(500));
        assert_eq!(span.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(span.output, Some(json!("Hi")));
        assert_eq!(span.sub_type, Some(SpanSubType::Response));
    }

    #[test]
    fn sdk_output_wins_over_parser_output() {
        let parsed = ParsedResponse {
            output: Some(json!("parser text")),
            ..Default::default()
        };
        let e = event(json!({"traceId": "T1", "output": "sdk text"}));
        let span = assemble_span("T1", &e, Some(&parsed), &PricingCatalog::default());
        assert_eq!(span.output, Some(json!("sdk text")));
    }

    #[test]
    fn unknown_type_defaults_to_llm() {
        let e = event(json!({"traceId": "T1", "spanType": "mystery"}));
        let span = assemble_span("T1", &e, None, &PricingCatalog::default());
        assert_eq!(span.span_type, SpanType::Llm);
    }

    #[test]
    fn cost_is_derived_from_catalog() {
        let e = event(json!({
            "traceId": "T1", "model": "gpt-4o",
            "inputTokens": 1000, "outputTokens": 500
        }));
        let span = assemble_span("T1", &e, None, &PricingCatalog::default());
        assert!((span.cost_usd.unwrap() - 0.0075).abs() < 1e-12);
    }

    #[test]
    fn tool_span_without_tokens_costs_zero() {
        let e = event(json!({"traceId": "T1", "spanType": "tool", "name": "search"}));
        let span = assemble_span("T1", &e, None, &PricingCatalog::default());
        assert_eq!(span.cost_usd, Some(0.0));
    }

    #[test]
    fn malformed_timestamp_falls_back_to_now() {
        let e = event(json!({"traceId": "T1", "timestamp": "not-a-date"}));
        let before = Utc::now();
        let span = assemble_span("T1", &e, None, &PricingCatalog::default());
        assert!(span.started_at >= before);
    }

    #[test]
    fn ended_at_derives_from_duration() {
        let e = event(json!({
            "traceId": "T1", "timestamp": "2026-03-01T12:00:00Z", "durationMs": 1500
        }));
        let span = assemble_span("T1", &e, None, &PricingCatalog::default());
        let delta = span.ended_at.unwrap() - span.started_at;
        assert_eq!(delta.num_milliseconds(), 1500);
    }

    #[test]
    fn name_falls_back_to_model_then_type() {
        let e = event(json!({"traceId": "T1", "model": "gpt-4o"}));
        let span = assemble_span("T1", &e, None, &PricingCatalog::default());
        assert_eq!(span.name, "gpt-4o");

        let e = event(json!({"traceId": "T1", "spanType": "retrieval"}));
        let span = assemble_span("T1", &e, None, &PricingCatalog::default());
        assert_eq!(span.name, "retrieval");
    }
}
