//! Per-trace rollups, recomputed from the span set at read time.
//!
//! Nothing here is ever persisted: spans may arrive out of ingest order
//! across batches, so derived counters would drift if stored.

use lens_core::{Span, TraceMetrics};

/// Compute the trace-level metrics for a span set.
///
/// TotalTokens counts input + output of LLM spans only (cache and reasoning
/// tokens excluded); cost sums over every span; duration is the sum of span
/// durations, not the wall-clock extent.
pub fn trace_metrics(spans: &[Span]) -> TraceMetrics {
    TraceMetrics {
        total_spans: spans.len() as u64,
        total_tokens: spans
            .iter()
            .filter(|s| s.is_llm())
            .map(Span::total_tokens)
            .sum(),
        total_cost_usd: spans.iter().filter_map(|s| s.cost_usd).sum(),
        total_duration_ms: spans.iter().filter_map(|s| s.duration_ms).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lens_core::{SpanStatus, SpanType};

    fn span(span_type: SpanType, tokens: (u32, u32), cost: f64, duration: u64) -> Span {
        Span {
            id: lens_core::new_id(),
            trace_id: "T".into(),
            parent_span_id: None,
            span_type,
            name: "s".into(),
            input: None,
            output: None,
            input_tokens: Some(tokens.0),
            output_tokens: Some(tokens.1),
            cache_read_tokens: None,
            cache_write_tokens: None,
            reasoning_tokens: None,
            cost_usd: Some(cost),
            duration_ms: Some(duration),
            first_token_ms: None,
            status: SpanStatus::Success,
            stop_reason: None,
            error_message: None,
            model: None,
            provider: None,
            thinking: None,
            tool_uses: vec![],
            sub_type: None,
            metadata: serde_json::Map::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    #[test]
    fn empty_span_set_is_all_zero() {
        assert_eq!(trace_metrics(&[]), TraceMetrics::default());
    }

    #[test]
    fn tokens_count_llm_spans_only() {
        let spans = vec![
            span(SpanType::Agent, (999, 999), 0.0, 100),
            span(SpanType::Llm, (100, 50), 0.001, 200),
            span(SpanType::Tool, (7, 7), 0.0, 300),
        ];
        let metrics = trace_metrics(&spans);
        assert_eq!(metrics.total_spans, 3);
        assert_eq!(metrics.total_tokens, 150);
        assert_eq!(metrics.total_duration_ms, 600);
    }

    #[test]
    fn cache_tokens_do_not_count() {
        let mut llm = span(SpanType::Llm, (10, 5), 0.0, 0);
        llm.cache_read_tokens = Some(500);
        assert_eq!(trace_metrics(&[llm]).total_tokens, 15);
    }

    #[test]
    fn cost_sums_across_all_span_types() {
        let spans = vec![
            span(SpanType::Llm, (0, 0), 0.003, 0),
            span(SpanType::Llm, (0, 0), 0.006, 0),
            span(SpanType::Tool, (0, 0), 0.0, 0),
        ];
        assert!((trace_metrics(&spans).total_cost_usd - 0.009).abs() < 1e-12);
    }
}
