//! Trace assembly: derive the trace row a batch group belongs to.
//!
//! Name priority is structural first: an agent span's name beats the
//! `metadata._traceName` convention, which beats leaving the name unset.
//! Within one batch the last agent span wins; across batches the store's
//! augment semantics keep the first non-empty writer.

use crate::event::IngestEvent;
use chrono::Utc;
use lens_core::{Span, SpanType, Trace, TraceStatus};

/// Metadata key consulted when no agent span names the trace.
const TRACE_NAME_KEY: &str = "_traceName";

/// Build the trace seed for one ingest group. The store either creates the
/// trace from this seed or fills unset fields of the existing row from it.
pub fn assemble_trace(
    project_id: &str,
    trace_id: &str,
    group: &[(IngestEvent, Span)],
) -> Trace {
    let created_at = group
        .iter()
        .map(|(_, span)| span.started_at)
        .min()
        .unwrap_or_else(Utc::now);

    // Per-field inheritance: the first event supplying a value wins.
    let session_id = group.iter().find_map(|(e, _)| e.session_id.clone());
    let user_id = group.iter().find_map(|(e, _)| e.user_id.clone());
    let tags = group
        .iter()
        .find_map(|(e, _)| e.tags.clone())
        .unwrap_or_default();
    let metadata = group
        .iter()
        .find_map(|(e, _)| e.metadata.clone())
        .unwrap_or_default();

    let name = derive_name(group);

    Trace {
        id: trace_id.to_string(),
        project_id: project_id.to_string(),
        name,
        session_id,
        user_id,
        status: TraceStatus::Active,
        tags,
        metadata,
        created_at,
        updated_at: Utc::now(),
    }
}

/// Agent span name (last one in the batch), then `metadata._traceName`,
/// then unset.
fn derive_name(group: &[(IngestEvent, Span)]) -> Option<String> {
    let agent_name = group
        .iter()
        .filter(|(_, span)| span.span_type == SpanType::Agent)
        .next_back()
        .map(|(_, span)| span.name.clone());
    if agent_name.is_some() {
        return agent_name;
    }

    group.iter().find_map(|(_, span)| {
        span.metadata
            .get(TRACE_NAME_KEY)
            .and_then(|v| v.as_str())
            .map(str::to_owned)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::assemble_span;
    use lens_pricing::PricingCatalog;
    use serde_json::json;

    fn pair(raw: serde_json::Value) -> (IngestEvent, Span) {
        let event: IngestEvent = serde_json::from_value(raw).unwrap();
        let trace_id = event.trace_id.clone().unwrap();
        let span = assemble_span(&trace_id, &event, None, &PricingCatalog::empty());
        (event, span)
    }

    #[test]
    fn agent_span_names_the_trace() {
        let group = vec![
            pair(json!({"traceId": "T", "spanId": "A", "spanType": "agent",
                        "name": "sales-agent", "sessionId": "c1"})),
            pair(json!({"traceId": "T", "spanId": "L", "spanType": "llm",
                        "parentSpanId": "A"})),
        ];
        let trace = assemble_trace("p1", "T", &group);
        assert_eq!(trace.name.as_deref(), Some("sales-agent"));
        assert_eq!(trace.session_id.as_deref(), Some("c1"));
        assert_eq!(trace.status, TraceStatus::Active);
    }

    #[test]
    fn last_agent_span_wins_within_batch() {
        let group = vec![
            pair(json!({"traceId": "T", "spanType": "agent", "name": "first"})),
            pair(json!({"traceId": "T", "spanType": "agent", "name": "second"})),
        ];
        let trace = assemble_trace("p1", "T", &group);
        assert_eq!(trace.name.as_deref(), Some("second"));
    }

    #[test]
    fn metadata_trace_name_is_the_fallback() {
        let group = vec![pair(json!({
            "traceId": "T", "spanType": "llm",
            "metadata": {"_traceName": "checkout-flow"}
        }))];
        let trace = assemble_trace("p1", "T", &group);
        assert_eq!(trace.name.as_deref(), Some("checkout-flow"));
    }

    #[test]
    fn agent_name_beats_metadata_name() {
        let group = vec![
            pair(json!({"traceId": "T", "spanType": "llm",
                        "metadata": {"_traceName": "from-metadata"}})),
            pair(json!({"traceId": "T", "spanType": "agent", "name": "from-agent"})),
        ];
        let trace = assemble_trace("p1", "T", &group);
        assert_eq!(trace.name.as_deref(), Some("from-agent"));
    }

    #[test]
    fn name_stays_unset_without_hints() {
        let group = vec![pair(json!({"traceId": "T", "spanType": "tool", "name": "grep"}))];
        let trace = assemble_trace("p1", "T", &group);
        assert_eq!(trace.name, None);
    }

    #[test]
    fn created_at_is_earliest_span_start() {
        let group = vec![
            pair(json!({"traceId": "T", "timestamp": "2026-03-01T12:00:05Z"})),
            pair(json!({"traceId": "T", "timestamp": "2026-03-01T12:00:01Z"})),
            pair(json!({"traceId": "T", "timestamp": "2026-03-01T12:00:09Z"})),
        ];
        let trace = assemble_trace("p1", "T", &group);
        assert_eq!(
            trace.created_at.to_rfc3339(),
            "2026-03-01T12:00:01+00:00"
        );
    }

    #[test]
    fn first_supplier_wins_per_field() {
        let group = vec![
            pair(json!({"traceId": "T", "userId": "u9"})),
            pair(json!({"traceId": "T", "sessionId": "s1", "userId": "u1"})),
        ];
        let trace = assemble_trace("p1", "T", &group);
        assert_eq!(trace.session_id.as_deref(), Some("s1"));
        assert_eq!(trace.user_id.as_deref(), Some("u9"));
    }
}
