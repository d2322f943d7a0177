//! The ingest pipeline: parse, assemble, group, persist.
//!
//! One batch flows Parser -> Span Assembler -> group by trace id -> Trace
//! Assembler -> store. Each trace group persists independently: a backend
//! failure for one group is recorded and the remaining groups still run.

pub mod assembler;
pub mod event;
pub mod trace_assembler;

pub use event::{IngestBatch, IngestEvent};

use lens_core::{Span, Store};
use lens_pricing::PricingCatalog;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of one ingest batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    /// Spans successfully persisted.
    pub processed: usize,
    /// Per-event and per-group failures; never aborts the whole batch.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// The transactional boundary of the write path.
pub struct Ingestor {
    store: Arc<dyn Store>,
    catalog: Arc<PricingCatalog>,
}

impl Ingestor {
    pub fn new(store: Arc<dyn Store>, catalog: Arc<PricingCatalog>) -> Self {
        Self { store, catalog }
    }

    /// Ingest a batch for an already-authenticated project.
    ///
    /// An empty batch is valid and reports zero processed spans. Events
    /// without a trace id are rejected individually; they never poison
    /// their siblings.
    pub async fn ingest(&self, project_id: &str, events: Vec<IngestEvent>) -> IngestReport {
        let mut errors = Vec::new();

        // Parse + assemble every event, grouping by trace id in first-seen
        // order so sibling groups persist deterministically.
        let mut group_order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<(IngestEvent, Span)>> = HashMap::new();

        for (index, event) in events.into_iter().enumerate() {
            let Some(trace_id) = event.trace_id.clone().filter(|id| !id.is_empty()) else {
                errors.push(format!("event {index}: missing traceId"));
                continue;
            };

            let parsed = event
                .raw_response
                .as_ref()
                .map(|raw| lens_providers::parse(event.provider.as_deref(), raw));

            let span = assembler::assemble_span(&trace_id, &event, parsed.as_ref(), &self.catalog);

            if !groups.contains_key(&trace_id) {
                group_order.push(trace_id.clone());
            }
            groups.entry(trace_id).or_default().push((event, span));
        }

        let mut processed = 0usize;
        for trace_id in group_order {
            let group = &groups[&trace_id];
            let trace = trace_assembler::assemble_trace(project_id, &trace_id, group);
            let spans: Vec<Span> = group.iter().map(|(_, span)| span.clone()).collect();

            // Trace row first so span inserts never dangle; both calls are
            // idempotent, so a retried batch converges.
            if let Err(e) = self.store.create_or_augment_trace(&trace).await {
                warn!(project_id, trace_id = %trace_id, error = %e, "trace upsert failed");
                errors.push(format!("trace {trace_id}: {e}"));
                continue;
            }
            match self.store.insert_spans(project_id, &spans).await {
                Ok(()) => {
                    debug!(project_id, trace_id = %trace_id, spans = spans.len(), "group persisted");
                    processed += spans.len();
                }
                Err(e) => {
                    warn!(project_id, trace_id = %trace_id, error = %e, "span batch failed");
                    errors.push(format!("trace {trace_id}: {e}"));
                }
            }
        }

        IngestReport { processed, errors }
    }
}
