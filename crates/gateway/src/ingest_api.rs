//! The SDK write path: `POST /ingest`.

use crate::auth::ApiKeyProject;
use crate::error::ApiError;
use crate::state::SharedState;
use axum::extract::{Json, State};
use lens_ingest::IngestBatch;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub success: bool,
    pub processed: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// `POST /ingest` — accept a batch of SDK events for the key's project.
///
/// Always 200 once authenticated: per-event and per-group failures come
/// back in the body, never as a failed request.
pub async fn ingest(
    State(state): State<SharedState>,
    ApiKeyProject(project): ApiKeyProject,
    Json(batch): Json<IngestBatch>,
) -> Result<Json<IngestResponse>, ApiError> {
    let event_count = batch.events.len();
    let report = state.ingestor.ingest(&project.id, batch.events).await;
    tracing::debug!(
        project_id = %project.id,
        events = event_count,
        processed = report.processed,
        errors = report.errors.len(),
        "ingest batch complete"
    );
    Ok(Json(IngestResponse {
        success: true,
        processed: report.processed,
        errors: report.errors,
    }))
}
