//! SDK-facing trace endpoints, scoped to the API key's project.

use crate::auth::ApiKeyProject;
use crate::error::ApiError;
use crate::state::SharedState;
use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use lens_core::store::{TraceFilter, TraceUpdate};
use lens_core::{
    Page, PageRequest, Span, Trace, TraceMetrics, TraceStatus, TraceWithMetrics, new_id,
};
use lens_engine::SpanNode;
use lens_ingest::IngestEvent;
use serde::{Deserialize, Serialize};

// ── Listing ───────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceListQuery {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

impl TraceListQuery {
    pub fn into_filter(self) -> Result<(TraceFilter, PageRequest), ApiError> {
        let status = match self.status.as_deref() {
            None => None,
            Some(s) => Some(
                TraceStatus::parse(s)
                    .ok_or_else(|| ApiError::validation(format!("unknown status: {s}")))?,
            ),
        };
        Ok((
            TraceFilter {
                session_id: self.session_id,
                user_id: self.user_id,
                status,
                from: self.from,
                to: self.to,
            },
            PageRequest::new(self.limit, self.offset),
        ))
    }
}

/// `GET /traces`
pub async fn list_traces(
    State(state): State<SharedState>,
    ApiKeyProject(project): ApiKeyProject,
    Query(query): Query<TraceListQuery>,
) -> Result<Json<Page<TraceWithMetrics>>, ApiError> {
    let (filter, page) = query.into_filter()?;
    let result = state.store.list_traces(&project.id, &filter, page).await?;
    Ok(Json(result))
}

// ── Single trace ──────────────────────────────────────────────────────

/// A trace with read-time metrics, its flat span list, and the assembled
/// tree.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceDetailResponse {
    #[serde(flatten)]
    pub trace: Trace,
    #[serde(flatten)]
    pub metrics: TraceMetrics,
    pub spans: Vec<Span>,
    pub span_tree: Vec<SpanNode>,
}

/// Shared read path for the SDK and dashboard trace views.
pub async fn trace_detail(
    state: &SharedState,
    project_id: &str,
    trace_id: &str,
) -> Result<TraceDetailResponse, ApiError> {
    let stored = state
        .store
        .trace_with_spans(project_id, trace_id)
        .await?
        .ok_or_else(|| ApiError::not_found("trace"))?;

    let metrics = lens_engine::trace_metrics(&stored.spans);
    let span_tree = lens_engine::build_tree(&stored.spans);
    Ok(TraceDetailResponse {
        trace: stored.trace,
        metrics,
        spans: stored.spans,
        span_tree,
    })
}

/// `GET /traces/{id}`
pub async fn get_trace(
    State(state): State<SharedState>,
    ApiKeyProject(project): ApiKeyProject,
    Path(trace_id): Path<String>,
) -> Result<Json<TraceDetailResponse>, ApiError> {
    Ok(Json(trace_detail(&state, &project.id, &trace_id).await?))
}

// ── Creation / update ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTraceRequest {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

/// `POST /traces` — explicit trace creation ahead of span ingest.
pub async fn create_trace(
    State(state): State<SharedState>,
    ApiKeyProject(project): ApiKeyProject,
    Json(req): Json<CreateTraceRequest>,
) -> Result<(StatusCode, Json<Trace>), ApiError> {
    let now = Utc::now();
    let trace = Trace {
        id: req.id.filter(|id| !id.is_empty()).unwrap_or_else(new_id),
        project_id: project.id.clone(),
        name: req.name,
        session_id: req.session_id,
        user_id: req.user_id,
        status: TraceStatus::Active,
        tags: req.tags.unwrap_or_default(),
        metadata: req.metadata.unwrap_or_default(),
        created_at: now,
        updated_at: now,
    };
    state.store.create_or_augment_trace(&trace).await?;
    Ok((StatusCode::CREATED, Json(trace)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchTraceRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

/// `PATCH /traces/{id}` — rename, attach metadata, or move the trace to a
/// terminal status. Ingest never does this; only this endpoint does.
pub async fn patch_trace(
    State(state): State<SharedState>,
    ApiKeyProject(project): ApiKeyProject,
    Path(trace_id): Path<String>,
    Json(req): Json<PatchTraceRequest>,
) -> Result<Json<Trace>, ApiError> {
    let status = match req.status.as_deref() {
        None => None,
        Some(s) => Some(
            TraceStatus::parse(s)
                .ok_or_else(|| ApiError::validation(format!("unknown status: {s}")))?,
        ),
    };
    let update = TraceUpdate {
        name: req.name,
        status,
        metadata: req.metadata,
    };
    state.store.update_trace(&project.id, &trace_id, &update).await?;

    let stored = state
        .store
        .trace_with_spans(&project.id, &trace_id)
        .await?
        .ok_or_else(|| ApiError::not_found("trace"))?;
    Ok(Json(stored.trace))
}

// ── Span append ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct AppendSpansResponse {
    pub success: bool,
    pub processed: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// `POST /traces/{id}/spans` — append spans to a known trace. Accepts a
/// single event object or an array; the path id overrides any traceId in
/// the body.
pub async fn append_spans(
    State(state): State<SharedState>,
    ApiKeyProject(project): ApiKeyProject,
    Path(trace_id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<AppendSpansResponse>, ApiError> {
    let mut events: Vec<IngestEvent> = if body.is_array() {
        serde_json::from_value(body).map_err(|e| ApiError::validation(e.to_string()))?
    } else {
        vec![serde_json::from_value(body).map_err(|e| ApiError::validation(e.to_string()))?]
    };
    for event in &mut events {
        event.trace_id = Some(trace_id.clone());
    }

    let report = state.ingestor.ingest(&project.id, events).await;
    Ok(Json(AppendSpansResponse {
        success: true,
        processed: report.processed,
        errors: report.errors,
    }))
}
