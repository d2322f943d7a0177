//! Session-JWT dashboard endpoints: project management and project-scoped
//! reads.
//!
//! Ownership is checked on every path that names a project id; a project
//! the caller does not own reads as 404, indistinguishable from one that
//! does not exist.

use crate::analytics_api::RangeQuery;
use crate::auth::SessionUser;
use crate::error::ApiError;
use crate::state::SharedState;
use crate::trace_api::{TraceDetailResponse, TraceListQuery, trace_detail};
use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use lens_core::store::{ProjectStats, SessionSummary};
use lens_core::{Page, PageRequest, Project, TraceWithMetrics, project};
use serde::{Deserialize, Serialize};

/// Resolve a project id against the session user, hiding foreign projects.
async fn owned_project(
    state: &SharedState,
    user: &SessionUser,
    project_id: &str,
) -> Result<Project, ApiError> {
    let found = state.store.project_by_id(project_id).await?;
    match found {
        Some(project) if project.owner_email == user.0.email => Ok(project),
        _ => Err(ApiError::not_found("project")),
    }
}

// ── Project CRUD ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ProjectListResponse {
    pub projects: Vec<Project>,
}

/// `GET /dashboard/projects`
pub async fn list_projects(
    State(state): State<SharedState>,
    user: SessionUser,
) -> Result<Json<ProjectListResponse>, ApiError> {
    let projects = state.store.projects_by_owner(&user.0.email).await?;
    Ok(Json(ProjectListResponse { projects }))
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    name: String,
}

/// The one response that ever carries a plaintext API key.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectWithKey {
    #[serde(flatten)]
    pub project: Project,
    pub api_key: String,
}

/// `POST /dashboard/projects`
pub async fn create_project(
    State(state): State<SharedState>,
    user: SessionUser,
    Json(req): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<ProjectWithKey>), ApiError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::validation("project name must not be empty"));
    }

    let (project, api_key) = Project::new(name, &user.0.email);
    state.store.create_project(&project).await?;
    tracing::info!(project_id = %project.id, "project created");
    Ok((
        StatusCode::CREATED,
        Json(ProjectWithKey { project, api_key }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct UpdateProjectRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    settings: Option<serde_json::Value>,
}

/// `PATCH /dashboard/projects/{id}`
pub async fn update_project(
    State(state): State<SharedState>,
    user: SessionUser,
    Path(project_id): Path<String>,
    Json(req): Json<UpdateProjectRequest>,
) -> Result<Json<Project>, ApiError> {
    owned_project(&state, &user, &project_id).await?;
    state
        .store
        .update_project(&project_id, req.name.as_deref(), req.settings.as_ref())
        .await?;
    let updated = state
        .store
        .project_by_id(&project_id)
        .await?
        .ok_or_else(|| ApiError::not_found("project"))?;
    Ok(Json(updated))
}

/// `DELETE /dashboard/projects/{id}` — cascades to traces and spans.
pub async fn delete_project(
    State(state): State<SharedState>,
    user: SessionUser,
    Path(project_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    owned_project(&state, &user, &project_id).await?;
    state.store.delete_project(&project_id).await?;
    tracing::info!(project_id = %project_id, "project deleted");
    Ok(Json(serde_json::json!({"success": true})))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotatedKeyResponse {
    pub api_key: String,
}

/// `POST /dashboard/projects/{id}/api-key` — mint a new key, atomically
/// replacing the stored hash. The old key stops working immediately.
pub async fn rotate_api_key(
    State(state): State<SharedState>,
    user: SessionUser,
    Path(project_id): Path<String>,
) -> Result<Json<RotatedKeyResponse>, ApiError> {
    owned_project(&state, &user, &project_id).await?;
    let api_key = project::generate_api_key();
    state
        .store
        .rotate_api_key(&project_id, &project::hash_api_key(&api_key))
        .await?;
    tracing::info!(project_id = %project_id, "api key rotated");
    Ok(Json(RotatedKeyResponse { api_key }))
}

// ── Project-scoped reads ──────────────────────────────────────────────

/// `GET /dashboard/projects/{id}/traces`
pub async fn list_traces(
    State(state): State<SharedState>,
    user: SessionUser,
    Path(project_id): Path<String>,
    Query(query): Query<TraceListQuery>,
) -> Result<Json<Page<TraceWithMetrics>>, ApiError> {
    owned_project(&state, &user, &project_id).await?;
    let (filter, page) = query.into_filter()?;
    let result = state.store.list_traces(&project_id, &filter, page).await?;
    Ok(Json(result))
}

/// `GET /dashboard/projects/{id}/traces/{traceId}`
pub async fn get_trace(
    State(state): State<SharedState>,
    user: SessionUser,
    Path((project_id, trace_id)): Path<(String, String)>,
) -> Result<Json<TraceDetailResponse>, ApiError> {
    owned_project(&state, &user, &project_id).await?;
    Ok(Json(trace_detail(&state, &project_id, &trace_id).await?))
}

/// `DELETE /dashboard/projects/{id}/traces`
pub async fn delete_traces(
    State(state): State<SharedState>,
    user: SessionUser,
    Path(project_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    owned_project(&state, &user, &project_id).await?;
    let deleted = state.store.delete_traces(&project_id).await?;
    Ok(Json(serde_json::json!({"success": true, "deleted": deleted})))
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    offset: Option<i64>,
}

/// `GET /dashboard/projects/{id}/sessions`
pub async fn list_sessions(
    State(state): State<SharedState>,
    user: SessionUser,
    Path(project_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<SessionSummary>>, ApiError> {
    owned_project(&state, &user, &project_id).await?;
    let page = PageRequest::new(query.limit, query.offset);
    let result = state.store.list_sessions(&project_id, page).await?;
    Ok(Json(result))
}

/// `GET /dashboard/projects/{id}/stats`
pub async fn stats(
    State(state): State<SharedState>,
    user: SessionUser,
    Path(project_id): Path<String>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<ProjectStats>, ApiError> {
    owned_project(&state, &user, &project_id).await?;
    let (from, to) = range.window();
    let stats = state.store.project_stats(&project_id, from, to).await?;
    Ok(Json(stats))
}
