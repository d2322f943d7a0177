//! Analytics endpoints over the API key's project: summary stats and the
//! bucketed usage time series.

use crate::auth::ApiKeyProject;
use crate::error::ApiError;
use crate::state::SharedState;
use axum::extract::{Json, Query, State};
use chrono::{DateTime, Duration, Utc};
use lens_core::store::{Granularity, ProjectStats, UsageBucket};
use serde::{Deserialize, Serialize};

/// Window applied when the caller gives no bounds.
const DEFAULT_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

impl RangeQuery {
    pub fn window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let to = self.to.unwrap_or_else(Utc::now);
        let from = self.from.unwrap_or(to - Duration::days(DEFAULT_WINDOW_DAYS));
        (from, to)
    }
}

/// `GET /analytics/summary`
pub async fn summary(
    State(state): State<SharedState>,
    ApiKeyProject(project): ApiKeyProject,
    Query(range): Query<RangeQuery>,
) -> Result<Json<ProjectStats>, ApiError> {
    let (from, to) = range.window();
    let stats = state.store.project_stats(&project.id, from, to).await?;
    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    #[serde(default)]
    pub granularity: Option<String>,
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub granularity: Granularity,
    pub data: Vec<UsageBucket>,
}

/// `GET /analytics/usage?granularity=hour|day|week`
pub async fn usage(
    State(state): State<SharedState>,
    ApiKeyProject(project): ApiKeyProject,
    Query(query): Query<UsageQuery>,
) -> Result<Json<UsageResponse>, ApiError> {
    let granularity = match query.granularity.as_deref() {
        None => Granularity::Day,
        Some(g) => Granularity::parse(g)
            .ok_or_else(|| ApiError::validation(format!("unknown granularity: {g}")))?,
    };
    let range = RangeQuery {
        from: query.from,
        to: query.to,
    };
    let (from, to) = range.window();
    let data = state
        .store
        .usage_series(&project.id, from, to, granularity)
        .await?;
    Ok(Json(UsageResponse { granularity, data }))
}
