//! Health probes: `/health` (with optional verbose block), `/health/live`,
//! `/health/ready`.

use crate::state::SharedState;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use lens_core::store::StoreCheck;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Ceiling for the backend probe.
const PING_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct HealthQuery {
    #[serde(default)]
    verbose: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_seconds: i64,
    checks: HealthChecks,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<SystemInfo>,
}

#[derive(Debug, Serialize)]
struct HealthChecks {
    store: StoreCheck,
}

#[derive(Debug, Serialize)]
struct SystemInfo {
    os: &'static str,
    arch: &'static str,
    backend: String,
}

async fn probe_store(state: &SharedState) -> StoreCheck {
    let start = Instant::now();
    let outcome = tokio::time::timeout(PING_TIMEOUT, state.store.ping()).await;
    let latency_ms = start.elapsed().as_millis() as u64;
    match outcome {
        Ok(Ok(())) => StoreCheck {
            status: "ok",
            latency_ms,
            error: None,
        },
        Ok(Err(e)) => StoreCheck {
            status: "error",
            latency_ms,
            error: Some(e.to_string()),
        },
        Err(_) => StoreCheck {
            status: "error",
            latency_ms,
            error: Some("ping timed out".into()),
        },
    }
}

/// `GET /health[?verbose=true]` — 200 when every check passes, 503 when
/// degraded.
pub async fn health(
    State(state): State<SharedState>,
    Query(query): Query<HealthQuery>,
) -> Response {
    let store_check = probe_store(&state).await;
    let degraded = store_check.status != "ok";

    let body = HealthResponse {
        status: if degraded { "degraded" } else { "ok" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
        checks: HealthChecks { store: store_check },
        system: query.verbose.then(|| SystemInfo {
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            backend: state.store.name().to_string(),
        }),
    };

    let status = if degraded {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(body)).into_response()
}

/// `GET /health/live` — process liveness only, no backend involvement.
pub async fn live() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// `GET /health/ready` — ready to take traffic: the store answers.
pub async fn ready(State(state): State<SharedState>) -> Response {
    let check = probe_store(&state).await;
    if check.status == "ok" {
        (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"status": "degraded", "error": check.error})),
        )
            .into_response()
    }
}
