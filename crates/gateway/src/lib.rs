//! HTTP API gateway for Lens.
//!
//! All routes live under `/api/v1`. Three auth modes, resolved per route:
//! public (`/health*`, `/features`, `/auth/*`), API key (`/ingest`,
//! `/traces*`, `/analytics/*`), and session JWT (`/dashboard/*`). Every
//! response carries an `x-request-id` threaded through the trace logs.
//!
//! Built on Axum; request handling is one logical task per request with
//! every store call a suspension point.

pub mod analytics_api;
pub mod auth;
pub mod auth_api;
pub mod dashboard_api;
pub mod error;
pub mod health;
pub mod ingest_api;
pub mod state;
pub mod trace_api;

pub use state::{AppState, SharedState};

use axum::extract::State;
use axum::http::{HeaderName, Method, header};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use lens_config::AppConfig;
use lens_pricing::{ModelPricing, PricingCatalog};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Build the full application router.
pub fn build_router(state: SharedState) -> Router {
    let api = Router::new()
        // Public
        .route("/health", get(health::health))
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
        .route("/features", get(features))
        .route("/auth/register", post(auth_api::register))
        .route("/auth/login", post(auth_api::login))
        // API key
        .route("/ingest", post(ingest_api::ingest))
        .route(
            "/traces",
            get(trace_api::list_traces).post(trace_api::create_trace),
        )
        .route(
            "/traces/{id}",
            get(trace_api::get_trace).patch(trace_api::patch_trace),
        )
        .route("/traces/{id}/spans", post(trace_api::append_spans))
        .route("/analytics/summary", get(analytics_api::summary))
        .route("/analytics/usage", get(analytics_api::usage))
        // Session JWT
        .route(
            "/dashboard/projects",
            get(dashboard_api::list_projects).post(dashboard_api::create_project),
        )
        .route(
            "/dashboard/projects/{id}",
            patch(dashboard_api::update_project).delete(dashboard_api::delete_project),
        )
        .route(
            "/dashboard/projects/{id}/api-key",
            post(dashboard_api::rotate_api_key),
        )
        .route(
            "/dashboard/projects/{id}/traces",
            get(dashboard_api::list_traces).delete(dashboard_api::delete_traces),
        )
        .route(
            "/dashboard/projects/{id}/traces/{trace_id}",
            get(dashboard_api::get_trace),
        )
        .route(
            "/dashboard/projects/{id}/sessions",
            get(dashboard_api::list_sessions),
        )
        .route("/dashboard/projects/{id}/stats", get(dashboard_api::stats))
        .with_state(state);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(X_REQUEST_ID.clone()))
        .layer(SetRequestIdLayer::new(X_REQUEST_ID.clone(), MakeRequestUuid))
        .layer(cors)
}

/// Build shared state from config: open the store, run migrations, load
/// the pricing catalog.
pub async fn init_state(config: AppConfig) -> Result<SharedState, Box<dyn std::error::Error>> {
    let store = lens_store::connect(
        &config.database.url,
        lens_store::ConnectOptions {
            min_connections: config.database.min_connections,
            max_connections: config.database.max_connections,
        },
    )
    .await?;

    let catalog = PricingCatalog::with_defaults(config.custom_pricing.iter().map(|(model, p)| {
        (
            model.clone(),
            ModelPricing::with_cache(
                p.input_per_m,
                p.output_per_m,
                p.cache_read_per_m,
                p.cache_write_per_m,
            ),
        )
    }));

    Ok(AppState::new(store, Arc::new(catalog), config))
}

/// Start the gateway HTTP server and run until shutdown.
pub async fn serve(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = init_state(config).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// `GET /features` — static capability flags for dashboard clients.
///
/// Unauthenticated by contract: the dashboard reads it before login. Plan
/// and billing gating happens upstream; this only describes what the
/// deployment itself serves.
async fn features(State(state): State<SharedState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "auth": {
            "password": true,
            "google": false,
        },
        "ingest": true,
        "analytics": true,
        "sessions": true,
        "backend": state.store.name(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
