//! Gateway integration tests over an in-memory store: auth, ingest, the
//! read path, tenant isolation, and key rotation.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use lens_config::AppConfig;
use lens_core::Store;
use lens_gateway::{AppState, SharedState, build_router};
use lens_pricing::PricingCatalog;
use lens_store::SqliteStore;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

async fn test_app() -> Router {
    let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().await.unwrap());
    let state: SharedState =
        AppState::new(store, Arc::new(PricingCatalog::default()), AppConfig::default());
    build_router(state)
}

fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

/// Register a user and create a project; returns (session jwt, project id,
/// api key).
async fn register_with_project(app: &Router, email: &str) -> (String, String, String) {
    let (status, body) = send(
        app,
        request(
            "POST",
            "/api/v1/auth/register",
            None,
            Some(json!({"email": email, "password": "hunter2hunter2"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let token = body["token"].as_str().unwrap().to_string();

    let (status, body) = send(
        app,
        request(
            "POST",
            "/api/v1/dashboard/projects",
            Some(&token),
            Some(json!({"name": "demo"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let project_id = body["id"].as_str().unwrap().to_string();
    let api_key = body["apiKey"].as_str().unwrap().to_string();
    assert!(api_key.starts_with("le_"));

    (token, project_id, api_key)
}

#[tokio::test]
async fn health_reports_ok() {
    let app = test_app().await;
    let (status, body) = send(&app, request("GET", "/api/v1/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["checks"]["store"]["status"], "ok");

    let (status, body) =
        send(&app, request("GET", "/api/v1/health?verbose=true", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["system"]["backend"], "sqlite");
}

#[tokio::test]
async fn features_is_public() {
    let app = test_app().await;
    let (status, body) = send(&app, request("GET", "/api/v1/features", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["auth"]["password"], true);
    assert_eq!(body["ingest"], true);
    assert_eq!(body["backend"], "sqlite");
}

#[tokio::test]
async fn register_login_and_conflicts() {
    let app = test_app().await;
    let (status, _) = send(
        &app,
        request(
            "POST",
            "/api/v1/auth/register",
            None,
            Some(json!({"email": "a@b.c", "password": "hunter2hunter2"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Duplicate email conflicts.
    let (status, _) = send(
        &app,
        request(
            "POST",
            "/api/v1/auth/register",
            None,
            Some(json!({"email": "a@b.c", "password": "hunter2hunter2"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Short password is a validation failure.
    let (status, _) = send(
        &app,
        request(
            "POST",
            "/api/v1/auth/register",
            None,
            Some(json!({"email": "c@d.e", "password": "short"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/v1/auth/login",
            None,
            Some(json!({"email": "a@b.c", "password": "hunter2hunter2"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["token"].is_string());

    let (status, _) = send(
        &app,
        request(
            "POST",
            "/api/v1/auth/login",
            None,
            Some(json!({"email": "a@b.c", "password": "wrong-password"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn ingest_requires_an_api_key() {
    let app = test_app().await;
    let (status, _) = send(
        &app,
        request("POST", "/api/v1/ingest", None, Some(json!({"events": []}))),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        request(
            "POST",
            "/api/v1/ingest",
            Some("le_not_a_real_key"),
            Some(json!({"events": []})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // A session JWT is not an API key.
    let (_, _, _) = register_with_project(&app, "jwt@b.c").await;
}

#[tokio::test]
async fn empty_batch_processes_zero() {
    let app = test_app().await;
    let (_, _, api_key) = register_with_project(&app, "empty@b.c").await;

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/v1/ingest",
            Some(&api_key),
            Some(json!({"events": []})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["processed"], 0);
}

#[tokio::test]
async fn flat_llm_ingest_round_trips() {
    let app = test_app().await;
    let (_, _, api_key) = register_with_project(&app, "s1@b.c").await;

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/v1/ingest",
            Some(&api_key),
            Some(json!({"events": [{
                "traceId": "T1", "spanId": "S1", "spanType": "llm",
                "provider": "openai", "model": "gpt-4o",
                "inputTokens": 1000, "outputTokens": 500, "status": "success"
            }]})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processed"], 1);

    let (status, body) =
        send(&app, request("GET", "/api/v1/traces/T1", Some(&api_key), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalSpans"], 1);
    assert_eq!(body["totalTokens"], 1500);
    assert!((body["totalCostUsd"].as_f64().unwrap() - 0.0075).abs() < 1e-12);
    assert_eq!(body["spans"][0]["id"], "S1");
    assert!(body["spans"][0].get("parentSpanId").is_none());
    // Supplied fields round-trip verbatim.
    assert_eq!(body["spans"][0]["model"], "gpt-4o");
    assert_eq!(body["spans"][0]["inputTokens"], 1000);
}

#[tokio::test]
async fn agent_hierarchy_round_trips() {
    let app = test_app().await;
    let (_, _, api_key) = register_with_project(&app, "s2@b.c").await;

    send(
        &app,
        request(
            "POST",
            "/api/v1/ingest",
            Some(&api_key),
            Some(json!({"events": [
                {"traceId": "T", "spanId": "A", "spanType": "agent",
                 "name": "sales-agent", "sessionId": "c1"},
                {"traceId": "T", "spanId": "A-L", "spanType": "llm",
                 "parentSpanId": "A", "inputTokens": 100, "outputTokens": 50},
                {"traceId": "T", "spanId": "L-tool", "spanType": "tool",
                 "parentSpanId": "A-L", "name": "search"}
            ]})),
        ),
    )
    .await;

    let (status, body) =
        send(&app, request("GET", "/api/v1/traces/T", Some(&api_key), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "sales-agent");
    assert_eq!(body["sessionId"], "c1");
    assert_eq!(body["totalSpans"], 3);
    assert_eq!(body["totalTokens"], 150);

    let tree = body["spanTree"].as_array().unwrap();
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0]["id"], "A");
    assert_eq!(tree[0]["children"][0]["id"], "A-L");
    assert_eq!(tree[0]["children"][0]["children"][0]["id"], "L-tool");
}

#[tokio::test]
async fn cross_tenant_trace_reads_are_404() {
    let app = test_app().await;
    let (_, _, key_one) = register_with_project(&app, "p1@b.c").await;
    let (_, _, key_two) = register_with_project(&app, "p2@b.c").await;

    send(
        &app,
        request(
            "POST",
            "/api/v1/ingest",
            Some(&key_one),
            Some(json!({"events": [{"traceId": "T", "spanId": "S", "spanType": "llm"}]})),
        ),
    )
    .await;

    let (status, _) =
        send(&app, request("GET", "/api/v1/traces/T", Some(&key_two), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) =
        send(&app, request("GET", "/api/v1/traces/T", Some(&key_one), None)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn rotated_key_invalidates_the_old_one() {
    let app = test_app().await;
    let (token, project_id, old_key) = register_with_project(&app, "rotate@b.c").await;
    let payload = json!({"events": [{"traceId": "T", "spanId": "S", "spanType": "llm"}]});

    let (status, _) = send(
        &app,
        request("POST", "/api/v1/ingest", Some(&old_key), Some(payload.clone())),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        request(
            "POST",
            &format!("/api/v1/dashboard/projects/{project_id}/api-key"),
            Some(&token),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let new_key = body["apiKey"].as_str().unwrap().to_string();
    assert_ne!(new_key, old_key);

    let (status, _) = send(
        &app,
        request("POST", "/api/v1/ingest", Some(&old_key), Some(payload.clone())),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        request("POST", "/api/v1/ingest", Some(&new_key), Some(payload)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn list_traces_clamps_limit_and_filters_status() {
    let app = test_app().await;
    let (_, _, api_key) = register_with_project(&app, "list@b.c").await;

    send(
        &app,
        request(
            "POST",
            "/api/v1/ingest",
            Some(&api_key),
            Some(json!({"events": [
                {"traceId": "T1", "spanId": "S1", "spanType": "llm"},
                {"traceId": "T2", "spanId": "S1", "spanType": "llm"}
            ]})),
        ),
    )
    .await;

    let (status, body) = send(
        &app,
        request("GET", "/api/v1/traces?limit=1000", Some(&api_key), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["limit"], 50);
    assert_eq!(body["total"], 2);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (status, _) = send(
        &app,
        request("GET", "/api/v1/traces?status=bogus", Some(&api_key), None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn patch_trace_enforces_the_status_dag() {
    let app = test_app().await;
    let (_, _, api_key) = register_with_project(&app, "patch@b.c").await;

    send(
        &app,
        request(
            "POST",
            "/api/v1/ingest",
            Some(&api_key),
            Some(json!({"events": [{"traceId": "T", "spanId": "S", "spanType": "llm"}]})),
        ),
    )
    .await;

    let (status, body) = send(
        &app,
        request(
            "PATCH",
            "/api/v1/traces/T",
            Some(&api_key),
            Some(json!({"status": "completed"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");

    // Terminal is terminal.
    let (status, _) = send(
        &app,
        request(
            "PATCH",
            "/api/v1/traces/T",
            Some(&api_key),
            Some(json!({"status": "error"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &app,
        request(
            "PATCH",
            "/api/v1/traces/T",
            Some(&api_key),
            Some(json!({"status": "running"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn dashboard_reads_and_analytics() {
    let app = test_app().await;
    let (token, project_id, api_key) = register_with_project(&app, "dash@b.c").await;

    send(
        &app,
        request(
            "POST",
            "/api/v1/ingest",
            Some(&api_key),
            Some(json!({"events": [
                {"traceId": "T", "spanId": "S", "spanType": "llm",
                 "model": "gpt-4o", "inputTokens": 100, "outputTokens": 50,
                 "sessionId": "c1", "durationMs": 120}
            ]})),
        ),
    )
    .await;

    let (status, body) = send(
        &app,
        request(
            "GET",
            &format!("/api/v1/dashboard/projects/{project_id}/traces"),
            Some(&token),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);

    let (status, body) = send(
        &app,
        request(
            "GET",
            &format!("/api/v1/dashboard/projects/{project_id}/sessions"),
            Some(&token),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["sessionId"], "c1");

    let (status, body) = send(
        &app,
        request(
            "GET",
            &format!("/api/v1/dashboard/projects/{project_id}/stats"),
            Some(&token),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalTraces"], 1);
    assert_eq!(body["totalTokens"], 150);

    let (status, body) = send(
        &app,
        request(
            "GET",
            "/api/v1/analytics/usage?granularity=day",
            Some(&api_key),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["granularity"], "day");
    assert_eq!(body["data"][0]["traceCount"], 1);

    let (status, _) = send(
        &app,
        request(
            "GET",
            "/api/v1/analytics/usage?granularity=month",
            Some(&api_key),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn foreign_dashboard_projects_read_as_404() {
    let app = test_app().await;
    let (_, project_id, _) = register_with_project(&app, "owner@b.c").await;
    let (intruder_token, _, _) = register_with_project(&app, "intruder@b.c").await;

    for uri in [
        format!("/api/v1/dashboard/projects/{project_id}/traces"),
        format!("/api/v1/dashboard/projects/{project_id}/stats"),
    ] {
        let (status, _) = send(&app, request("GET", &uri, Some(&intruder_token), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    let (status, _) = send(
        &app,
        request(
            "DELETE",
            &format!("/api/v1/dashboard/projects/{project_id}"),
            Some(&intruder_token),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
