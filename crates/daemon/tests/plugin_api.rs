mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use ::common::kv::Bucket;
use beacon_daemon::http_server;
use beacon_daemon::testkit::MockServerClient;

async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("accept", "application/json")
        .body(match body {
            Some(body) => Body::from(body.to_string()),
            None => Body::empty(),
        })
        .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_status_routes() {
    let state = common::service_state(Arc::new(MockServerClient::new()), None).await;
    let router = http_server::router(state);

    let (status, body) = send(&router, Method::GET, "/_status/livez", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(&router, Method::GET, "/_status/readyz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(&router, Method::GET, "/_status/version", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["version"].is_string());

    let (status, _) = send(&router, Method::GET, "/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_identity_reports_enrollment() {
    let state = common::service_state(Arc::new(MockServerClient::new()), None).await;
    let router = http_server::router(state.clone());

    let (status, body) = send(&router, Method::GET, "/_status/identity", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enrolled"], false);
    let host_identifier = body["host_identifier"].as_str().unwrap().to_string();
    assert_eq!(host_identifier.len(), 36);
    assert_eq!(body["fingerprint"].as_str().unwrap().len(), 32 * 3 - 1);

    state.enrollment().enroll().await.unwrap();
    let (_, body) = send(&router, Method::GET, "/_status/identity", None).await;
    assert_eq!(body["enrolled"], true);
    assert_eq!(body["host_identifier"], host_identifier.as_str());
}

#[tokio::test]
async fn test_config_route_returns_server_config() {
    let server = Arc::new(MockServerClient::new().with_config(r#"{"options":{"a":1}}"#));
    let state = common::service_state(server.clone(), None).await;
    let router = http_server::router(state);

    let (status, body) = send(&router, Method::POST, "/api/v0/config", Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["config"], r#"{"options":{"a":1}}"#);
    assert_eq!(server.enroll_calls(), 1);
}

#[tokio::test]
async fn test_config_route_reports_upstream_failure() {
    let server = Arc::new(MockServerClient::new());
    server.fail_config(true);
    let state = common::service_state(server, None).await;
    let router = http_server::router(state);

    let (status, body) = send(&router, Method::POST, "/api/v0/config", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["message"].as_str().unwrap().contains("request config"));
}

#[tokio::test]
async fn test_log_route_buffers_lines() {
    let state = common::service_state(Arc::new(MockServerClient::new()), None).await;
    let router = http_server::router(state.clone());

    let (status, _) = send(
        &router,
        Method::POST,
        "/api/v0/log",
        Some(json!({"log_type": "status", "line": "{\"severity\":0}"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &router,
        Method::POST,
        "/api/v0/log",
        Some(json!({"log_type": "snapshot", "line": "{\"name\":\"q\"}"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/v0/log",
        Some(json!({"log_type": "verbose", "line": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "unknown log type: verbose");

    let store = state.store();
    assert_eq!(store.bucket_count(Bucket::StatusLogs).await.unwrap(), 1);
    assert_eq!(store.bucket_count(Bucket::ResultLogs).await.unwrap(), 1);
}

#[tokio::test]
async fn test_distributed_routes() {
    let queries = BTreeMap::from([("q1".to_string(), "SELECT 1;".to_string())]);
    let server = Arc::new(MockServerClient::new().with_queries(queries));
    let state = common::service_state(server.clone(), None).await;
    let router = http_server::router(state);

    let (status, body) =
        send(&router, Method::POST, "/api/v0/distributed/read", Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["queries"]["q1"], "SELECT 1;");

    let (status, _) = send(
        &router,
        Method::POST,
        "/api/v0/distributed/write",
        Some(json!({"results": [{"query_name": "q1", "status": 0, "rows": [{"1": "1"}]}]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let results = server.results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].query_name, "q1");
    assert_eq!(results[0].rows[0]["1"], "1");
}
