mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{get, send, TestApp};

#[tokio::test]
async fn health_reports_store_and_version() {
    let app = TestApp::new();

    let (status, body) = get(&app.router, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["store_healthy"], true);
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn responses_carry_request_id() {
    let app = TestApp::new();
    let request = Request::get("/health").body(Body::empty()).unwrap();

    let response = send(&app.router, request).await;

    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn caller_request_id_is_propagated() {
    let app = TestApp::new();
    let request = Request::get("/health")
        .header("x-request-id", "trace-me-123")
        .body(Body::empty())
        .unwrap();

    let response = send(&app.router, request).await;

    assert_eq!(response.headers()["x-request-id"], "trace-me-123");
}

#[tokio::test]
async fn unknown_route_is_404() {
    let app = TestApp::new();
    let request = Request::get("/api/v1/nope").body(Body::empty()).unwrap();

    let response = send(&app.router, request).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
