//! Tests for health check endpoints.
//!
//! Health state is process-global, so transitions are exercised in a single
//! test to keep parallel tests from racing on it.

use axum::http::StatusCode;
use integration_tests::setup::TestContext;
use telemetry::health;

#[tokio::test]
async fn test_health_follows_clickhouse() {
    let ctx = TestContext::new();
    let server = ctx.server();

    health().clickhouse.set_unhealthy("Connection refused");
    let response = server.get("/health").await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["components"][0]["name"], "clickhouse");
    assert_eq!(body["components"][0]["message"], "Connection refused");
    server
        .get("/health/ready")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);

    health().clickhouse.set_healthy();
    let response = server.get("/health").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let status = body["status"].as_str().unwrap_or("");
    assert!(
        status == "healthy" || status == "degraded",
        "Status should be 'healthy' or 'degraded', got '{}'",
        status
    );
    assert!(body["metrics"]["batch_requests"].is_u64());
    server.get("/health/ready").await.assert_status_ok();
}

#[tokio::test]
async fn test_liveness() {
    let ctx = TestContext::new();
    let server = ctx.server();

    server.get("/health/live").await.assert_status_ok();
}
