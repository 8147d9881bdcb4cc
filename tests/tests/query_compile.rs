//! Tests for `POST /query/compile`: validation and SQL without execution.

use axum::http::StatusCode;
use integration_tests::{fixtures, setup::TestContext};
use serde_json::json;

#[tokio::test]
async fn test_compile_returns_sql_and_params() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let response = server
        .post("/query/compile")
        .json(&fixtures::compile_request())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(
        body["sql"],
        "SELECT path, count() AS pageviews, uniq(anonymous_id) AS visitors\n\
         FROM analytics.pageviews\n\
         WHERE client_id = {website_id:String} \
         AND time >= parseDateTimeBestEffort({start_date:String}, {timezone:String}) \
         AND time <= parseDateTimeBestEffort({end_date:String}, {timezone:String}) \
         AND country = {filter_0:String}\n\
         GROUP BY path\n\
         ORDER BY pageviews DESC\n\
         LIMIT 10"
    );
    assert_eq!(
        body["params"],
        json!({
            "website_id": fixtures::WEBSITE_ID,
            "start_date": "2024-01-01",
            "end_date": "2024-01-31 23:59:59",
            "timezone": "UTC",
            "filter_0": "US",
        })
    );

    // Compile never touches the store
    assert_eq!(ctx.executor.call_count(), 0);
}

#[tokio::test]
async fn test_compile_time_unit_and_offset() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let mut request = fixtures::compile_request();
    request["timeUnit"] = json!("hour");
    request["groupBy"] = json!([]);
    request["offset"] = json!(50);

    let response = server.post("/query/compile").json(&request).await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let sql = body["sql"].as_str().unwrap();
    assert!(sql.starts_with("SELECT toStartOfHour(time, {timezone:String}) AS date, "));
    assert!(sql.contains("GROUP BY date\nORDER BY date ASC"));
    assert!(sql.ends_with("LIMIT 10\nOFFSET 50"));
}

#[tokio::test]
async fn test_compile_falls_back_to_query_website_id() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let mut request = fixtures::compile_request();
    request.as_object_mut().unwrap().remove("websiteId");

    let response = server
        .post("/query/compile?website_id=from_query")
        .add_header("X-Timezone", "America/New_York")
        .json(&request)
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["params"]["website_id"], "from_query");
    assert_eq!(body["params"]["timezone"], "America/New_York");

    let response = server.post("/query/compile").json(&request).await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_compile_unknown_table() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let mut request = fixtures::compile_request();
    request["table"] = json!("users");

    let response = server.post("/query/compile").json(&request).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "QUERY_001");
    assert!(body["error"]
        .as_str()
        .unwrap()
        .starts_with("Invalid table. Valid tables:"));
}

#[tokio::test]
async fn test_compile_rejects_unknown_column() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let mut request = fixtures::compile_request();
    request["selects"] = json!([{ "field": "password", "aggregate": "count" }]);

    let response = server.post("/query/compile").json(&request).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "QUERY_002");
    assert_eq!(body["error"], "Invalid column for table \"pageviews\"");
}

#[tokio::test]
async fn test_compile_rejects_empty_selects() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let mut request = fixtures::compile_request();
    request["selects"] = json!([]);

    let response = server.post("/query/compile").json(&request).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "QUERY_008");
}

#[tokio::test]
async fn test_compile_rejects_unknown_operator() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let mut request = fixtures::compile_request();
    request["filters"] = json!([{ "field": "country", "operator": "regex", "value": ".*" }]);

    let response = server.post("/query/compile").json(&request).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["success"], false);
}

/// Hostile values stay in params; the SQL text only holds placeholders
#[tokio::test]
async fn test_compile_keeps_values_out_of_sql() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let hostile = "US'; DROP TABLE analytics.pageviews; --";
    let mut request = fixtures::compile_request();
    request["filters"] = json!([{ "field": "country", "operator": "eq", "value": hostile }]);

    let response = server.post("/query/compile").json(&request).await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert!(!body["sql"].as_str().unwrap().contains("DROP"));
    assert_eq!(body["params"]["filter_0"], hostile);
}

#[tokio::test]
async fn test_compile_clamps_oversized_limit() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let mut request = fixtures::compile_request();
    request["limit"] = json!(50_000);

    let response = server.post("/query/compile").json(&request).await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert!(body["sql"].as_str().unwrap().ends_with("LIMIT 10000"));
}

#[tokio::test]
async fn test_compile_zero_limit_uses_default() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let mut request = fixtures::compile_request();
    request["limit"] = json!(0);

    let response = server.post("/query/compile").json(&request).await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert!(body["sql"].as_str().unwrap().ends_with("LIMIT 1000"));
}
