//! Tests for `POST /query/custom`: validate, compile and execute.

use axum::http::StatusCode;
use engine_core::ParamValue;
use integration_tests::{fixtures, setup::TestContext};
use serde_json::json;

fn revenue_by_country() -> serde_json::Value {
    json!({
        "table": "revenue",
        "selects": [{ "field": "amount", "aggregate": "sum", "alias": "revenue" }],
        "groupBy": "country",
    })
}

#[tokio::test]
async fn test_custom_query_executes() {
    let ctx = TestContext::new();
    ctx.executor.set_rows(vec![
        json!({ "country": "US", "revenue": 1200.5 }),
        json!({ "country": "DE", "revenue": 310.0 }),
    ]);
    let server = ctx.server();

    let response = server
        .post(&format!("/query/custom?website_id={}", fixtures::WEBSITE_ID))
        .json(&fixtures::custom_request(revenue_by_country()))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    assert_eq!(body["meta"]["rowCount"], 2);
    assert!(body["meta"]["executionTime"].is_u64());

    let (sql, params) = ctx.executor.calls().remove(0);
    assert!(sql.starts_with("SELECT country, sum(amount) AS revenue\nFROM analytics.revenue\n"));
    assert!(sql.contains("ORDER BY revenue DESC"));
    assert_eq!(params["website_id"], ParamValue::from(fixtures::WEBSITE_ID));
}

#[tokio::test]
async fn test_custom_query_body_website_wins() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let mut request = fixtures::custom_request(revenue_by_country());
    request["websiteId"] = json!("from_body");

    server
        .post("/query/custom?website_id=from_query")
        .add_header("X-Timezone", "Asia/Tokyo")
        .json(&request)
        .await
        .assert_status_ok();

    let (_, params) = ctx.executor.calls().remove(0);
    assert_eq!(params["website_id"], ParamValue::from("from_body"));
    assert_eq!(params["timezone"], ParamValue::from("Asia/Tokyo"));
}

#[tokio::test]
async fn test_custom_query_validation_failure() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let query = json!({
        "table": "pageviews",
        "selects": [{ "field": "path", "aggregate": "sum" }],
    });
    let response = server
        .post(&format!("/query/custom?website_id={}", fixtures::WEBSITE_ID))
        .json(&fixtures::custom_request(query))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "QUERY_004");
    assert_eq!(ctx.executor.call_count(), 0);
}

#[tokio::test]
async fn test_custom_query_rejects_text_on_number_column() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let query = json!({
        "table": "pageviews",
        "selects": [{ "field": "*", "aggregate": "count" }],
        "filters": [{ "field": "load_time", "operator": "eq", "value": "fast" }],
    });
    let response = server
        .post(&format!("/query/custom?website_id={}", fixtures::WEBSITE_ID))
        .json(&fixtures::custom_request(query))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "QUERY_012");
    assert_eq!(ctx.executor.call_count(), 0);
}

#[tokio::test]
async fn test_custom_query_execution_failure() {
    let ctx = TestContext::new();
    ctx.executor.fail_when("analytics.revenue");
    let server = ctx.server();

    let response = server
        .post(&format!("/query/custom?website_id={}", fixtures::WEBSITE_ID))
        .json(&fixtures::custom_request(revenue_by_country()))
        .await;

    response.assert_status(StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "EXEC_001");
}

#[tokio::test]
async fn test_custom_query_requires_website() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let response = server
        .post("/query/custom")
        .json(&fixtures::custom_request(revenue_by_country()))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "REQ_001");
}
