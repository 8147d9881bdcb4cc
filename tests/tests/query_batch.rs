//! Tests for `POST /query`: catalog parameters run as a batch.
//!
//! The router runs against `MockExecutor`, so every assertion on SQL checks
//! exactly what would be sent to ClickHouse.

use axum::http::StatusCode;
use engine_core::ParamValue;
use integration_tests::{
    fixtures::{self, WEBSITE_ID},
    mocks::MockWebsiteDirectory,
    setup::TestContext,
};
use serde_json::json;

/// Two parameters, both succeed, results and meta in request order
#[tokio::test]
async fn test_multi_parameter_request() {
    let ctx = TestContext::new();
    ctx.executor
        .set_rows(vec![fixtures::row("/", 120), fixtures::row("/pricing", 40)]);
    let server = ctx.server();

    let response = server
        .post(&format!("/query?{}", fixtures::tenant_query()))
        .json(&fixtures::dynamic_request(&["top_pages", "summary_metrics"]))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["success"], true);

    let data = body["data"].as_array().expect("data should be an array");
    assert_eq!(data.len(), 2);
    assert_eq!(data[0]["parameter"], "top_pages");
    assert_eq!(data[1]["parameter"], "summary_metrics");
    assert!(data.iter().all(|item| item["success"] == true));
    assert_eq!(data[0]["data"][0]["path"], "/");
    assert!(data[0].get("error").is_none());

    assert_eq!(
        body["meta"],
        json!({
            "parameters": ["top_pages", "summary_metrics"],
            "total_parameters": 2,
            "page": 1,
            "limit": 100,
            "filters_applied": 0,
        })
    );

    let calls = ctx.executor.calls();
    assert_eq!(calls.len(), 2);
    for (_, params) in &calls {
        assert_eq!(params["website_id"], ParamValue::from(WEBSITE_ID));
        assert_eq!(params["start_date"], ParamValue::from("2024-01-01"));
        // Bare end date widened to the end of the day
        assert_eq!(params["end_date"], ParamValue::from("2024-01-31 23:59:59"));
    }
}

/// An unknown parameter fails alone; siblings still run
#[tokio::test]
async fn test_unknown_parameter_is_isolated() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let response = server
        .post(&format!("/query?{}", fixtures::tenant_query()))
        .json(&fixtures::dynamic_request(&["top_pages", "not_a_type"]))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let data = body["data"].as_array().unwrap();

    assert_eq!(data[0]["success"], true);
    assert_eq!(data[1]["success"], false);
    assert_eq!(data[1]["error"], "Unknown query type: not_a_type");
    assert_eq!(data[1]["data"], json!([]));

    assert_eq!(ctx.executor.call_count(), 1);
}

/// A store failure on one parameter is reported on that item only
#[tokio::test]
async fn test_execution_failure_is_isolated() {
    let ctx = TestContext::new();
    ctx.executor.fail_when("error_spans");
    let server = ctx.server();

    let response = server
        .post(&format!("/query?{}", fixtures::tenant_query()))
        .json(&fixtures::dynamic_request(&["error_types", "top_pages"]))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let data = body["data"].as_array().unwrap();

    assert_eq!(data[0]["parameter"], "error_types");
    assert_eq!(data[0]["success"], false);
    assert!(data[0]["error"]
        .as_str()
        .unwrap()
        .starts_with("Query execution failed"));
    assert_eq!(data[1]["success"], true);
    assert_eq!(ctx.executor.call_count(), 2);
}

/// Permitted filters are appended after the entry's own filters
#[tokio::test]
async fn test_request_filters_are_bound() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let body = fixtures::dynamic_request_with(
        "overview",
        &["top_pages"],
        json!([{ "field": "country", "op": "eq", "value": "US" }]),
    );
    let response = server
        .post(&format!("/query?{}", fixtures::tenant_query()))
        .json(&body)
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["queryId"], "overview");
    assert_eq!(body["meta"]["filters_applied"], 1);

    let (sql, params) = ctx.executor.calls().remove(0);
    assert!(sql.contains("path != {filter_0:String}"));
    assert!(sql.contains("country = {filter_1:String}"));
    assert!(!sql.contains("US"));
    assert_eq!(params["filter_1"], ParamValue::from("US"));
}

/// Filters outside the entry's allow-list fail the item
#[tokio::test]
async fn test_filter_not_permitted() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let body = fixtures::dynamic_request_with(
        "q",
        &["top_pages"],
        json!([{ "field": "session_id", "operator": "eq", "value": "abc" }]),
    );
    let response = server
        .post(&format!("/query?{}", fixtures::tenant_query()))
        .json(&body)
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["data"][0]["success"], false);
    assert_eq!(
        body["data"][0]["error"],
        "Filter on field 'session_id' is not permitted for top_pages"
    );
    assert_eq!(ctx.executor.call_count(), 0);
}

/// Explicit batch: each request gets its own slot, failures included
#[tokio::test]
async fn test_explicit_batch() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let body = json!([
        { "id": "a", "parameters": ["top_pages"] },
        { "id": "b", "parameters": [] },
    ]);
    let response = server
        .post(&format!("/query?{}", fixtures::tenant_query()))
        .json(&body)
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["batch"], true);

    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["success"], true);
    assert_eq!(results[0]["queryId"], "a");
    assert_eq!(results[1]["success"], false);
    assert!(results[1]["error"].is_string());
}

/// A malformed request in an explicit batch fails only its own slot
#[tokio::test]
async fn test_explicit_batch_malformed_request_is_isolated() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let body = json!([
        { "id": "a", "parameters": ["top_pages"] },
        {
            "id": "b",
            "parameters": ["top_pages"],
            "filters": [{ "field": "path", "op": "regex", "value": ".*" }]
        },
        { "id": "c", "parameters": ["country"] },
    ]);
    let response = server
        .post(&format!("/query?{}", fixtures::tenant_query()))
        .json(&body)
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["queryId"], "a");
    assert_eq!(results[1]["success"], false);
    assert!(results[1]["error"].as_str().unwrap().contains("regex"));
    assert_eq!(results[2]["queryId"], "c");
    assert_eq!(results[2]["success"], true);

    assert_eq!(ctx.executor.call_count(), 2);
}

/// Batch parameters count toward the compiled-queries metric
#[tokio::test]
async fn test_batch_counts_compiled_queries() {
    let ctx = TestContext::new();
    let server = ctx.server();
    let before = telemetry::metrics().queries_compiled.get();

    server
        .post(&format!("/query?{}", fixtures::tenant_query()))
        .json(&fixtures::dynamic_request(&["top_pages", "country"]))
        .await
        .assert_status_ok();

    assert!(telemetry::metrics().queries_compiled.get() >= before + 2);
}

/// Page 0 and limit 0 fall back to the first page and the entry default
#[tokio::test]
async fn test_zero_page_and_limit_are_defaults() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let response = server
        .post(&format!("/query?{}", fixtures::tenant_query()))
        .json(&json!({ "parameters": ["top_pages"], "limit": 0, "page": 0 }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["meta"]["page"], 1);
    assert_eq!(body["meta"]["limit"], 100);

    let (sql, _) = ctx.executor.calls().remove(0);
    assert!(sql.ends_with("LIMIT 100"));
}

/// Paging turns into LIMIT/OFFSET on every parameter
#[tokio::test]
async fn test_pagination() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let response = server
        .post(&format!("/query?{}", fixtures::tenant_query()))
        .json(&json!({ "parameters": ["top_pages"], "limit": 10, "page": 3 }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["meta"]["page"], 3);
    assert_eq!(body["meta"]["limit"], 10);

    let (sql, _) = ctx.executor.calls().remove(0);
    assert!(sql.ends_with("LIMIT 10\nOFFSET 20"));
}

/// Request shape limits reject the whole request
#[tokio::test]
async fn test_too_many_parameters_rejected() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let parameters: Vec<String> = (0..51).map(|_| "top_pages".to_string()).collect();
    let response = server
        .post(&format!("/query?{}", fixtures::tenant_query()))
        .json(&json!({ "parameters": parameters }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "REQ_001");
    assert_eq!(ctx.executor.call_count(), 0);
}

#[tokio::test]
async fn test_missing_website_id_rejected() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let response = server
        .post("/query")
        .json(&fixtures::dynamic_request(&["top_pages"]))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "REQ_001");
}

/// `X-Timezone` wins over the query string; bad names are rejected
#[tokio::test]
async fn test_timezone_header() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let response = server
        .post(&format!("/query?{}&timezone=UTC", fixtures::tenant_query()))
        .add_header("X-Timezone", "Europe/Berlin")
        .json(&fixtures::dynamic_request(&["top_pages"]))
        .await;
    response.assert_status_ok();
    let (_, params) = ctx.executor.calls().remove(0);
    assert_eq!(params["timezone"], ParamValue::from("Europe/Berlin"));

    let response = server
        .post(&format!("/query?{}", fixtures::tenant_query()))
        .add_header("X-Timezone", "UTC'; DROP TABLE x")
        .json(&fixtures::dynamic_request(&["top_pages"]))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

/// The tenant's own domain is excluded from referrers; lookups are cached
#[tokio::test]
async fn test_referrers_exclude_own_domain() {
    let ctx = TestContext::with_directory(MockWebsiteDirectory::with_domain(
        WEBSITE_ID,
        "https://www.example.com",
    ));
    let server = ctx.server();

    for _ in 0..2 {
        server
            .post(&format!("/query?{}", fixtures::tenant_query()))
            .json(&fixtures::dynamic_request(&["top_referrers"]))
            .await
            .assert_status_ok();
    }

    let (sql, params) = ctx.executor.calls().remove(0);
    assert!(sql.contains("referrer NOT LIKE {filter_1:String}"));
    assert_eq!(params["filter_1"], ParamValue::from("%example.com%"));
    assert_eq!(ctx.directory.lookup_count(), 1);
}

/// A failing website service only drops the referrer exclusion
#[tokio::test]
async fn test_directory_outage_does_not_fail_queries() {
    let ctx = TestContext::new();
    ctx.directory.set_unavailable(true);
    let server = ctx.server();

    let response = server
        .post(&format!("/query?{}", fixtures::tenant_query()))
        .json(&fixtures::dynamic_request(&["top_referrers"]))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["data"][0]["success"], true);

    let (sql, _) = ctx.executor.calls().remove(0);
    assert!(!sql.contains("NOT LIKE"));
}

#[tokio::test]
async fn test_rate_limit_returns_429() {
    let ctx = TestContext::with_rate_limit(api::middleware::RateLimitConfig { rate: 0, burst: 1 });
    let server = ctx.server();

    server
        .post(&format!("/query?{}", fixtures::tenant_query()))
        .json(&fixtures::dynamic_request(&["top_pages"]))
        .await
        .assert_status_ok();

    let response = server
        .post(&format!("/query?{}", fixtures::tenant_query()))
        .json(&fixtures::dynamic_request(&["top_pages"]))
        .await;

    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok()),
        Some("1")
    );
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "RATE_001");
}
