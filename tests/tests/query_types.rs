//! Tests for `GET /query/types`: catalog introspection.

use integration_tests::setup::TestContext;

#[tokio::test]
async fn test_types_lists_catalog() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let response = server.get("/query/types").await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["success"], true);

    let types: Vec<&str> = body["types"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t.as_str())
        .collect();
    assert_eq!(types.len(), 20);
    for id in ["summary_metrics", "top_pages", "top_referrers", "revenue_by_provider"] {
        assert!(types.contains(&id), "missing {}", id);
    }

    let summary = &body["configs"]["summary_metrics"];
    assert_eq!(summary["defaultLimit"], 1);
    assert_eq!(summary["customizable"], true);
    assert!(summary["allowedFilters"].is_array());

    let web_vitals = &body["configs"]["web_vitals"];
    assert_eq!(web_vitals["allowedFilters"], serde_json::json!(["metric_name"]));

    let scroll = &body["configs"]["scroll_depth_summary"];
    assert_eq!(scroll["customizable"], false);
}
