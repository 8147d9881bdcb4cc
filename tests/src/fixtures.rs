//! Request body builders.

use serde_json::{json, Value};

pub const WEBSITE_ID: &str = "site_test";

/// Query string scoping a request to the test website and January 2024.
pub fn tenant_query() -> String {
    format!(
        "website_id={}&start_date=2024-01-01&end_date=2024-01-31",
        WEBSITE_ID
    )
}

/// `POST /query` body naming catalog parameters.
pub fn dynamic_request(parameters: &[&str]) -> Value {
    json!({ "parameters": parameters })
}

/// Dynamic request with an id and filters.
pub fn dynamic_request_with(id: &str, parameters: &[&str], filters: Value) -> Value {
    json!({
        "id": id,
        "parameters": parameters,
        "filters": filters,
    })
}

/// `POST /query/compile` body for a top-pages style query.
pub fn compile_request() -> Value {
    json!({
        "websiteId": WEBSITE_ID,
        "table": "pageviews",
        "selects": [
            { "field": "*", "aggregate": "count", "alias": "pageviews" },
            { "field": "anonymous_id", "aggregate": "uniq", "alias": "visitors" }
        ],
        "filters": [
            { "field": "country", "operator": "eq", "value": "US" }
        ],
        "groupBy": ["path"],
        "startDate": "2024-01-01",
        "endDate": "2024-01-31 23:59:59",
        "limit": 10
    })
}

/// `POST /query/custom` body over the given config.
pub fn custom_request(query: Value) -> Value {
    json!({
        "query": query,
        "startDate": "2024-01-01",
        "endDate": "2024-01-31",
    })
}

/// One canned result row.
pub fn row(path: &str, pageviews: u64) -> Value {
    json!({ "path": path, "pageviews": pageviews })
}
