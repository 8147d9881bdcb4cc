//! Query execution over the ClickHouse HTTP interface.
//!
//! SQL goes in the request body; each `{name:Type}` placeholder is bound by
//! a `param_<name>` query-string entry, so values never enter the SQL text.

use async_trait::async_trait;
use engine_core::{Error, ParamValue, QueryExecutor, QueryParams, Result, Row};
use serde::Deserialize;
use std::time::Instant;
use telemetry::{health, metrics};
use tracing::{debug, warn};

use crate::client::ClickHouseClient;

/// Longest server error excerpt carried into an error message.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Deserialize)]
struct JsonResponse {
    #[serde(default)]
    data: Vec<Row>,
}

/// Render a bound value in the text form ClickHouse parses for HTTP params.
///
/// Scalars use the escaped (TSV) form; arrays use a quoted literal list.
pub fn encode_param(value: &ParamValue) -> String {
    match value {
        ParamValue::String(s) => escape_text(s),
        ParamValue::Number(n) => n.to_string(),
        ParamValue::StringList(items) => {
            let quoted: Vec<String> = items
                .iter()
                .map(|item| format!("'{}'", escape_quoted(item)))
                .collect();
            escape_text(&format!("[{}]", quoted.join(",")))
        }
    }
}

fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

fn escape_quoted(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

impl ClickHouseClient {
    /// Execute a SELECT and return its rows as JSON objects.
    pub async fn fetch_json(&self, sql: &str, params: &QueryParams) -> Result<Vec<Row>> {
        let mut url = reqwest::Url::parse(&self.config().url)
            .map_err(|e| Error::internal(format!("Invalid ClickHouse URL: {}", e)))?;
        {
            let mut qs = url.query_pairs_mut();
            qs.append_pair("database", &self.config().database);
            qs.append_pair("default_format", "JSON");
            qs.append_pair("output_format_json_quote_64bit_integers", "0");
            qs.append_pair("readonly", "2");
            for (name, value) in params {
                qs.append_pair(&format!("param_{}", name), &encode_param(value));
            }
        }

        let mut request = self.http().post(url).body(sql.to_string());
        if let Some(ref user) = self.config().username {
            request = request.basic_auth(user, self.config().password.as_deref());
        }

        // Any HTTP answer proves the server is reachable; only transport
        // failures flip readiness.
        let response = match request.send().await {
            Ok(response) => {
                health().clickhouse.set_healthy();
                response
            }
            Err(e) => {
                health().clickhouse.set_unhealthy(e.to_string());
                return Err(Error::execution(format!("ClickHouse request failed: {}", e)));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.trim().chars().take(MAX_ERROR_BODY).collect();
            return Err(Error::execution(format!(
                "ClickHouse error {}: {}",
                status, excerpt
            )));
        }

        let parsed: JsonResponse = response
            .json()
            .await
            .map_err(|e| Error::execution(format!("ClickHouse response parse failed: {}", e)))?;
        Ok(parsed.data)
    }
}

#[async_trait]
impl QueryExecutor for ClickHouseClient {
    async fn execute(&self, sql: &str, params: &QueryParams) -> Result<Vec<Row>> {
        let start = Instant::now();
        let result = self.fetch_json(sql, params).await;
        let elapsed = start.elapsed();

        metrics()
            .execution_latency_ms
            .observe(elapsed.as_millis() as u64);

        match &result {
            Ok(rows) => debug!(
                rows = rows.len(),
                latency_ms = elapsed.as_millis() as u64,
                "ClickHouse query completed"
            ),
            Err(e) => {
                metrics().execution_errors.inc();
                warn!(error = %e, latency_ms = elapsed.as_millis() as u64, "ClickHouse query failed");
            }
        }
        result
    }
}
