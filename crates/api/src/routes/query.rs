//! Query endpoints.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use engine_core::{
    BatchResponse, CustomQueryConfig, CustomQueryFilter, CustomQueryRequest, CustomQuerySelect,
    DynamicQueryRequest, ErrorKind, QueryScope, TimeUnit,
};
use serde::Deserialize;
use serde_json::Value;
use telemetry::metrics;
use tracing::{debug, info, warn};
use validator::Validate;

use crate::extractors::TenantScope;
use crate::response::{
    ApiError, BatchEnvelope, BatchListEnvelope, BatchOutcome, CompileEnvelope,
    CustomQueryEnvelope, FailureEnvelope, QueryTypesEnvelope,
};
use crate::state::AppState;

/// Body of `POST /query/compile`.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CompileRequest {
    /// Falls back to the `website_id` query parameter.
    #[serde(default, alias = "projectId", alias = "website_id")]
    pub website_id: Option<String>,
    #[validate(length(min = 1))]
    pub table: String,
    pub selects: Vec<CustomQuerySelect>,
    #[serde(default)]
    pub filters: Vec<CustomQueryFilter>,
    #[serde(default)]
    pub group_by: Vec<String>,
    pub start_date: String,
    pub end_date: String,
    #[serde(default)]
    pub time_unit: Option<TimeUnit>,
    #[serde(default)]
    pub timezone: Option<String>,
    /// Clamped at compile time; 0 counts as absent.
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

impl CompileRequest {
    fn config(&self) -> CustomQueryConfig {
        CustomQueryConfig {
            table: self.table.clone(),
            selects: self.selects.clone(),
            filters: self.filters.clone(),
            group_by: self.group_by.clone(),
            time_bucket: self.time_unit,
        }
    }
}

/// POST /query - Run one dynamic request, or a list of them.
pub async fn query_handler(
    State(state): State<AppState>,
    tenant: TenantScope,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = payload?;
    let tenant = tenant.resolve()?;
    metrics().batch_requests.inc();

    if let Value::Array(requests) = body {
        debug!(website_id = %tenant.website_id, requests = requests.len(), "Batch query received");

        let results = state.orchestrator.run_batch(&requests, &tenant).await?;
        let results = results
            .into_iter()
            .map(|result| match result {
                Ok(response) => {
                    record_items(&response);
                    BatchOutcome::Ok(response.into())
                }
                Err(e) => BatchOutcome::Failed(FailureEnvelope::new(e.to_string())),
            })
            .collect();

        return Ok(Json(serde_json::to_value(BatchListEnvelope::new(results))?));
    }

    let request: DynamicQueryRequest = serde_json::from_value(body)?;
    debug!(
        website_id = %tenant.website_id,
        parameters = request.parameters.len(),
        "Query received"
    );

    let response = state.orchestrator.run(&request, &tenant).await?;
    record_items(&response);

    Ok(Json(serde_json::to_value(BatchEnvelope::from(response))?))
}

fn record_items(response: &BatchResponse) {
    let m = metrics();
    m.parameters_executed.inc_by(response.data.len() as u64);
    for item in &response.data {
        // Execution failures were compiled before reaching the store.
        if item.success || item.error_kind == Some(ErrorKind::Execution) {
            m.queries_compiled.inc();
        }
        if !item.success {
            m.parameter_failures.inc();
            if item.error_kind == Some(ErrorKind::Validation) {
                m.validation_failures.inc();
            }
        }
    }
}

/// POST /query/compile - Validate and compile without executing.
pub async fn compile_handler(
    State(state): State<AppState>,
    tenant: TenantScope,
    payload: Result<Json<CompileRequest>, JsonRejection>,
) -> Result<Json<CompileEnvelope>, ApiError> {
    let Json(request) = payload?;
    metrics().compile_requests.inc();

    request
        .validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let website_id = request
        .website_id
        .as_deref()
        .filter(|id| !id.trim().is_empty())
        .or(tenant.website_id())
        .ok_or_else(|| ApiError::bad_request("website_id is required"))?;
    let timezone =
        engine_core::tenant::resolve_timezone(request.timezone.as_deref().or(tenant.timezone()))?;

    let mut scope = QueryScope::new(
        website_id,
        request.start_date.clone(),
        request.end_date.clone(),
    )
    .timezone(timezone)
    .offset(request.offset.unwrap_or(0));
    if let Some(limit) = request.limit.filter(|&limit| limit > 0) {
        scope = scope.limit(limit);
    }

    let compiled = match state.orchestrator.compile_custom(&request.config(), &scope) {
        Ok(compiled) => compiled,
        Err(e) => {
            if e.kind() == ErrorKind::Validation {
                metrics().validation_failures.inc();
            }
            warn!(website_id, table = %request.table, code = e.code(), error = %e, "Compile failed");
            return Err(e.into());
        }
    };

    metrics().queries_compiled.inc();
    Ok(Json(CompileEnvelope {
        success: true,
        compiled,
    }))
}

/// POST /query/custom - Validate, compile and execute a free-form query.
pub async fn custom_handler(
    State(state): State<AppState>,
    tenant: TenantScope,
    payload: Result<Json<CustomQueryRequest>, JsonRejection>,
) -> Result<Json<CustomQueryEnvelope>, ApiError> {
    let Json(mut request) = payload?;
    metrics().custom_queries.inc();

    if request.timezone.is_none() {
        request.timezone = tenant.timezone().map(str::to_string);
    }

    match state
        .orchestrator
        .execute_custom(&request, tenant.website_id())
        .await
    {
        Ok(result) => {
            metrics().queries_compiled.inc();
            info!(
                table = %request.query.table,
                rows = result.meta.row_count,
                latency_ms = result.meta.execution_time,
                "Custom query completed"
            );
            Ok(Json(CustomQueryEnvelope {
                success: true,
                result,
            }))
        }
        Err(e) => {
            if e.kind() == ErrorKind::Validation {
                metrics().validation_failures.inc();
            }
            warn!(table = %request.query.table, code = e.code(), error = %e, "Custom query failed");
            Err(e.into())
        }
    }
}

/// GET /query/types - Catalog introspection.
pub async fn types_handler(State(state): State<AppState>) -> Json<QueryTypesEnvelope> {
    let catalog = state.orchestrator.catalog();

    Json(QueryTypesEnvelope {
        success: true,
        types: catalog.ids().map(str::to_string).collect(),
        configs: catalog.list(),
    })
}
