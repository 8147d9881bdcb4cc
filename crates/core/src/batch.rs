//! Batch orchestration over catalog parameters.
//!
//! A single request fans out one task per parameter and joins them; an
//! explicit list of requests is processed one request at a time. Failures are
//! captured per parameter and never abort siblings.

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use validator::Validate;

use crate::catalog::{QueryCatalog, ResolveRequest, TemplateContext};
use crate::compile::{compile, CompiledQuery, QueryParams, QueryScope};
use crate::error::{Error, ErrorKind, Result};
use crate::limits::{DEFAULT_BATCH_LIMIT, DEFAULT_QUERY_LIMIT, MAX_BATCH_REQUESTS};
use crate::query::{one_or_many, CustomQueryConfig, CustomQueryFilter, CustomQueryRequest, TimeUnit};
use crate::schema::SchemaRegistry;
use crate::tenant::{normalize_domain, resolve_timezone, TenantContext};
use crate::validate::QueryValidator;

/// One result row as returned by the store.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Runs compiled SQL against the analytics store.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str, params: &QueryParams) -> Result<Vec<Row>>;
}

/// Looks up a tenant's website domain. Lookup failures resolve to `None`.
#[async_trait]
pub trait DomainResolver: Send + Sync {
    async fn website_domain(&self, website_id: &str) -> Option<String>;
}


/// Request naming one or more catalog entries.
///
/// The `#[validate]` bound mirrors `MAX_BATCH_PARAMETERS`.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DynamicQueryRequest {
    /// Client correlation token, echoed back as `queryId`.
    #[serde(default)]
    pub id: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub parameters: Vec<String>,
    #[serde(default)]
    pub filters: Vec<CustomQueryFilter>,
    #[serde(default)]
    pub granularity: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub group_by: Vec<String>,
    /// Clamped at compile time; 0 counts as absent.
    #[serde(default)]
    pub limit: Option<u32>,
    /// 1-based; 0 counts as absent.
    #[serde(default)]
    pub page: Option<u32>,
}

impl DynamicQueryRequest {
    pub fn new<I, S>(parameters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            parameters: parameters.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// `hourly`/`hour` bucket by hour; anything else by day.
    pub fn time_unit(&self) -> TimeUnit {
        match self.granularity.as_deref() {
            Some("hourly") | Some("hour") => TimeUnit::Hour,
            _ => TimeUnit::Day,
        }
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit.filter(|&limit| limit > 0)
    }

    pub fn page(&self) -> u32 {
        self.page.filter(|&page| page > 0).unwrap_or(1)
    }
}

/// Outcome of one parameter.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResultItem {
    pub parameter: String,
    pub success: bool,
    pub data: Vec<Row>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Kept for logs and metrics; the wire shape carries only the message.
    #[serde(skip)]
    pub error_kind: Option<ErrorKind>,
}

impl BatchResultItem {
    pub fn ok(parameter: impl Into<String>, data: Vec<Row>) -> Self {
        Self {
            parameter: parameter.into(),
            success: true,
            data,
            error: None,
            error_kind: None,
        }
    }

    pub fn failed(parameter: impl Into<String>, error: &Error) -> Self {
        Self {
            parameter: parameter.into(),
            success: false,
            data: Vec::new(),
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchMeta {
    pub parameters: Vec<String>,
    pub total_parameters: usize,
    pub page: u32,
    pub limit: u32,
    pub filters_applied: usize,
}

/// Envelope for one dynamic query request.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResponse {
    #[serde(rename = "queryId", skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
    pub data: Vec<BatchResultItem>,
    pub meta: BatchMeta,
}

impl BatchResponse {
    pub fn failures(&self) -> usize {
        self.data.iter().filter(|item| !item.success).count()
    }
}

/// Output of a directly executed custom query.
#[derive(Debug, Clone, Serialize)]
pub struct CustomQueryResult {
    pub data: Vec<Row>,
    pub meta: CustomQueryMeta,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomQueryMeta {
    pub row_count: usize,
    /// Milliseconds spent in the executor.
    pub execution_time: u64,
}

/// Resolves, validates, compiles and executes catalog parameters.
#[derive(Clone)]
pub struct BatchOrchestrator {
    registry: Arc<SchemaRegistry>,
    catalog: Arc<QueryCatalog>,
    executor: Arc<dyn QueryExecutor>,
    domains: Arc<dyn DomainResolver>,
}

impl BatchOrchestrator {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        catalog: Arc<QueryCatalog>,
        executor: Arc<dyn QueryExecutor>,
        domains: Arc<dyn DomainResolver>,
    ) -> Self {
        Self {
            registry,
            catalog,
            executor,
            domains,
        }
    }

    pub fn catalog(&self) -> &QueryCatalog {
        &self.catalog
    }

    /// Run every parameter of `request` concurrently and collect all results.
    pub async fn run(
        &self,
        request: &DynamicQueryRequest,
        tenant: &TenantContext,
    ) -> Result<BatchResponse> {
        request
            .validate()
            .map_err(|e| Error::invalid_request(e.to_string()))?;

        let domain = self
            .domains
            .website_domain(&tenant.website_id)
            .await
            .and_then(|d| normalize_domain(&d));
        let context = TemplateContext {
            time_unit: request.time_unit(),
            website_domain: domain.as_deref(),
        };

        let started = Instant::now();
        let data = join_all(
            request
                .parameters
                .iter()
                .map(|parameter| self.run_parameter(parameter, request, tenant, context)),
        )
        .await;

        let response = BatchResponse {
            query_id: request.id.clone(),
            meta: BatchMeta {
                parameters: request.parameters.clone(),
                total_parameters: request.parameters.len(),
                page: request.page(),
                limit: request.limit().unwrap_or(DEFAULT_BATCH_LIMIT),
                filters_applied: request.filters.len(),
            },
            data,
        };

        tracing::info!(
            website_id = %tenant.website_id,
            parameters = response.meta.total_parameters,
            failures = response.failures(),
            latency_ms = started.elapsed().as_millis() as u64,
            "Batch completed"
        );

        Ok(response)
    }

    /// Run explicit top-level requests one after another.
    ///
    /// Each element is decoded on its own, so a malformed request fails only
    /// its own slot.
    pub async fn run_batch(
        &self,
        requests: &[serde_json::Value],
        tenant: &TenantContext,
    ) -> Result<Vec<Result<BatchResponse>>> {
        if requests.len() > MAX_BATCH_REQUESTS {
            return Err(Error::invalid_request(format!(
                "Maximum {} requests per batch",
                MAX_BATCH_REQUESTS
            )));
        }

        let mut results = Vec::with_capacity(requests.len());
        for (index, raw) in requests.iter().enumerate() {
            let result = match DynamicQueryRequest::deserialize(raw) {
                Ok(request) => self.run(&request, tenant).await,
                Err(e) => Err(Error::from(e)),
            };
            if let Err(e) = &result {
                tracing::warn!(
                    website_id = %tenant.website_id,
                    index,
                    error = %e,
                    "Batch request failed"
                );
            }
            results.push(result);
        }
        Ok(results)
    }

    async fn run_parameter(
        &self,
        parameter: &str,
        request: &DynamicQueryRequest,
        tenant: &TenantContext,
        context: TemplateContext<'_>,
    ) -> BatchResultItem {
        match self.execute_parameter(parameter, request, tenant, context).await {
            Ok(rows) => BatchResultItem::ok(parameter, rows),
            Err(e) => {
                tracing::warn!(
                    website_id = %tenant.website_id,
                    parameter,
                    code = e.code(),
                    error = %e,
                    "Parameter failed"
                );
                BatchResultItem::failed(parameter, &e)
            }
        }
    }

    async fn execute_parameter(
        &self,
        parameter: &str,
        request: &DynamicQueryRequest,
        tenant: &TenantContext,
        context: TemplateContext<'_>,
    ) -> Result<Vec<Row>> {
        let resolve = ResolveRequest {
            context,
            filters: &request.filters,
            group_by: &request.group_by,
        };
        let config = self.catalog.resolve(&self.registry, parameter, &resolve)?;
        let default_limit = self
            .catalog
            .get(parameter)
            .map(|entry| entry.default_limit)
            .unwrap_or(DEFAULT_BATCH_LIMIT);

        let limit = request.limit().unwrap_or(default_limit);
        let scope = QueryScope {
            tenant_id: tenant.website_id.clone(),
            start_date: tenant.start_date.clone(),
            end_date: tenant.inclusive_end_date(),
            timezone: tenant.timezone.clone(),
            limit,
            offset: (request.page() - 1).saturating_mul(limit),
        };

        let compiled = self.compile_custom(&config, &scope)?;
        self.executor.execute(&compiled.sql, &compiled.params).await
    }

    /// Validate then compile; no SQL is built for an invalid config.
    pub fn compile_custom(
        &self,
        config: &CustomQueryConfig,
        scope: &QueryScope,
    ) -> Result<CompiledQuery> {
        QueryValidator::new(&self.registry).validate(config)?;
        compile(&self.registry, config, scope)
    }

    /// Validate, compile and execute a free-form query.
    ///
    /// The body's `websiteId` wins over `fallback_website_id`.
    pub async fn execute_custom(
        &self,
        request: &CustomQueryRequest,
        fallback_website_id: Option<&str>,
    ) -> Result<CustomQueryResult> {
        let website_id = request
            .website_id
            .as_deref()
            .or(fallback_website_id)
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| Error::invalid_request("website_id is required"))?;

        let scope = QueryScope {
            tenant_id: website_id.to_string(),
            start_date: request.start_date.clone(),
            end_date: request.end_date.clone(),
            timezone: resolve_timezone(request.timezone.as_deref())?,
            limit: request.limit().unwrap_or(DEFAULT_QUERY_LIMIT),
            offset: 0,
        };
        let compiled = self.compile_custom(&request.query, &scope)?;

        let started = Instant::now();
        let data = self.executor.execute(&compiled.sql, &compiled.params).await?;
        let execution_time = started.elapsed().as_millis() as u64;

        tracing::debug!(
            website_id,
            table = %request.query.table,
            rows = data.len(),
            latency_ms = execution_time,
            "Custom query executed"
        );

        Ok(CustomQueryResult {
            meta: CustomQueryMeta {
                row_count: data.len(),
                execution_time,
            },
            data,
        })
    }
}
