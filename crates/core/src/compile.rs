//! SQL compilation for validated query configs.
//!
//! Output is ClickHouse SQL with typed `{name:Type}` placeholders. Values
//! only ever travel in the parameter map; the text contains identifiers from
//! the schema registry, aliases (quoted) and fixed keywords.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{Result, ValidationError, ValidationErrorKind};
use crate::ident::quote_identifier;
use crate::limits::clamp_limit;
use crate::query::{CustomQueryConfig, CustomQueryFilter, OperatorFamily};
use crate::schema::{ColumnType, SchemaRegistry, TableDefinition};

/// Output column for time-bucketed queries.
pub const BUCKET_COLUMN: &str = "date";

const TENANT_PARAM: &str = "website_id";
const START_PARAM: &str = "start_date";
const END_PARAM: &str = "end_date";
const TIMEZONE_PARAM: &str = "timezone";

/// A bound query parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    String(String),
    Number(serde_json::Number),
    StringList(Vec<String>),
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// Parameter map keyed by placeholder name. Ordered for determinism.
pub type QueryParams = BTreeMap<String, ParamValue>;

/// SQL text plus the values for its placeholders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: QueryParams,
}

/// Tenant, window and paging a config is compiled under.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryScope {
    pub tenant_id: String,
    pub start_date: String,
    pub end_date: String,
    pub timezone: String,
    /// Requested row limit; clamped during compilation.
    pub limit: u32,
    pub offset: u32,
}

impl QueryScope {
    pub fn new(
        tenant_id: impl Into<String>,
        start_date: impl Into<String>,
        end_date: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            start_date: start_date.into(),
            end_date: end_date.into(),
            timezone: "UTC".to_string(),
            limit: crate::limits::DEFAULT_QUERY_LIMIT,
            offset: 0,
        }
    }

    pub fn timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }
}

fn placeholder(name: &str, ty: &str) -> String {
    format!("{{{}:{}}}", name, ty)
}

fn parse_datetime(param: &str) -> String {
    format!(
        "parseDateTimeBestEffort({}, {})",
        placeholder(param, "String"),
        placeholder(TIMEZONE_PARAM, "String")
    )
}

/// Compile a validated config.
///
/// Table and column existence are trusted; only the table lookup itself can
/// fail, for callers that skipped validation.
pub fn compile(
    registry: &SchemaRegistry,
    config: &CustomQueryConfig,
    scope: &QueryScope,
) -> Result<CompiledQuery> {
    let table = registry.get_table(&config.table).ok_or_else(|| {
        ValidationError::new(
            ValidationErrorKind::UnknownTable,
            format!("Invalid table: {}", config.table),
        )
        .with_field("table")
    })?;

    let mut params = QueryParams::new();
    params.insert(TENANT_PARAM.into(), scope.tenant_id.as_str().into());
    params.insert(START_PARAM.into(), scope.start_date.as_str().into());
    params.insert(END_PARAM.into(), scope.end_date.as_str().into());
    params.insert(TIMEZONE_PARAM.into(), scope.timezone.as_str().into());

    let time_column = quote_identifier(&table.primary_time_field);
    let timezone = placeholder(TIMEZONE_PARAM, "String");

    // Projection: bucket, then unprojected group keys, then aggregates.
    let mut projection = Vec::with_capacity(config.selects.len() + config.group_by.len() + 1);
    if let Some(unit) = config.time_bucket {
        projection.push(format!(
            "{} AS {}",
            unit.bucket_sql(&time_column, &timezone),
            BUCKET_COLUMN
        ));
    }
    let mut projected: Vec<&str> = Vec::new();
    for field in &config.group_by {
        let selected = config.selects.iter().any(|s| s.field == *field);
        if !selected && !projected.contains(&field.as_str()) {
            projection.push(quote_identifier(field));
            projected.push(field);
        }
    }
    for select in &config.selects {
        let column = if select.is_wildcard() {
            None
        } else {
            Some(quote_identifier(&select.field))
        };
        projection.push(format!(
            "{} AS {}",
            select.aggregate.sql(column.as_deref()),
            quote_identifier(&select.output_name())
        ));
    }

    let mut predicates = vec![
        format!(
            "{} = {}",
            quote_identifier(&table.client_id_field),
            placeholder(TENANT_PARAM, "String")
        ),
        format!("{} >= {}", time_column, parse_datetime(START_PARAM)),
        format!("{} <= {}", time_column, parse_datetime(END_PARAM)),
    ];
    for (index, filter) in config.filters.iter().enumerate() {
        let name = format!("filter_{}", index);
        let (predicate, value) = compile_filter(table, filter, &name);
        predicates.push(predicate);
        params.insert(name, value);
    }

    let mut lines = vec![
        format!("SELECT {}", projection.join(", ")),
        format!("FROM {}", table.qualified_name()),
        format!("WHERE {}", predicates.join(" AND ")),
    ];

    let mut group_keys: Vec<String> = Vec::new();
    if config.time_bucket.is_some() {
        group_keys.push(BUCKET_COLUMN.to_string());
    }
    group_keys.extend(config.group_by.iter().map(|f| quote_identifier(f)));
    if !group_keys.is_empty() {
        lines.push(format!("GROUP BY {}", group_keys.join(", ")));
    }

    if config.time_bucket.is_some() {
        lines.push(format!("ORDER BY {} ASC", BUCKET_COLUMN));
    } else if let Some(first) = config.selects.first().filter(|_| !config.group_by.is_empty()) {
        lines.push(format!("ORDER BY {} DESC", quote_identifier(&first.output_name())));
    }

    lines.push(format!("LIMIT {}", clamp_limit(scope.limit)));
    if scope.offset > 0 {
        lines.push(format!("OFFSET {}", scope.offset));
    }

    Ok(CompiledQuery {
        sql: lines.join("\n"),
        params,
    })
}

fn compile_filter(
    table: &TableDefinition,
    filter: &CustomQueryFilter,
    name: &str,
) -> (String, ParamValue) {
    let column = quote_identifier(&filter.field);
    let column_type = table
        .get_column(&filter.field)
        .map(|c| c.column_type)
        .unwrap_or(ColumnType::String);
    let operator = filter.operator;

    let (operand, value) = match (operator.family(), column_type) {
        (OperatorFamily::Membership, _) => (
            placeholder(name, "Array(String)"),
            operator.bind_value(&filter.value),
        ),
        (OperatorFamily::Pattern | OperatorFamily::Prefix, _) => {
            (placeholder(name, "String"), operator.bind_value(&filter.value))
        }
        (OperatorFamily::Equality | OperatorFamily::Ordering, ColumnType::DateTime) => (
            parse_datetime(name),
            ParamValue::String(filter.value.to_string()),
        ),
        (OperatorFamily::Ordering, _) | (OperatorFamily::Equality, ColumnType::Number) => {
            (placeholder(name, "Float64"), operator.bind_value(&filter.value))
        }
        (OperatorFamily::Equality, _) => {
            (placeholder(name, "String"), operator.bind_value(&filter.value))
        }
    };

    (operator.predicate(&column, &operand), value)
}
