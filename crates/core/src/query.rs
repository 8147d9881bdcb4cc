//! Declarative query model.
//!
//! A `CustomQueryConfig` names a registry table plus selects, filters and
//! group keys. Aggregates and operators are closed enums; unknown tokens fail
//! at parse time with `UnsupportedAggregate` / `UnsupportedOperator`.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::compile::ParamValue;
use crate::error::Error;

/// Literal select field meaning "all rows".
pub const WILDCARD: &str = "*";

/// Aggregate function applied to a select field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Aggregate {
    Count,
    Uniq,
    Sum,
    Avg,
    Max,
    Min,
}

impl Aggregate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Uniq => "uniq",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Max => "max",
            Self::Min => "min",
        }
    }

    /// Whether the aggregate is valid on non-aggregatable columns.
    pub fn counts_rows(&self) -> bool {
        matches!(self, Self::Count | Self::Uniq)
    }

    /// SQL fragment for this aggregate over an already-rendered column.
    ///
    /// `None` means the wildcard, only meaningful for `count`.
    pub fn sql(&self, column: Option<&str>) -> String {
        match (self, column) {
            (Self::Count, None) => "count()".to_string(),
            (_, None) => format!("{}()", self.as_str()),
            (_, Some(column)) => format!("{}({})", self.as_str(), column),
        }
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Aggregate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "count" => Ok(Self::Count),
            "uniq" => Ok(Self::Uniq),
            "sum" => Ok(Self::Sum),
            "avg" => Ok(Self::Avg),
            "max" => Ok(Self::Max),
            "min" => Ok(Self::Min),
            other => Err(Error::UnsupportedAggregate(other.to_string())),
        }
    }
}

impl TryFrom<String> for Aggregate {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Shape of the bound parameter an operator compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorFamily {
    /// `=` / `!=`
    Equality,
    /// `>` `<` `>=` `<=`
    Ordering,
    /// `LIKE` with `%...%`
    Pattern,
    /// `startsWith`
    Prefix,
    /// `IN` / `NOT IN`
    Membership,
}

/// Filter comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    Contains,
    NotContains,
    StartsWith,
    In,
    NotIn,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Lt => "lt",
            Self::Gte => "gte",
            Self::Lte => "lte",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::StartsWith => "starts_with",
            Self::In => "in",
            Self::NotIn => "not_in",
        }
    }

    pub fn family(&self) -> OperatorFamily {
        match self {
            Self::Eq | Self::Ne => OperatorFamily::Equality,
            Self::Gt | Self::Lt | Self::Gte | Self::Lte => OperatorFamily::Ordering,
            Self::Contains | Self::NotContains => OperatorFamily::Pattern,
            Self::StartsWith => OperatorFamily::Prefix,
            Self::In | Self::NotIn => OperatorFamily::Membership,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::Contains => "LIKE",
            Self::NotContains => "NOT LIKE",
            Self::StartsWith => "startsWith",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
        }
    }

    /// Predicate comparing `column` against the placeholder `operand`.
    ///
    /// `operand` is a fully rendered placeholder expression such as
    /// `{filter_0:String}`.
    pub fn predicate(&self, column: &str, operand: &str) -> String {
        match self.family() {
            OperatorFamily::Prefix => format!("startsWith({}, {})", column, operand),
            _ => format!("{} {} {}", column, self.symbol(), operand),
        }
    }

    /// Coerce a filter value into the parameter this operator binds.
    pub fn bind_value(&self, value: &FilterValue) -> ParamValue {
        match self.family() {
            OperatorFamily::Pattern => {
                ParamValue::String(format!("%{}%", escape_like(&value.to_string())))
            }
            OperatorFamily::Membership => ParamValue::StringList(value.to_strings()),
            OperatorFamily::Ordering => match value {
                FilterValue::Scalar(scalar) => scalar.to_number_param(),
                FilterValue::List(_) => ParamValue::String(value.to_string()),
            },
            OperatorFamily::Equality | OperatorFamily::Prefix => {
                ParamValue::String(value.to_string())
            }
        }
    }
}

/// Escape `LIKE` metacharacters so the value matches literally.
fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" => Ok(Self::Eq),
            "ne" => Ok(Self::Ne),
            "gt" => Ok(Self::Gt),
            "lt" => Ok(Self::Lt),
            "gte" => Ok(Self::Gte),
            "lte" => Ok(Self::Lte),
            "contains" | "like" => Ok(Self::Contains),
            "not_contains" | "notContains" => Ok(Self::NotContains),
            "starts_with" | "startsWith" => Ok(Self::StartsWith),
            "in" => Ok(Self::In),
            "not_in" | "notIn" => Ok(Self::NotIn),
            other => Err(Error::UnsupportedOperator(other.to_string())),
        }
    }
}

impl TryFrom<String> for Operator {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A single filter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(serde_json::Number),
    Text(String),
}

impl Scalar {
    /// Numeric value, parsing numeric strings.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            Self::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        }
    }

    fn to_number_param(&self) -> ParamValue {
        match self {
            Self::Number(n) => ParamValue::Number(n.clone()),
            Self::Text(s) => {
                let parsed = match s.trim().parse::<i64>() {
                    Ok(i) => Some(serde_json::Number::from(i)),
                    Err(_) => self.as_f64().and_then(serde_json::Number::from_f64),
                };
                match parsed {
                    Some(n) => ParamValue::Number(n),
                    None => ParamValue::String(s.clone()),
                }
            }
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

/// Filter value: a scalar or a list of scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    List(Vec<Scalar>),
    Scalar(Scalar),
}

impl FilterValue {
    pub fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }

    /// Every element rendered as a string; a scalar becomes a one-element list.
    pub fn to_strings(&self) -> Vec<String> {
        match self {
            Self::List(items) => items.iter().map(ToString::to_string).collect(),
            Self::Scalar(s) => vec![s.to_string()],
        }
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(s) => write!(f, "{}", s),
            Self::List(items) => {
                let joined: Vec<String> = items.iter().map(ToString::to_string).collect();
                f.write_str(&joined.join(","))
            }
        }
    }
}

impl From<Scalar> for FilterValue {
    fn from(value: Scalar) -> Self {
        Self::Scalar(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::Scalar(value.into())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::Scalar(value.into())
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Scalar(value.into())
    }
}

impl From<Vec<&str>> for FilterValue {
    fn from(values: Vec<&str>) -> Self {
        Self::List(values.into_iter().map(Scalar::from).collect())
    }
}

/// One select expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomQuerySelect {
    /// Column name or `*`.
    pub field: String,
    pub aggregate: Aggregate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl CustomQuerySelect {
    pub fn new(field: impl Into<String>, aggregate: Aggregate) -> Self {
        Self {
            field: field.into(),
            aggregate,
            alias: None,
        }
    }

    /// `count()` over all rows.
    pub fn count_all() -> Self {
        Self::new(WILDCARD, Aggregate::Count)
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn is_wildcard(&self) -> bool {
        self.field == WILDCARD
    }

    /// Output column name: the explicit alias, or `{aggregate}_{field|all}`.
    pub fn output_name(&self) -> String {
        match &self.alias {
            Some(alias) if !alias.is_empty() => alias.clone(),
            _ => {
                let field = if self.is_wildcard() { "all" } else { &self.field };
                format!("{}_{}", self.aggregate, field)
            }
        }
    }
}

/// One filter predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomQueryFilter {
    pub field: String,
    #[serde(alias = "op")]
    pub operator: Operator,
    pub value: FilterValue,
}

impl CustomQueryFilter {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<FilterValue>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }
}

/// Time bucket granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    #[serde(alias = "hourly")]
    Hour,
    #[default]
    #[serde(alias = "daily")]
    Day,
}

impl TimeUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
        }
    }

    /// Bucket expression for `column`, evaluated in the bound timezone.
    pub fn bucket_sql(&self, column: &str, timezone: &str) -> String {
        match self {
            Self::Hour => format!("toStartOfHour({}, {})", column, timezone),
            Self::Day => format!("toDate({}, {})", column, timezone),
        }
    }
}

/// A declarative query over one registry table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomQueryConfig {
    pub table: String,
    pub selects: Vec<CustomQuerySelect>,
    #[serde(default)]
    pub filters: Vec<CustomQueryFilter>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub group_by: Vec<String>,
    /// Bucket rows by the table's time field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_bucket: Option<TimeUnit>,
}

impl CustomQueryConfig {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    pub fn select(mut self, select: CustomQuerySelect) -> Self {
        self.selects.push(select);
        self
    }

    pub fn filter(mut self, filter: CustomQueryFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn group_by(mut self, field: impl Into<String>) -> Self {
        self.group_by.push(field.into());
        self
    }

    pub fn bucket(mut self, unit: TimeUnit) -> Self {
        self.time_bucket = Some(unit);
        self
    }
}

/// A custom query plus its tenant scope and window.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomQueryRequest {
    pub query: CustomQueryConfig,
    /// Falls back to the request's tenant context when absent.
    #[serde(default, alias = "website_id")]
    pub website_id: Option<String>,
    #[serde(alias = "start_date")]
    pub start_date: String,
    #[serde(alias = "end_date")]
    pub end_date: String,
    #[serde(default)]
    pub timezone: Option<String>,
    /// 0 counts as absent.
    #[serde(default)]
    pub limit: Option<u32>,
}

impl CustomQueryRequest {
    pub fn limit(&self) -> Option<u32> {
        self.limit.filter(|&limit| limit > 0)
    }
}

/// Accept either `"field"` or `["a", "b"]`.
pub(crate) fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) if s.is_empty() => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    })
}
