//! Schema registry: the whitelist of queryable tables and columns.
//!
//! Built once at startup and shared read-only. Every table and column name
//! that reaches compiled SQL comes from here.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::ident::{is_plain_identifier, quote_identifier};

/// Logical column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Number,
    DateTime,
    Enum,
}

/// A queryable column and its capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// May be used with sum/avg/max/min.
    pub aggregatable: bool,
    /// May appear in filters.
    pub filterable: bool,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            aggregatable: false,
            filterable: false,
        }
    }

    /// Filterable string dimension.
    pub fn dimension(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::String).filterable()
    }

    /// Filterable low-cardinality dimension.
    pub fn enumeration(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Enum).filterable()
    }

    /// Filterable, aggregatable numeric column.
    pub fn metric(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Number).filterable().aggregatable()
    }

    /// Identifier column, countable but not filterable.
    pub fn identifier(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::String)
    }

    pub fn timestamp(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::DateTime).filterable()
    }

    pub fn filterable(mut self) -> Self {
        self.filterable = true;
        self
    }

    pub fn aggregatable(mut self) -> Self {
        self.aggregatable = true;
        self
    }
}

/// A queryable table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDefinition {
    pub name: String,
    /// Logical namespace (ClickHouse database).
    pub database: String,
    /// Column every query is scoped to the tenant by.
    pub client_id_field: String,
    /// Column used for the date range predicate.
    pub primary_time_field: String,
    pub description: String,
    pub columns: BTreeMap<String, ColumnDefinition>,
}

impl TableDefinition {
    pub fn new(
        name: impl Into<String>,
        database: impl Into<String>,
        client_id_field: impl Into<String>,
        primary_time_field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            database: database.into(),
            client_id_field: client_id_field.into(),
            primary_time_field: primary_time_field.into(),
            description: String::new(),
            columns: BTreeMap::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn column(mut self, column: ColumnDefinition) -> Self {
        self.columns.insert(column.name.clone(), column);
        self
    }

    pub fn get_column(&self, field: &str) -> Option<&ColumnDefinition> {
        self.columns.get(field)
    }

    /// `database.name` as emitted in FROM clauses.
    pub fn qualified_name(&self) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.database),
            quote_identifier(&self.name)
        )
    }

    fn check(&self) -> Result<()> {
        for name in [&self.name, &self.database] {
            if !is_plain_identifier(name) {
                return Err(Error::internal(format!(
                    "schema: '{}' is not a plain identifier",
                    name
                )));
            }
        }
        for column in self.columns.keys() {
            if !is_plain_identifier(column) {
                return Err(Error::internal(format!(
                    "schema: column '{}.{}' is not a plain identifier",
                    self.name, column
                )));
            }
        }
        for required in [&self.client_id_field, &self.primary_time_field] {
            if !self.columns.contains_key(required) {
                return Err(Error::internal(format!(
                    "schema: table '{}' does not declare column '{}'",
                    self.name, required
                )));
            }
        }
        Ok(())
    }
}

/// Immutable catalog of queryable tables, keyed by table name.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    tables: BTreeMap<String, TableDefinition>,
}

impl SchemaRegistry {
    /// Build a registry, checking that every name is a plain identifier and
    /// that scoping columns are declared.
    pub fn new(tables: impl IntoIterator<Item = TableDefinition>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for table in tables {
            table.check()?;
            if map.insert(table.name.clone(), table).is_some() {
                return Err(Error::internal("schema: duplicate table name"));
            }
        }
        Ok(Self { tables: map })
    }

    /// The built-in analytics schema.
    pub fn analytics() -> Self {
        Self::new(analytics_tables()).expect("built-in analytics schema is valid")
    }

    pub fn get_table(&self, name: &str) -> Option<&TableDefinition> {
        self.tables.get(name)
    }

    pub fn is_valid_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn get_column(&self, table: &str, field: &str) -> Option<&ColumnDefinition> {
        self.get_table(table).and_then(|t| t.get_column(field))
    }

    pub fn is_valid_column(&self, table: &str, field: &str) -> bool {
        self.get_column(table, field).is_some()
    }

    /// Table names in sorted order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDefinition> {
        self.tables.values()
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::analytics()
    }
}

const ANALYTICS_DB: &str = "analytics";

fn analytics_tables() -> Vec<TableDefinition> {
    vec![
        TableDefinition::new("pageviews", ANALYTICS_DB, "client_id", "time")
            .describe("Page views with visitor, session, device and acquisition context")
            .column(ColumnDefinition::identifier("client_id"))
            .column(ColumnDefinition::identifier("anonymous_id"))
            .column(ColumnDefinition::identifier("session_id").filterable())
            .column(ColumnDefinition::timestamp("time"))
            .column(ColumnDefinition::dimension("path"))
            .column(ColumnDefinition::dimension("url"))
            .column(ColumnDefinition::dimension("title"))
            .column(ColumnDefinition::dimension("referrer"))
            .column(ColumnDefinition::dimension("country"))
            .column(ColumnDefinition::dimension("region"))
            .column(ColumnDefinition::dimension("city"))
            .column(ColumnDefinition::enumeration("device_type"))
            .column(ColumnDefinition::dimension("browser_name"))
            .column(ColumnDefinition::dimension("os_name"))
            .column(ColumnDefinition::dimension("language"))
            .column(ColumnDefinition::dimension("utm_source"))
            .column(ColumnDefinition::dimension("utm_medium"))
            .column(ColumnDefinition::dimension("utm_campaign"))
            .column(ColumnDefinition::metric("time_on_page"))
            .column(ColumnDefinition::metric("scroll_depth"))
            .column(ColumnDefinition::metric("load_time"))
            .column(ColumnDefinition::metric("ttfb")),
        TableDefinition::new("custom_event_spans", ANALYTICS_DB, "client_id", "timestamp")
            .describe("Custom tracked events such as button clicks and form submissions")
            .column(ColumnDefinition::identifier("client_id"))
            .column(ColumnDefinition::identifier("anonymous_id"))
            .column(ColumnDefinition::identifier("session_id").filterable())
            .column(ColumnDefinition::timestamp("timestamp"))
            .column(ColumnDefinition::dimension("path"))
            .column(ColumnDefinition::dimension("event_name"))
            .column(ColumnDefinition::identifier("properties")),
        TableDefinition::new("error_spans", ANALYTICS_DB, "client_id", "timestamp")
            .describe("JavaScript errors and exceptions")
            .column(ColumnDefinition::identifier("client_id"))
            .column(ColumnDefinition::identifier("anonymous_id"))
            .column(ColumnDefinition::identifier("session_id").filterable())
            .column(ColumnDefinition::timestamp("timestamp"))
            .column(ColumnDefinition::dimension("path"))
            .column(ColumnDefinition::dimension("message"))
            .column(ColumnDefinition::dimension("filename"))
            .column(ColumnDefinition::dimension("error_type"))
            .column(ColumnDefinition::metric("lineno"))
            .column(ColumnDefinition::metric("colno"))
            .column(ColumnDefinition::identifier("stack")),
        TableDefinition::new("web_vitals_spans", ANALYTICS_DB, "client_id", "timestamp")
            .describe("Core Web Vitals measurements (FCP, LCP, CLS, INP, TTFB, FPS)")
            .column(ColumnDefinition::identifier("client_id"))
            .column(ColumnDefinition::identifier("anonymous_id"))
            .column(ColumnDefinition::identifier("session_id").filterable())
            .column(ColumnDefinition::timestamp("timestamp"))
            .column(ColumnDefinition::dimension("path"))
            .column(ColumnDefinition::enumeration("metric_name"))
            .column(ColumnDefinition::metric("metric_value")),
        TableDefinition::new("outgoing_links", ANALYTICS_DB, "client_id", "timestamp")
            .describe("External links clicked by visitors")
            .column(ColumnDefinition::identifier("client_id"))
            .column(ColumnDefinition::identifier("anonymous_id"))
            .column(ColumnDefinition::identifier("session_id").filterable())
            .column(ColumnDefinition::timestamp("timestamp"))
            .column(ColumnDefinition::dimension("path"))
            .column(ColumnDefinition::dimension("href"))
            .column(ColumnDefinition::dimension("text")),
        TableDefinition::new("revenue", ANALYTICS_DB, "client_id", "created_at")
            .describe("Payment transactions attributed to visitors")
            .column(ColumnDefinition::identifier("client_id"))
            .column(ColumnDefinition::identifier("anonymous_id"))
            .column(ColumnDefinition::identifier("session_id").filterable())
            .column(ColumnDefinition::identifier("transaction_id"))
            .column(ColumnDefinition::timestamp("created_at"))
            .column(ColumnDefinition::metric("amount"))
            .column(ColumnDefinition::enumeration("currency"))
            .column(ColumnDefinition::enumeration("provider"))
            .column(ColumnDefinition::enumeration("type"))
            .column(ColumnDefinition::dimension("country")),
    ]
}
