//! Query catalog: named, pre-approved query shapes.
//!
//! Each entry builds a `CustomQueryConfig` from a template and declares which
//! request filters it accepts. The catalog is built once and shared read-only.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{Error, Result};
use crate::limits::DEFAULT_BATCH_LIMIT;
use crate::query::{
    Aggregate, CustomQueryConfig, CustomQueryFilter, CustomQuerySelect, Operator, TimeUnit,
};
use crate::schema::SchemaRegistry;

/// Filter fields every customizable entry accepts.
pub const GLOBAL_ALLOWED_FILTERS: &[&str] = &[
    "path",
    "country",
    "device_type",
    "browser_name",
    "os_name",
    "referrer",
    "utm_source",
    "utm_medium",
    "utm_campaign",
];

/// Inputs a template may depend on.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateContext<'a> {
    pub time_unit: TimeUnit,
    /// Normalised website domain, when known.
    pub website_domain: Option<&'a str>,
}

/// Caller-supplied customisation applied on top of an entry's template.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveRequest<'a> {
    pub context: TemplateContext<'a>,
    pub filters: &'a [CustomQueryFilter],
    pub group_by: &'a [String],
}

type Template = Box<dyn Fn(&TemplateContext<'_>) -> CustomQueryConfig + Send + Sync>;

/// One named query shape.
pub struct QueryCatalogEntry {
    pub id: String,
    pub allowed_filters: BTreeSet<String>,
    pub customizable: bool,
    pub default_limit: u32,
    template: Template,
}

impl QueryCatalogEntry {
    pub fn new<F>(id: impl Into<String>, template: F) -> Self
    where
        F: Fn(&TemplateContext<'_>) -> CustomQueryConfig + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            allowed_filters: BTreeSet::new(),
            customizable: true,
            default_limit: DEFAULT_BATCH_LIMIT,
            template: Box::new(template),
        }
    }

    pub fn allow(mut self, fields: &[&str]) -> Self {
        self.allowed_filters
            .extend(fields.iter().map(|f| f.to_string()));
        self
    }

    pub fn fixed(mut self) -> Self {
        self.customizable = false;
        self
    }

    pub fn default_limit(mut self, limit: u32) -> Self {
        self.default_limit = limit;
        self
    }

    /// Whether a request filter on `field` is permitted.
    pub fn permits_filter(&self, field: &str) -> bool {
        GLOBAL_ALLOWED_FILTERS.contains(&field) || self.allowed_filters.contains(field)
    }

    pub fn build(&self, ctx: &TemplateContext<'_>) -> CustomQueryConfig {
        (self.template)(ctx)
    }

    pub fn info(&self) -> EntryInfo {
        EntryInfo {
            allowed_filters: self.allowed_filters.iter().cloned().collect(),
            customizable: self.customizable,
            default_limit: self.default_limit,
        }
    }
}

impl fmt::Debug for QueryCatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCatalogEntry")
            .field("id", &self.id)
            .field("allowed_filters", &self.allowed_filters)
            .field("customizable", &self.customizable)
            .field("default_limit", &self.default_limit)
            .finish_non_exhaustive()
    }
}

/// Public introspection shape of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryInfo {
    pub allowed_filters: Vec<String>,
    pub customizable: bool,
    pub default_limit: u32,
}

/// Immutable set of catalog entries keyed by id.
#[derive(Debug, Default)]
pub struct QueryCatalog {
    entries: BTreeMap<String, QueryCatalogEntry>,
}

impl QueryCatalog {
    pub fn new(entries: impl IntoIterator<Item = QueryCatalogEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.id.clone(), e)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&QueryCatalogEntry> {
        self.entries.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn list(&self) -> BTreeMap<String, EntryInfo> {
        self.entries
            .iter()
            .map(|(id, entry)| (id.clone(), entry.info()))
            .collect()
    }

    /// Build the config for `id`, applying the entry's filter policy.
    ///
    /// Customizable entries append permitted request filters and group keys
    /// that exist on the entry's table; a filter outside the permitted set
    /// fails the whole resolution. Fixed entries ignore request filters.
    pub fn resolve(
        &self,
        registry: &SchemaRegistry,
        id: &str,
        request: &ResolveRequest<'_>,
    ) -> Result<CustomQueryConfig> {
        let entry = self
            .get(id)
            .ok_or_else(|| Error::UnknownQueryType(id.to_string()))?;
        let mut config = entry.build(&request.context);

        if !entry.customizable {
            return Ok(config);
        }

        for filter in request.filters {
            if !entry.permits_filter(&filter.field) {
                return Err(Error::FilterNotPermitted {
                    parameter: entry.id.clone(),
                    field: filter.field.clone(),
                });
            }
        }

        let Some(table) = registry.get_table(&config.table) else {
            return Ok(config);
        };
        for filter in request.filters {
            if table.get_column(&filter.field).is_some() {
                config.filters.push(filter.clone());
            } else {
                tracing::debug!(
                    parameter = %entry.id,
                    field = %filter.field,
                    table = %table.name,
                    "Skipping filter on column the table does not have"
                );
            }
        }
        for field in request.group_by {
            if table.get_column(field).is_some() && !config.group_by.contains(field) {
                config.group_by.push(field.clone());
            }
        }

        Ok(config)
    }

    /// The built-in analytics catalog.
    pub fn analytics() -> Self {
        Self::new(analytics_entries())
    }
}

fn visitors() -> CustomQuerySelect {
    CustomQuerySelect::new("anonymous_id", Aggregate::Uniq).alias("visitors")
}

fn not_empty(field: &str) -> CustomQueryFilter {
    CustomQueryFilter::new(field, Operator::Ne, "")
}

/// Pageviews and visitors per non-empty value of `column`.
fn pageview_breakdown(column: &'static str) -> impl Fn(&TemplateContext<'_>) -> CustomQueryConfig {
    move |_| {
        CustomQueryConfig::new("pageviews")
            .select(CustomQuerySelect::count_all().alias("pageviews"))
            .select(visitors())
            .filter(not_empty(column))
            .group_by(column)
    }
}

/// Row count and visitors per non-empty value of `column` on `table`.
fn span_breakdown(
    table: &'static str,
    column: &'static str,
    count_alias: &'static str,
) -> impl Fn(&TemplateContext<'_>) -> CustomQueryConfig {
    move |_| {
        CustomQueryConfig::new(table)
            .select(CustomQuerySelect::count_all().alias(count_alias))
            .select(visitors())
            .filter(not_empty(column))
            .group_by(column)
    }
}

fn revenue_breakdown(column: &'static str) -> impl Fn(&TemplateContext<'_>) -> CustomQueryConfig {
    move |_| {
        CustomQueryConfig::new("revenue")
            .select(CustomQuerySelect::new("amount", Aggregate::Sum).alias("revenue"))
            .select(CustomQuerySelect::count_all().alias("transactions"))
            .select(CustomQuerySelect::new("anonymous_id", Aggregate::Uniq).alias("customers"))
            .filter(not_empty(column))
            .group_by(column)
    }
}

fn analytics_entries() -> Vec<QueryCatalogEntry> {
    vec![
        QueryCatalogEntry::new("summary_metrics", |_| {
            CustomQueryConfig::new("pageviews")
                .select(CustomQuerySelect::count_all().alias("pageviews"))
                .select(visitors())
                .select(CustomQuerySelect::new("session_id", Aggregate::Uniq).alias("sessions"))
                .select(
                    CustomQuerySelect::new("time_on_page", Aggregate::Avg)
                        .alias("avg_time_on_page"),
                )
        })
        .default_limit(1),
        QueryCatalogEntry::new("events_by_date", |ctx| {
            CustomQueryConfig::new("pageviews")
                .select(CustomQuerySelect::count_all().alias("pageviews"))
                .select(visitors())
                .select(CustomQuerySelect::new("session_id", Aggregate::Uniq).alias("sessions"))
                .bucket(ctx.time_unit)
        })
        .default_limit(1000),
        QueryCatalogEntry::new("top_pages", pageview_breakdown("path")),
        QueryCatalogEntry::new("top_referrers", |ctx| {
            let mut config = pageview_breakdown("referrer")(ctx);
            if let Some(domain) = ctx.website_domain {
                config = config.filter(CustomQueryFilter::new(
                    "referrer",
                    Operator::NotContains,
                    domain,
                ));
            }
            config
        }),
        QueryCatalogEntry::new("utm_sources", pageview_breakdown("utm_source")),
        QueryCatalogEntry::new("utm_mediums", pageview_breakdown("utm_medium")),
        QueryCatalogEntry::new("utm_campaigns", pageview_breakdown("utm_campaign")),
        QueryCatalogEntry::new("country", pageview_breakdown("country")),
        QueryCatalogEntry::new("region", pageview_breakdown("region")).allow(&["region"]),
        QueryCatalogEntry::new("browser_name", pageview_breakdown("browser_name")),
        QueryCatalogEntry::new("os_name", pageview_breakdown("os_name")),
        QueryCatalogEntry::new("device_type", pageview_breakdown("device_type")),
        QueryCatalogEntry::new(
            "custom_events",
            span_breakdown("custom_event_spans", "event_name", "events"),
        )
        .allow(&["event_name"]),
        QueryCatalogEntry::new(
            "error_types",
            span_breakdown("error_spans", "error_type", "errors"),
        )
        .allow(&["error_type", "message"]),
        QueryCatalogEntry::new("errors_by_page", span_breakdown("error_spans", "path", "errors"))
            .allow(&["error_type"]),
        QueryCatalogEntry::new("web_vitals", |_| {
            CustomQueryConfig::new("web_vitals_spans")
                .select(CustomQuerySelect::new("metric_value", Aggregate::Avg).alias("avg_value"))
                .select(CustomQuerySelect::new("metric_value", Aggregate::Max).alias("max_value"))
                .select(CustomQuerySelect::count_all().alias("samples"))
                .group_by("metric_name")
        })
        .allow(&["metric_name"]),
        QueryCatalogEntry::new(
            "outbound_links",
            span_breakdown("outgoing_links", "href", "clicks"),
        )
        .allow(&["href"]),
        QueryCatalogEntry::new("scroll_depth_summary", |_| {
            CustomQueryConfig::new("pageviews")
                .select(
                    CustomQuerySelect::new("scroll_depth", Aggregate::Avg)
                        .alias("avg_scroll_depth"),
                )
                .select(CustomQuerySelect::count_all().alias("pageviews"))
                .filter(CustomQueryFilter::new("scroll_depth", Operator::Gt, 0_i64))
        })
        .fixed()
        .default_limit(1),
        QueryCatalogEntry::new("revenue_by_country", revenue_breakdown("country"))
            .allow(&["currency", "provider"]),
        QueryCatalogEntry::new("revenue_by_provider", revenue_breakdown("provider"))
            .allow(&["currency", "provider"]),
    ]
}
