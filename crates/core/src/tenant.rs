//! Tenant context: which website a request reads and over what window.

use chrono::{Duration, NaiveDate, Utc};
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use url::Url;

use crate::error::{Error, Result};
use crate::limits::{DEFAULT_RANGE_DAYS, MAX_TIMEZONE_LEN};

pub const DEFAULT_TIMEZONE: &str = "UTC";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// IANA names ("Europe/Berlin"), abbreviations ("UTC") and offsets ("Etc/GMT+5").
static TIMEZONE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_+\-/]*$").expect("invalid timezone pattern")
});

/// Raw tenant parameters as they arrive on the query string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TenantParams {
    #[serde(default, alias = "websiteId")]
    pub website_id: Option<String>,
    #[serde(default, alias = "startDate")]
    pub start_date: Option<String>,
    #[serde(default, alias = "endDate")]
    pub end_date: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}

/// Resolved scope of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub website_id: String,
    pub start_date: String,
    pub end_date: String,
    pub timezone: String,
}

impl TenantContext {
    /// Resolve params against today's date.
    ///
    /// `header_timezone` is the `X-Timezone` value and wins over the query string.
    pub fn resolve(params: TenantParams, header_timezone: Option<&str>) -> Result<Self> {
        Self::resolve_at(params, header_timezone, Utc::now().date_naive())
    }

    pub fn resolve_at(
        params: TenantParams,
        header_timezone: Option<&str>,
        today: NaiveDate,
    ) -> Result<Self> {
        let website_id = params
            .website_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| Error::invalid_request("website_id is required"))?;

        let timezone = resolve_timezone(header_timezone.or(params.timezone.as_deref()))?;

        let start_date = params
            .start_date
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| {
                (today - Duration::days(DEFAULT_RANGE_DAYS))
                    .format(DATE_FORMAT)
                    .to_string()
            });
        let end_date = params
            .end_date
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| today.format(DATE_FORMAT).to_string());

        Ok(Self {
            website_id,
            start_date,
            end_date,
            timezone,
        })
    }

    /// End date with a bare day widened to its last second.
    pub fn inclusive_end_date(&self) -> String {
        inclusive_end_date(&self.end_date)
    }
}

/// Validate a timezone name, defaulting to UTC when absent or blank.
pub fn resolve_timezone(raw: Option<&str>) -> Result<String> {
    let tz = raw.map(str::trim).filter(|tz| !tz.is_empty());
    match tz {
        None => Ok(DEFAULT_TIMEZONE.to_string()),
        Some(tz) if tz.len() <= MAX_TIMEZONE_LEN && TIMEZONE_REGEX.is_match(tz) => {
            Ok(tz.to_string())
        }
        Some(_) => Err(Error::invalid_request("Invalid timezone")),
    }
}

/// `2024-01-31` becomes `2024-01-31 23:59:59`; other formats pass through.
pub fn inclusive_end_date(end: &str) -> String {
    match NaiveDate::parse_from_str(end, DATE_FORMAT) {
        Ok(_) => format!("{} 23:59:59", end),
        Err(_) => end.to_string(),
    }
}

/// Reduce a stored website domain to a bare host without `www.`.
pub fn normalize_domain(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed = if raw.contains("://") {
        Url::parse(raw)
    } else {
        Url::parse(&format!("https://{}", raw))
    };
    let url = parsed.ok()?;
    let host = url.host_str()?;
    let host = host.strip_prefix("www.").unwrap_or(host);
    Some(host.to_ascii_lowercase())
}
