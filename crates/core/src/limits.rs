//! Structural limits for compiled queries and batch requests.
//!
//! These bound the work a single request can push onto the analytics store.
//! The `#[validate]` derive macro requires literal values in attributes,
//! so request-level limits are duplicated there. Keep both in sync when modifying.

use std::time::Duration;

// === Query Shape Limits ===

/// Maximum select expressions per custom query.
pub const MAX_SELECTS: usize = 10;

/// Maximum filters per custom query (fixed catalog filters included).
pub const MAX_FILTERS: usize = 20;

/// Maximum group by fields per custom query.
pub const MAX_GROUP_BY: usize = 5;

// === Row Limits ===

/// Row limit when a custom query request does not name one.
pub const DEFAULT_QUERY_LIMIT: u32 = 1000;

/// Hard cap on the LIMIT clause of any compiled query.
pub const MAX_QUERY_LIMIT: u32 = 10_000;

/// Row limit for catalog parameters when neither request nor entry names one.
pub const DEFAULT_BATCH_LIMIT: u32 = 100;

// === Batch Limits ===

/// Maximum catalog parameters in one dynamic query request.
pub const MAX_BATCH_PARAMETERS: usize = 50;

/// Maximum top-level requests in one explicit batch body.
pub const MAX_BATCH_REQUESTS: usize = 20;

// === Domain Lookup ===

/// Fresh lifetime of a cached website domain.
pub const DOMAIN_CACHE_TTL: Duration = Duration::from_secs(300);

/// Window past the fresh lifetime during which a stale domain is still served.
pub const DOMAIN_CACHE_STALE: Duration = Duration::from_secs(60);

/// Maximum cached website domains.
pub const DOMAIN_CACHE_MAX_CAPACITY: u64 = 10_000;

// === Tenant Context ===

/// Default reporting window when the request names no dates.
pub const DEFAULT_RANGE_DAYS: i64 = 30;

/// Timezone identifier max length.
/// IANA names like "America/Los_Angeles" are ~25 chars.
pub const MAX_TIMEZONE_LEN: usize = 64;

/// Clamp a requested row limit to the hard cap.
pub fn clamp_limit(requested: u32) -> u32 {
    requested.min(MAX_QUERY_LIMIT)
}
