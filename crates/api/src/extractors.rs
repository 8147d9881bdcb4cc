//! Request extractors.

use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::{request::Parts, HeaderMap},
};
use engine_core::{TenantContext, TenantParams};

use crate::response::ApiError;

/// Header carrying the caller's display timezone.
pub const TIMEZONE_HEADER: &str = "X-Timezone";

/// Tenant parameters from the query string plus the `X-Timezone` header.
///
/// Unresolved: the compile and custom routes accept a body-supplied website
/// id, so `website_id` is only required by [`TenantScope::resolve`].
#[derive(Debug, Clone, Default)]
pub struct TenantScope {
    pub params: TenantParams,
    pub header_timezone: Option<String>,
}

impl TenantScope {
    pub fn website_id(&self) -> Option<&str> {
        self.params
            .website_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
    }

    /// Header timezone first, then the query string.
    pub fn timezone(&self) -> Option<&str> {
        self.header_timezone
            .as_deref()
            .or(self.params.timezone.as_deref())
    }

    pub fn resolve(self) -> engine_core::Result<TenantContext> {
        TenantContext::resolve(self.params, self.header_timezone.as_deref())
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantScope
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(params) = Query::<TenantParams>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;

        let header_timezone = parts
            .headers
            .get(TIMEZONE_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);

        Ok(TenantScope {
            params,
            header_timezone,
        })
    }
}

/// First hop of `X-Forwarded-For`, else `X-Real-IP`.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    // Try X-Forwarded-For first (for proxied requests)
    if let Some(xff) = headers.get("X-Forwarded-For").and_then(|h| h.to_str().ok()) {
        if let Some(ip) = xff.split(',').next().map(str::trim).filter(|ip| !ip.is_empty()) {
            return Some(ip.to_string());
        }
    }

    headers
        .get("X-Real-IP")
        .and_then(|h| h.to_str().ok())
        .map(|ip| ip.trim().to_string())
}
