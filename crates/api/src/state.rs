//! Application state shared across handlers.

use crate::middleware::rate_limit::{RateLimitConfig, RateLimiter, SharedRateLimiter};
use async_trait::async_trait;
use engine_core::limits::{DOMAIN_CACHE_MAX_CAPACITY, DOMAIN_CACHE_STALE, DOMAIN_CACHE_TTL};
use engine_core::{BatchOrchestrator, DomainResolver, Error, QueryCatalog, QueryExecutor, SchemaRegistry};
use moka::future::Cache;
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry::health;
use tracing::{debug, warn};

/// Source of website domains, keyed by website id.
#[async_trait]
pub trait WebsiteDirectory: Send + Sync {
    /// `Ok(None)` when the website exists without a domain or is unknown.
    async fn website_domain(&self, website_id: &str) -> Result<Option<String>, Error>;
}

#[derive(Debug, Deserialize)]
struct WebsiteResponse {
    #[serde(default)]
    domain: Option<String>,
}

/// Website service client.
///
/// Calls `GET {base_url}/internal/websites/{id}`.
#[derive(Clone)]
pub struct RemoteWebsiteDirectory {
    /// Website service URL (e.g., "http://website-service:8080")
    base_url: reqwest::Url,
    http_client: reqwest::Client,
}

impl RemoteWebsiteDirectory {
    pub fn new(base_url: &str) -> Result<Self, Error> {
        let base_url = reqwest::Url::parse(base_url)
            .map_err(|e| Error::internal(format!("Invalid website service URL: {}", e)))?;
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            http_client,
        })
    }

    fn website_url(&self, website_id: &str) -> Result<reqwest::Url, Error> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::internal("Website service URL cannot be a base"))?
            .pop_if_empty()
            .extend(["internal", "websites", website_id]);
        Ok(url)
    }
}

#[async_trait]
impl WebsiteDirectory for RemoteWebsiteDirectory {
    async fn website_domain(&self, website_id: &str) -> Result<Option<String>, Error> {
        let url = self.website_url(website_id)?;

        debug!(url = %url, "Calling website service");

        let response = self.http_client.get(url).send().await.map_err(|e| {
            warn!(error = %e, "Website service request failed");
            Error::internal(format!("Website service unavailable: {}", e))
        })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Website service returned error");
            return Err(Error::internal(format!(
                "Website service returned {}",
                status
            )));
        }

        let website: WebsiteResponse = response.json().await.map_err(|e| {
            warn!(error = %e, "Failed to parse website response");
            Error::internal(format!("Invalid website response: {}", e))
        })?;

        Ok(website.domain.filter(|d| !d.trim().is_empty()))
    }
}

/// In-process directory for development and tests.
#[derive(Default)]
pub struct InMemoryWebsiteDirectory {
    domains: RwLock<HashMap<String, String>>,
}

impl InMemoryWebsiteDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, website_id: impl Into<String>, domain: impl Into<String>) {
        self.domains.write().insert(website_id.into(), domain.into());
    }
}

#[async_trait]
impl WebsiteDirectory for InMemoryWebsiteDirectory {
    async fn website_domain(&self, website_id: &str) -> Result<Option<String>, Error> {
        Ok(self.domains.read().get(website_id).cloned())
    }
}

/// Pick the directory for a configured URL; empty or `"mock"` is in-process.
pub fn website_directory(url: &str) -> Result<Arc<dyn WebsiteDirectory>, Error> {
    if url.is_empty() || url == "mock" {
        debug!("Using in-process website directory");
        Ok(Arc::new(InMemoryWebsiteDirectory::new()))
    } else {
        Ok(Arc::new(RemoteWebsiteDirectory::new(url)?))
    }
}

#[derive(Debug, Clone)]
struct CachedDomain {
    domain: Option<String>,
    fetched_at: Instant,
}

/// Stale-while-revalidate cache in front of a [`WebsiteDirectory`].
///
/// Entries are fresh for `fresh_for`; after that they are still served for
/// `stale_for` while one background refresh per key runs. Concurrent misses
/// share a single directory call. Failed lookups are not cached.
#[derive(Clone)]
pub struct DomainCache {
    cache: Cache<String, CachedDomain>,
    directory: Arc<dyn WebsiteDirectory>,
    refreshing: Arc<Mutex<HashSet<String>>>,
    fresh_for: Duration,
}

impl DomainCache {
    pub fn new(directory: Arc<dyn WebsiteDirectory>) -> Self {
        Self::with_ttl(directory, DOMAIN_CACHE_TTL, DOMAIN_CACHE_STALE)
    }

    pub fn with_ttl(
        directory: Arc<dyn WebsiteDirectory>,
        fresh_for: Duration,
        stale_for: Duration,
    ) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(DOMAIN_CACHE_MAX_CAPACITY)
                .time_to_live(fresh_for + stale_for)
                .build(),
            directory,
            refreshing: Arc::new(Mutex::new(HashSet::new())),
            fresh_for,
        }
    }

    /// Domain for `website_id`; `None` when unknown or the lookup failed.
    pub async fn lookup(&self, website_id: &str) -> Option<String> {
        if let Some(entry) = self.cache.get(website_id).await {
            if entry.fetched_at.elapsed() >= self.fresh_for {
                self.spawn_refresh(website_id);
            }
            return entry.domain;
        }

        let directory = self.directory.clone();
        let key = website_id.to_string();
        let entry = self
            .cache
            .try_get_with(key.clone(), async move { fetch(directory.as_ref(), &key).await })
            .await;

        match entry {
            Ok(entry) => entry.domain,
            Err(e) => {
                warn!(website_id, error = %e, "Website domain lookup failed");
                None
            }
        }
    }

    fn spawn_refresh(&self, website_id: &str) {
        if !self.refreshing.lock().insert(website_id.to_string()) {
            return;
        }

        let this = self.clone();
        let website_id = website_id.to_string();
        tokio::spawn(async move {
            match fetch(this.directory.as_ref(), &website_id).await {
                Ok(entry) => this.cache.insert(website_id.clone(), entry).await,
                Err(e) => {
                    warn!(website_id = %website_id, error = %e, "Domain refresh failed, serving stale entry")
                }
            }
            this.refreshing.lock().remove(&website_id);
        });
    }
}

async fn fetch(directory: &dyn WebsiteDirectory, website_id: &str) -> Result<CachedDomain, Error> {
    match directory.website_domain(website_id).await {
        Ok(domain) => {
            health().website_directory.set_healthy();
            Ok(CachedDomain {
                domain,
                fetched_at: Instant::now(),
            })
        }
        Err(e) => {
            health().website_directory.set_unhealthy(e.to_string());
            Err(e)
        }
    }
}

#[async_trait]
impl DomainResolver for DomainCache {
    async fn website_domain(&self, website_id: &str) -> Option<String> {
        self.lookup(website_id).await
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Catalog resolution, compilation and execution
    pub orchestrator: BatchOrchestrator,
    /// Website domain cache (same-domain referrer exclusion)
    pub domains: DomainCache,
    /// Rate limiter
    pub rate_limiter: SharedRateLimiter,
}

impl AppState {
    pub fn new(executor: Arc<dyn QueryExecutor>, directory: Arc<dyn WebsiteDirectory>) -> Self {
        Self::with_rate_limit(executor, directory, RateLimitConfig::default())
    }

    /// Create with custom rate limit config.
    pub fn with_rate_limit(
        executor: Arc<dyn QueryExecutor>,
        directory: Arc<dyn WebsiteDirectory>,
        rate_config: RateLimitConfig,
    ) -> Self {
        let domains = DomainCache::new(directory);
        let orchestrator = BatchOrchestrator::new(
            Arc::new(SchemaRegistry::analytics()),
            Arc::new(QueryCatalog::analytics()),
            executor,
            Arc::new(domains.clone()),
        );

        Self {
            orchestrator,
            domains,
            rate_limiter: Arc::new(RateLimiter::new(rate_config)),
        }
    }

    /// Start the rate limiter cleanup background task.
    /// Returns a handle that can be used to cancel the task.
    pub fn start_rate_limiter_cleanup(&self) -> tokio::task::JoinHandle<()> {
        let rate_limiter = self.rate_limiter.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300)); // 5 minutes
            loop {
                interval.tick().await;
                rate_limiter.cleanup(Duration::from_secs(600));
            }
        })
    }
}
