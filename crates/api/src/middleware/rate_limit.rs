//! Rate limiting middleware.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry::metrics;
use tracing::warn;

use crate::extractors::client_ip;
use crate::response::ApiError;
use crate::state::AppState;

/// Token bucket rate limiter.
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, TokenBucket>>,
    config: RateLimitConfig,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RateLimitConfig {
    /// Requests per second
    pub rate: u32,
    /// Burst size
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rate: 50,
            burst: 200,
        }
    }
}

struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(burst: u32) -> Self {
        Self {
            tokens: burst as f64,
            last_update: Instant::now(),
        }
    }

    /// Take a token, or return how long until one is available.
    fn try_acquire(&mut self, rate: u32, burst: u32) -> Result<(), Duration> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.last_update = now;

        // Replenish tokens
        self.tokens = (self.tokens + elapsed * rate as f64).min(burst as f64);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else if rate == 0 {
            Err(Duration::from_secs(1))
        } else {
            Err(Duration::from_secs_f64((1.0 - self.tokens) / rate as f64))
        }
    }
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Check if a request is allowed for the given key.
    ///
    /// On rejection returns the wait in whole seconds, at least 1.
    pub fn check(&self, key: &str) -> Result<(), u64> {
        let mut buckets = self.buckets.lock();

        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.config.burst));

        bucket
            .try_acquire(self.config.rate, self.config.burst)
            .map_err(|wait| wait.as_secs_f64().ceil().max(1.0) as u64)
    }

    /// Drop buckets idle for longer than `max_age`.
    pub fn cleanup(&self, max_age: Duration) {
        let mut buckets = self.buckets.lock();
        let now = Instant::now();

        buckets.retain(|_, bucket| now.duration_since(bucket.last_update) < max_age);
    }

    pub fn tracked_keys(&self) -> usize {
        self.buckets.lock().len()
    }
}

/// Shared rate limiter state.
pub type SharedRateLimiter = Arc<RateLimiter>;

/// Bucket key: the tenant when the query string names one, else the caller IP.
fn rate_limit_key(request: &Request) -> String {
    let website_id = request.uri().query().and_then(|query| {
        query.split('&').find_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            matches!(name, "website_id" | "websiteId")
                .then(|| value.to_string())
                .filter(|v| !v.is_empty())
        })
    });

    match website_id {
        Some(id) => format!("website:{}", id),
        None => match client_ip(request.headers()) {
            Some(ip) => format!("ip:{}", ip),
            None => "anonymous".to_string(),
        },
    }
}

/// Reject with 429 and `Retry-After` once the caller's bucket is empty.
pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = rate_limit_key(&request);

    if let Err(retry_after) = state.rate_limiter.check(&key) {
        metrics().rate_limited_requests.inc();
        warn!(key = %key, retry_after, "Rate limit exceeded");
        return Err(ApiError::rate_limited(
            "Rate limit exceeded",
            Some(retry_after),
        ));
    }

    Ok(next.run(request).await)
}
