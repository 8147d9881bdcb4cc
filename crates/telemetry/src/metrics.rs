//! In-process query metrics.
//!
//! Lock-free counters and a fixed-bucket latency histogram, exposed through a
//! global registry and readable as a point-in-time snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Upper bounds of the latency buckets, in milliseconds.
const BUCKET_BOUNDS: [u64; 10] = [5, 10, 25, 50, 100, 250, 500, 1000, 5000, 30000];

/// Latency histogram in milliseconds.
#[derive(Debug)]
pub struct Histogram {
    /// One slot per bound, plus overflow.
    buckets: [AtomicU64; BUCKET_BOUNDS.len() + 1],
    sum: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            buckets: Default::default(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, ms: u64) {
        self.sum.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        let slot = BUCKET_BOUNDS
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(BUCKET_BOUNDS.len());
        self.buckets[slot].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> f64 {
        match self.count() {
            0 => 0.0,
            count => self.sum() as f64 / count as f64,
        }
    }

    /// `(upper bound, count)` pairs; the overflow slot reports `u64::MAX`.
    pub fn buckets(&self) -> Vec<(u64, u64)> {
        BUCKET_BOUNDS
            .iter()
            .copied()
            .chain(std::iter::once(u64::MAX))
            .zip(self.buckets.iter())
            .map(|(bound, count)| (bound, count.load(Ordering::Relaxed)))
            .collect()
    }
}

/// Query engine metrics.
#[derive(Debug, Default)]
pub struct Metrics {
    // Requests
    pub batch_requests: Counter,
    pub custom_queries: Counter,
    pub compile_requests: Counter,
    pub rate_limited_requests: Counter,

    // Per-parameter outcomes
    pub parameters_executed: Counter,
    pub parameter_failures: Counter,

    // Compilation
    pub queries_compiled: Counter,
    pub validation_failures: Counter,

    // Store
    pub execution_errors: Counter,
    pub execution_latency_ms: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            batch_requests: self.batch_requests.get(),
            custom_queries: self.custom_queries.get(),
            compile_requests: self.compile_requests.get(),
            rate_limited_requests: self.rate_limited_requests.get(),
            parameters_executed: self.parameters_executed.get(),
            parameter_failures: self.parameter_failures.get(),
            queries_compiled: self.queries_compiled.get(),
            validation_failures: self.validation_failures.get(),
            execution_errors: self.execution_errors.get(),
            executions: self.execution_latency_ms.count(),
            execution_latency_mean_ms: self.execution_latency_ms.mean(),
        }
    }
}

/// Metrics at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub batch_requests: u64,
    pub custom_queries: u64,
    pub compile_requests: u64,
    pub rate_limited_requests: u64,
    pub parameters_executed: u64,
    pub parameter_failures: u64,
    pub queries_compiled: u64,
    pub validation_failures: u64,
    pub execution_errors: u64,
    pub executions: u64,
    pub execution_latency_mean_ms: f64,
}

/// Global metrics registry.
pub static METRICS: std::sync::LazyLock<Metrics> = std::sync::LazyLock::new(Metrics::new);

pub fn metrics() -> &'static Metrics {
    &METRICS
}
