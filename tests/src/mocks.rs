//! Mock implementations for testing.

use api::WebsiteDirectory;
use async_trait::async_trait;
use engine_core::{Error, QueryExecutor, QueryParams, Result, Row};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Executor that records every `(sql, params)` pair and returns canned rows.
///
/// Implements the same `QueryExecutor` trait as the ClickHouse client, so
/// tests run every production code path except the network call.
#[derive(Clone, Default)]
pub struct MockExecutor {
    calls: Arc<Mutex<Vec<(String, QueryParams)>>>,
    rows: Arc<Mutex<Vec<Row>>>,
    /// Fail any query whose SQL contains one of these fragments.
    failing: Arc<Mutex<Vec<String>>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows returned by every successful execution.
    pub fn set_rows(&self, rows: Vec<serde_json::Value>) {
        *self.rows.lock() = rows
            .into_iter()
            .filter_map(|row| row.as_object().cloned())
            .collect();
    }

    /// Fail queries whose SQL contains `fragment`, e.g. a table name.
    pub fn fail_when(&self, fragment: impl Into<String>) {
        self.failing.lock().push(fragment.into());
    }

    pub fn calls(&self) -> Vec<(String, QueryParams)> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl QueryExecutor for MockExecutor {
    async fn execute(&self, sql: &str, params: &QueryParams) -> Result<Vec<Row>> {
        self.calls.lock().push((sql.to_string(), params.clone()));

        if self.failing.lock().iter().any(|f| sql.contains(f.as_str())) {
            return Err(Error::execution("Code: 210. Connection refused"));
        }

        Ok(self.rows.lock().clone())
    }
}

/// Website directory backed by a map, counting lookups.
#[derive(Default)]
pub struct MockWebsiteDirectory {
    domains: Mutex<HashMap<String, String>>,
    lookups: AtomicUsize,
    unavailable: Mutex<bool>,
}

impl MockWebsiteDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_domain(website_id: &str, domain: &str) -> Self {
        let directory = Self::default();
        directory
            .domains
            .lock()
            .insert(website_id.to_string(), domain.to_string());
        directory
    }

    /// Simulate the website service being down.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock() = unavailable;
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebsiteDirectory for MockWebsiteDirectory {
    async fn website_domain(&self, website_id: &str) -> Result<Option<String>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if *self.unavailable.lock() {
            return Err(Error::internal("Website service unavailable"));
        }
        Ok(self.domains.lock().get(website_id).cloned())
    }
}
