//! Common test setup functions.

use api::middleware::RateLimitConfig;
use api::{router, AppState, WebsiteDirectory};
use axum::Router;
use axum_test::TestServer;
use std::sync::Arc;

use crate::mocks::{MockExecutor, MockWebsiteDirectory};

/// Test context with the real router wired to in-memory collaborators.
///
/// - Real Axum router with all middleware
/// - `MockExecutor` in place of ClickHouse, recording compiled SQL
/// - `MockWebsiteDirectory` in place of the website service
pub struct TestContext {
    pub executor: MockExecutor,
    pub directory: Arc<MockWebsiteDirectory>,
    pub router: Router,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_directory(MockWebsiteDirectory::new())
    }

    pub fn with_directory(directory: MockWebsiteDirectory) -> Self {
        Self::build(directory, RateLimitConfig::default())
    }

    pub fn with_rate_limit(rate_config: RateLimitConfig) -> Self {
        Self::build(MockWebsiteDirectory::new(), rate_config)
    }

    fn build(directory: MockWebsiteDirectory, rate_config: RateLimitConfig) -> Self {
        let executor = MockExecutor::new();
        let directory = Arc::new(directory);

        let state = AppState::with_rate_limit(
            Arc::new(executor.clone()),
            directory.clone() as Arc<dyn WebsiteDirectory>,
            rate_config,
        );

        Self {
            executor,
            directory,
            router: router(state),
        }
    }

    pub fn server(&self) -> TestServer {
        TestServer::new(self.router.clone()).expect("Failed to create test server")
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
