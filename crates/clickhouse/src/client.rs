//! ClickHouse client wrapper.

use crate::config::ClickHouseConfig;
use clickhouse::Client;
use engine_core::{Error, Result};
use std::time::Duration;
use tracing::info;

/// Native client for health probes plus an HTTP client for parameterised
/// JSON queries.
#[derive(Clone)]
pub struct ClickHouseClient {
    inner: Client,
    http: reqwest::Client,
    config: ClickHouseConfig,
}

impl ClickHouseClient {
    pub fn new(config: ClickHouseConfig) -> Result<Self> {
        let mut client = Client::default()
            .with_url(&config.url)
            .with_database(&config.database);

        if let Some(ref user) = config.username {
            client = client.with_user(user);
        }

        if let Some(ref pass) = config.password {
            client = client.with_password(pass);
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::internal(format!("Failed to build HTTP client: {}", e)))?;

        info!(
            url = %config.url,
            database = %config.database,
            timeout_secs = config.timeout_secs,
            "Created ClickHouse client"
        );

        Ok(Self {
            inner: client,
            http,
            config,
        })
    }

    pub fn inner(&self) -> &Client {
        &self.inner
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn config(&self) -> &ClickHouseConfig {
        &self.config
    }
}
