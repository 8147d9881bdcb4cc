//! Analytics Query Engine
//!
//! Declarative analytics queries compiled to parameterized ClickHouse SQL:
//! - Schema registry and validator guarding every table and column
//! - Named query catalog executed as concurrent batches
//! - Free-form custom queries and compile-only previews

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};

use api::middleware::RateLimitConfig;
use api::{router, website_directory, AppState};
use clickhouse_client::{ClickHouseClient, ClickHouseConfig};
use telemetry::init_tracing_from_env;

/// Application configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct Config {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,

    /// Website service URL for domain lookups; "mock" uses an in-process directory
    #[serde(default = "default_website_service_url")]
    website_service_url: String,

    #[serde(default)]
    clickhouse: ClickHouseConfig,

    #[serde(default)]
    rate_limit: RateLimitConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_website_service_url() -> String {
    "mock".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            website_service_url: default_website_service_url(),
            clickhouse: ClickHouseConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing_from_env();

    info!("Starting Analytics Query Engine v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;

    info!(
        clickhouse_url = %config.clickhouse.url,
        database = %config.clickhouse.database,
        website_service = %config.website_service_url,
        "Loaded configuration"
    );

    let clickhouse = Arc::new(
        ClickHouseClient::new(config.clickhouse.clone())
            .context("Failed to create ClickHouse client")?,
    );

    if clickhouse_client::health::check_connection(&clickhouse).await {
        info!("ClickHouse connection: healthy");
    } else {
        // Keep serving; readiness recovers once a probe or query reaches ClickHouse
        error!("ClickHouse connection: unhealthy");
    }

    let _clickhouse_monitor = clickhouse_client::health::start_health_monitor(
        clickhouse.as_ref().clone(),
        Duration::from_secs(30),
    );
    info!("Started ClickHouse health monitor (every 30 seconds)");

    let directory = website_directory(&config.website_service_url)
        .context("Failed to create website directory")?;
    if config.website_service_url == "mock" {
        telemetry::health().website_directory.set_healthy();
    } else {
        warn!("Website directory health is unknown until the first lookup");
    }

    let state = AppState::with_rate_limit(clickhouse, directory, config.rate_limit.clone());

    let _rate_limiter_cleanup = state.start_rate_limiter_cleanup();
    info!("Started rate limiter cleanup task (every 5 minutes)");

    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid server address")?;

    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}

/// Load configuration from files and environment.
fn load_config() -> Result<Config> {
    let config = config::Config::builder()
        // Start with defaults
        .add_source(config::Config::try_from(&Config::default())?)
        // Load from config file if exists
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        // Override with environment variables
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix("QUERY_ENGINE")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    let mut config: Config = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    // The config crate's nested parsing doesn't work reliably with underscored field names
    if let Ok(url) = std::env::var("QUERY_ENGINE_CLICKHOUSE_URL") {
        config.clickhouse.url = url;
    }
    if let Ok(database) = std::env::var("QUERY_ENGINE_CLICKHOUSE_DATABASE") {
        config.clickhouse.database = database;
    }
    if let Ok(username) = std::env::var("QUERY_ENGINE_CLICKHOUSE_USERNAME") {
        config.clickhouse.username = Some(username);
    }
    if let Ok(password) = std::env::var("QUERY_ENGINE_CLICKHOUSE_PASSWORD") {
        config.clickhouse.password = Some(password);
    }

    if let Ok(url) = std::env::var("QUERY_ENGINE_WEBSITE_SERVICE_URL") {
        config.website_service_url = url;
    }

    Ok(config)
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }
}
