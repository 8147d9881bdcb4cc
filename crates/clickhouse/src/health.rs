//! ClickHouse health checks.

use crate::client::ClickHouseClient;
use std::time::Duration;
use telemetry::health;
use tracing::{debug, error};

/// Probe the connection with `SELECT 1` and record the outcome.
pub async fn check_connection(client: &ClickHouseClient) -> bool {
    match client.inner().query("SELECT 1").fetch_one::<u8>().await {
        Ok(_) => {
            debug!("ClickHouse connection healthy");
            health().clickhouse.set_healthy();
            true
        }
        Err(e) => {
            error!(error = %e, url = %client.config().url, "ClickHouse health check failed");
            health().clickhouse.set_unhealthy(e.to_string());
            false
        }
    }
}

/// Re-probe on a fixed interval so readiness recovers without query traffic.
pub fn start_health_monitor(client: ClickHouseClient, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately; startup already probed.
        interval.tick().await;
        loop {
            interval.tick().await;
            check_connection(&client).await;
        }
    })
}
