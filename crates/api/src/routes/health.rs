//! Health check endpoints.

use axum::{http::StatusCode, Json};
use telemetry::{health, metrics};

use crate::response::HealthResponse;

/// GET /health - Component health and counters.
pub async fn health_handler() -> (StatusCode, Json<HealthResponse>) {
    let report = health().report();
    let status = if report.status.is_serving() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            report,
            metrics: metrics().snapshot(),
        }),
    )
}

/// GET /health/ready - Readiness probe (can accept traffic).
pub async fn ready_handler() -> StatusCode {
    if health().is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /health/live - Liveness probe (service is running).
pub async fn live_handler() -> StatusCode {
    if health().is_alive() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
