//! API routes.

pub mod health;
pub mod query;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::middleware::rate_limit;
use crate::state::AppState;

/// Creates the API router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let query_routes = Router::new()
        .route("/query", post(query::query_handler))
        .route("/query/compile", post(query::compile_handler))
        .route("/query/custom", post(query::custom_handler))
        .route("/query/types", get(query::types_handler))
        .route_layer(from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .merge(query_routes)
        .route("/health", get(health::health_handler))
        .route("/health/ready", get(health::ready_handler))
        .route("/health/live", get(health::live_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(cors),
        )
        .with_state(state)
}
