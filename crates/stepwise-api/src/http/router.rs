//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`.
//! Middleware: CORS, tracing.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(health_check))
        // Definitions
        .route("/definitions", get(handlers::definition::list_definitions))
        .route("/definitions/{name}", get(handlers::definition::get_definition))
        // Executions
        .route(
            "/executions",
            post(handlers::execution::start_execution).get(handlers::execution::list_executions),
        )
        .route("/executions/{id}", get(handlers::execution::get_execution))
        .route(
            "/executions/{id}/history",
            get(handlers::execution::get_history),
        )
        .route(
            "/executions/{id}/abort",
            post(handlers::execution::abort_execution),
        );

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /api/v1/health
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
