//! HTTP handlers for the orchestration events API.

pub mod event_log;
pub mod executions;
pub mod health;

pub use health::{api_health, health_check};

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let health_routes = Router::new()
        .route("/health", get(health_check))
        .route("/api/health", get(api_health));

    let event_log_routes = Router::new().route(
        "/api/event-log/{owner_id}",
        get(event_log::list).delete(event_log::purge),
    );

    let execution_routes = Router::new()
        .route("/api/executions", post(executions::create))
        .route("/api/executions/responses", post(executions::apply_response))
        .route("/api/executions/{id}", get(executions::get))
        .route("/api/executions/{id}/records", get(executions::list_for_plan))
        .route("/api/executions/{id}/status", put(executions::update_status))
        .route("/api/executions/{id}/fields/{field}", put(executions::set_field));

    Router::new()
        .merge(health_routes)
        .merge(event_log_routes)
        .merge(execution_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
