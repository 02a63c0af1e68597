use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use super::ws::ws_handler;
use crate::state::AppState;

/// Largest payload body accepted for staging
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let payload_routes = Router::new()
        .route(
            "/payload",
            post(handlers::stage_payload)
                .get(handlers::get_payload)
                .delete(handlers::clear_payload),
        )
        .layer(DefaultBodyLimit::max(MAX_PAYLOAD_BYTES));

    let api_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/status", get(handlers::status))
        .route("/trigger", post(handlers::fire_trigger))
        .route("/config", get(handlers::config::get_all_config))
        .route(
            "/config/inject",
            get(handlers::config::get_inject_config).patch(handlers::config::update_inject_config),
        )
        .route("/ws", get(ws_handler))
        .merge(payload_routes);

    // Staging at the root, as `curl --data-binary @payload.txt http://host/`
    let root_routes = Router::new()
        .route("/", post(handlers::stage_payload))
        .layer(DefaultBodyLimit::max(MAX_PAYLOAD_BYTES));

    Router::new()
        .nest("/api", api_routes)
        .merge(root_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
