pub mod cluster;
pub mod completions;
pub mod error;
pub mod types;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check endpoint
        .route("/health", get(cluster::health_check))
        // OpenAI-compatible inference endpoint
        .route("/v1/chat/completions", post(completions::chat_completions))
        // Cluster inspection endpoints
        .route("/api/cluster/status", get(cluster::cluster_status))
        .route("/api/cluster/nodes", get(cluster::list_nodes))
        .route("/api/cluster/nodes/:id", get(cluster::get_node))
        .route("/api/cluster/nodes/:id", delete(cluster::delete_node))
        // Attach application state
        .with_state(state)
        // Middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
