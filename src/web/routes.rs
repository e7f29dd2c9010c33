use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // Duplex game channel
        .route("/ws/{client_id}", get(super::handlers::ws::websocket))

        // Single-shot streaming
        .route("/api/ask", post(super::handlers::ask::ask))

        // Health check
        .route("/health", get(super::handlers::health::health_check))

        .with_state(state)
}
