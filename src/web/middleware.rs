use axum::http::Method;
use tower_http::cors::{Any, CorsLayer};

/// The frontend is served from its own dev server, so API calls are cross-origin.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}
