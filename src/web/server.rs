use crate::state::AppState;
use axum::Router;
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;

pub async fn start_server(state: AppState) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", state.config.host, state.config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen address {}:{}: {}", state.config.host, state.config.port, e))?;

    let app = create_app(state);

    tracing::info!("🌐 Web server listening on http://{}", addr);
    tracing::info!("🔌 WebSocket endpoint: ws://{}/ws/{{client_id}}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(crate::web::routes::create_routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(crate::web::middleware::cors_layer())
}
