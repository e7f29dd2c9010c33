use anyhow::Result;
use forkpath_bot::{config::Config, web, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "forkpath_bot=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("🚀 Starting Forkpath Bot");

    // Load configuration
    let config = Config::from_env()?;

    // Model loading blocks; a failed load falls back to the stub backend.
    let app_state = tokio::task::spawn_blocking(move || AppState::new(config)).await?;

    // Start web server
    web::start_server(app_state).await?;

    Ok(())
}
