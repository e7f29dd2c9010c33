use crate::config::{Config, GenerationSettings};
use crate::inference::Backend;
use crate::services::ListenerHub;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub settings: Arc<GenerationSettings>,
    pub backend: Backend,
    pub hub: ListenerHub,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        tracing::info!("[STATE] Initializing AppState...");
        tracing::info!("[STATE]   Model path: {}", config.model_path);
        tracing::info!("[STATE]   Tokenizer path: {}", config.tokenizer_path);
        tracing::info!("[STATE]   Device: {:?}", config.device);

        // A missing or broken model is not fatal; the stub backend takes over.
        let backend = Backend::load(&config);
        Self::with_backend(config, backend)
    }

    pub fn with_backend(config: Config, backend: Backend) -> Self {
        tracing::info!(
            "[STATE] Backend: {}, k={}, threshold {} (+{}), budget {}, broadcast scope {:?}",
            backend.kind.as_str(),
            config.generation.num_choices,
            config.generation.default_threshold,
            config.generation.threshold_increment,
            config.generation.max_new_tokens,
            config.broadcast_scope
        );

        let hub = ListenerHub::new(config.broadcast_capacity, config.broadcast_scope);
        Self {
            settings: Arc::new(config.generation.clone()),
            config: Arc::new(config),
            backend,
            hub,
        }
    }
}
