//! Model-facing capabilities consumed by the generation core.
//!
//! The session only needs two things from a language model: a next-token
//! probability distribution for a token sequence ([`TokenOracle`]) and a way
//! to render prompts and decode ids ([`ChatCodec`]). Loading, quantization and
//! device placement stay behind these traits.

pub mod candle_oracle;
pub mod codec;
pub mod device;
pub mod stub;

use crate::config::Config;
use std::sync::Arc;

pub use candle_oracle::CandleOracle;
pub use codec::HfChatCodec;
pub use stub::{StubCodec, StubOracle};

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("model error: {0}")]
    Model(#[from] candle_core::Error),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("chat template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("oracle returned an empty distribution")]
    EmptyDistribution,

    #[error("inference worker failed: {0}")]
    Worker(String),
}

/// Next-token probability oracle.
///
/// Implementations must be deterministic for identical input and must not
/// observe or mutate session state.
pub trait TokenOracle: Send + Sync {
    /// Probability of every vocabulary entry following `tokens`.
    fn next_token_distribution(&self, tokens: &[u32]) -> Result<Vec<f32>, InferenceError>;
}

impl<F> TokenOracle for F
where
    F: Fn(&[u32]) -> Result<Vec<f32>, InferenceError> + Send + Sync,
{
    fn next_token_distribution(&self, tokens: &[u32]) -> Result<Vec<f32>, InferenceError> {
        self(tokens)
    }
}

/// Prompt rendering, decoding and end-of-turn detection.
pub trait ChatCodec: Send + Sync {
    /// Render the system instructions and user text into prompt token ids.
    fn encode_chat(&self, system_prompt: &str, user_text: &str) -> Result<Vec<u32>, InferenceError>;

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String, InferenceError>;

    fn decode_token(&self, id: u32, skip_special_tokens: bool) -> Result<String, InferenceError> {
        self.decode(&[id], skip_special_tokens)
    }

    fn detect_end_marker(&self, text: &str) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Candle,
    Stub,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Candle => "candle",
            Self::Stub => "stub",
        }
    }
}

/// The oracle/codec pair every session of the process shares.
#[derive(Clone)]
pub struct Backend {
    pub oracle: Arc<dyn TokenOracle>,
    pub codec: Arc<dyn ChatCodec>,
    pub kind: BackendKind,
}

impl Backend {
    pub fn new(oracle: Arc<dyn TokenOracle>, codec: Arc<dyn ChatCodec>, kind: BackendKind) -> Self {
        Self { oracle, codec, kind }
    }

    /// Load the quantized model and tokenizer, or fall back to the stub
    /// backend so the server can still start.
    pub fn load(config: &Config) -> Self {
        match Self::load_candle(config) {
            Ok(backend) => {
                tracing::info!("[BACKEND] ✅ Model loaded successfully");
                backend
            }
            Err(e) => {
                tracing::error!("[BACKEND] ⚠️ Model loading failed: {:#}", e);
                tracing::info!("[BACKEND] 🌐 Falling back to the stub backend");
                Self::stub(config)
            }
        }
    }

    pub fn load_candle(config: &Config) -> anyhow::Result<Self> {
        let device = device::resolve(config.device);
        tracing::info!("[BACKEND] Using device: {}", device::describe(&device));

        let codec = HfChatCodec::from_files(
            &config.tokenizer_path,
            config.chat_template_path.as_deref(),
            &config.end_marker,
        )?;
        let oracle = CandleOracle::from_gguf(&config.model_path, &device)?;

        Ok(Self::new(Arc::new(oracle), Arc::new(codec), BackendKind::Candle))
    }

    pub fn stub(config: &Config) -> Self {
        let codec = StubCodec::new(&config.end_marker);
        let oracle = StubOracle::new(codec.vocab_size(), codec.end_token_id());
        Self::new(Arc::new(oracle), Arc::new(codec), BackendKind::Stub)
    }
}
