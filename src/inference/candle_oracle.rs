//! Quantized llama oracle on top of `candle_transformers::models::quantized_llama`

use super::{InferenceError, TokenOracle};
use candle_core::quantized::{gguf_file, GgmlDType};
use candle_core::{DType, Device, Tensor};
use candle_transformers::models::quantized_llama::ModelWeights;
use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

/// GGUF model weights plus the sequence the model's KV cache currently holds.
struct ModelState {
    weights: ModelWeights,
    evaluated: Vec<u32>,
}

/// Greedy next-token oracle backed by a quantized llama model.
///
/// One forward pass runs at a time. When a query extends the previously
/// evaluated sequence by exactly one token, only that token is fed at the
/// cached position; any other query re-runs the full prefill at position 0,
/// which resets the model's internal cache.
pub struct CandleOracle {
    state: Mutex<ModelState>,
    device: Device,
}

impl CandleOracle {
    pub fn from_gguf<P: AsRef<Path>>(path: P, device: &Device) -> anyhow::Result<Self> {
        let path = path.as_ref();
        tracing::info!("[ORACLE] 📦 Loading GGUF model from {}", path.display());

        let mut file = File::open(path)
            .map_err(|e| anyhow::anyhow!("Failed to open model {:?}: {}", path, e))?;
        let content = gguf_file::Content::read(&mut file).map_err(|e| e.with_path(path))?;

        let quantized = content
            .tensor_infos
            .values()
            .filter(|info| !matches!(info.ggml_dtype, GgmlDType::F32 | GgmlDType::F16))
            .count();
        tracing::info!(
            "[ORACLE] 📊 GGUF: {} tensors ({} quantized), {} metadata entries",
            content.tensor_infos.len(),
            quantized,
            content.metadata.len()
        );

        let weights = ModelWeights::from_gguf(content, &mut file, device)?;
        tracing::info!("[ORACLE] ✅ Model weights loaded");

        Ok(Self {
            state: Mutex::new(ModelState { weights, evaluated: Vec::new() }),
            device: device.clone(),
        })
    }

    fn forward(&self, state: &mut ModelState, tokens: &[u32]) -> candle_core::Result<Tensor> {
        let cached = state.evaluated.len();
        let incremental = cached > 0 && tokens.len() == cached + 1 && tokens.starts_with(&state.evaluated);

        let (input, position) = if incremental {
            (&tokens[cached..], cached)
        } else {
            (tokens, 0)
        };
        tracing::trace!(
            "[ORACLE] forward {} token(s) at position {} (incremental: {})",
            input.len(),
            position,
            incremental
        );

        let input = Tensor::new(input, &self.device)?.unsqueeze(0)?;
        let logits = state.weights.forward(&input, position)?;
        state.evaluated = tokens.to_vec();

        logits.squeeze(0)?.to_dtype(DType::F32)
    }
}

impl TokenOracle for CandleOracle {
    fn next_token_distribution(&self, tokens: &[u32]) -> Result<Vec<f32>, InferenceError> {
        if tokens.is_empty() {
            return Err(InferenceError::EmptyDistribution);
        }

        let mut state = self
            .state
            .lock()
            .map_err(|_| InferenceError::Worker("model lock poisoned".to_string()))?;

        let logits = match self.forward(&mut state, tokens) {
            Ok(logits) => logits,
            Err(e) => {
                // The KV cache may hold a partial update now.
                state.evaluated.clear();
                return Err(e.into());
            }
        };
        drop(state);

        let probs = candle_nn::ops::softmax_last_dim(&logits)?;
        Ok(probs.to_vec1::<f32>()?)
    }
}
