use crate::services::broadcast::BroadcastScope;
use anyhow::{ensure, Context};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a chatbot named EdinBot. You're very knowledgeable about Edinburgh and give short responses to user queries.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub host: String,
    pub port: u16,

    // Model configuration
    pub model_path: String,
    pub tokenizer_path: String,
    pub chat_template_path: Option<String>,
    pub device: DeviceConfig,
    pub end_marker: String,

    // Fan-out
    pub broadcast_scope: BroadcastScope,
    pub broadcast_capacity: usize,

    pub generation: GenerationSettings,
}

/// Per-session generation constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSettings {
    pub system_prompt: String,
    /// Tokens a session may commit before it finishes.
    pub max_new_tokens: usize,
    /// Candidates offered at a branch point (k).
    pub num_choices: usize,
    pub default_threshold: f32,
    pub threshold_increment: f32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_new_tokens: 150,
            num_choices: 5,
            default_threshold: 0.2,
            threshold_increment: 0.02,
        }
    }
}

impl GenerationSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.default_threshold > 0.0 && self.default_threshold < 1.0,
            "DEFAULT_THRESHOLD must be in (0, 1), got {}",
            self.default_threshold
        );
        ensure!(
            self.threshold_increment >= 0.0 && self.threshold_increment.is_finite(),
            "THRESHOLD_INCREMENT must be a non-negative number, got {}",
            self.threshold_increment
        );
        ensure!(self.num_choices >= 1, "NUM_CHOICES must be at least 1");
        ensure!(self.max_new_tokens >= 1, "MAX_NEW_TOKENS must be at least 1");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceConfig {
    Auto,
    Cpu,
    Cuda(usize),
    Metal,
}

impl FromStr for DeviceConfig {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "metal" | "mps" => Ok(Self::Metal),
            "cuda" => Ok(Self::Cuda(0)),
            other => match other.strip_prefix("cuda:") {
                Some(idx) => Ok(Self::Cuda(
                    idx.parse().with_context(|| format!("invalid CUDA ordinal in DEVICE={s}"))?,
                )),
                None => anyhow::bail!("unknown DEVICE '{s}', expected auto, cpu, cuda[:N] or metal"),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = GenerationSettings::default();
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let generation = GenerationSettings {
            system_prompt: lookup("SYSTEM_PROMPT").unwrap_or(defaults.system_prompt),
            max_new_tokens: parse_var(&lookup, "MAX_NEW_TOKENS", defaults.max_new_tokens)?,
            num_choices: parse_var(&lookup, "NUM_CHOICES", defaults.num_choices)?,
            default_threshold: parse_var(&lookup, "DEFAULT_THRESHOLD", defaults.default_threshold)?,
            threshold_increment: parse_var(
                &lookup,
                "THRESHOLD_INCREMENT",
                defaults.threshold_increment,
            )?,
        };
        generation.validate()?;

        let config = Config {
            host: var("HOST", "127.0.0.1"),
            port: parse_var(&lookup, "PORT", 5000)?,

            model_path: var("MODEL_PATH", "models/Meta-Llama-3.1-8B-Instruct-Q4_K_M.gguf"),
            tokenizer_path: var("TOKENIZER_PATH", "models/tokenizer.json"),
            chat_template_path: lookup("CHAT_TEMPLATE_PATH"),
            device: parse_var(&lookup, "DEVICE", DeviceConfig::Auto)?,
            end_marker: var("END_MARKER", "<|eot_id|>"),

            broadcast_scope: parse_var(&lookup, "BROADCAST_SCOPE", BroadcastScope::All)?,
            broadcast_capacity: parse_var(&lookup, "BROADCAST_CAPACITY", 256)?,

            generation,
        };
        ensure!(config.broadcast_capacity > 0, "BROADCAST_CAPACITY must be positive");
        ensure!(!config.end_marker.is_empty(), "END_MARKER must not be empty");

        Ok(config)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid value for {key} ('{raw}'): {e}")),
        None => Ok(default),
    }
}
