//! Hugging Face tokenizer with a MiniJinja chat template

use super::{ChatCodec, InferenceError};
use minijinja::{context, Environment};
use std::path::Path;
use tokenizers::Tokenizer;

/// Llama 3.1 instruct prompt format, including the knowledge-date header the
/// official template puts in the system turn. `date_string` overrides the
/// "Today Date" line.
pub const LLAMA31_CHAT_TEMPLATE: &str = "<|begin_of_text|>\
{%- for message in messages %}<|start_header_id|>{{ message.role }}<|end_header_id|>\n\n\
{% if message.role == \"system\" %}Cutting Knowledge Date: December 2023\nToday Date: {{ date_string | default(\"26 Jul 2024\") }}\n\n{% endif %}\
{{ message.content | trim }}<|eot_id|>{%- endfor %}\
{%- if add_generation_prompt %}<|start_header_id|>assistant<|end_header_id|>\n\n{% endif %}";

pub struct HfChatCodec {
    tokenizer: Tokenizer,
    templates: Environment<'static>,
    end_marker: String,
}

impl HfChatCodec {
    /// Load `tokenizer.json`, and optionally a chat template file overriding
    /// the built-in llama 3.1 format.
    pub fn from_files<P: AsRef<Path>>(
        tokenizer_path: P,
        template_path: Option<&str>,
        end_marker: &str,
    ) -> anyhow::Result<Self> {
        let tokenizer_path = tokenizer_path.as_ref();
        let tokenizer = Tokenizer::from_file(tokenizer_path).map_err(|e| {
            anyhow::anyhow!("Failed to load tokenizer from {:?}: {}", tokenizer_path, e)
        })?;

        let template = match template_path {
            Some(path) => {
                tracing::info!("[CODEC] Loading chat template from {}", path);
                std::fs::read_to_string(path)?
            }
            None => LLAMA31_CHAT_TEMPLATE.to_string(),
        };

        Self::new(tokenizer, template, end_marker)
    }

    pub fn new(tokenizer: Tokenizer, template: String, end_marker: &str) -> anyhow::Result<Self> {
        let mut templates = Environment::new();
        templates.add_template_owned("chat", template)?;

        tracing::info!(
            "[CODEC] Tokenizer ready: {} entries, end marker {:?}",
            tokenizer.get_vocab_size(true),
            end_marker
        );

        Ok(Self {
            tokenizer,
            templates,
            end_marker: end_marker.to_string(),
        })
    }

    pub fn render_prompt(&self, system_prompt: &str, user_text: &str) -> Result<String, InferenceError> {
        let template = self.templates.get_template("chat")?;
        let rendered = template.render(context! {
            messages => vec![
                context! { role => "system", content => system_prompt },
                context! { role => "user", content => user_text },
            ],
            add_generation_prompt => true,
        })?;
        Ok(rendered)
    }
}

impl ChatCodec for HfChatCodec {
    fn encode_chat(&self, system_prompt: &str, user_text: &str) -> Result<Vec<u32>, InferenceError> {
        let prompt = self.render_prompt(system_prompt, user_text)?;
        // The template already carries <|begin_of_text|>.
        let encoding = self
            .tokenizer
            .encode(prompt, false)
            .map_err(|e| InferenceError::Tokenizer(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String, InferenceError> {
        self.tokenizer
            .decode(ids, skip_special_tokens)
            .map_err(|e| InferenceError::Tokenizer(e.to_string()))
    }

    fn detect_end_marker(&self, text: &str) -> bool {
        text.contains(&self.end_marker)
    }
}
