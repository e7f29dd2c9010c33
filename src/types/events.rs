use super::generation::Candidate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events pushed to connected clients, encoded as `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Prompt(String),
    InsideChoice(Vec<Candidate>),
    NextToken(String),
    Finish,
    Reset,
    Error(String),
}

impl ServerEvent {
    pub fn prompt(text: impl Into<String>) -> Self {
        Self::Prompt(text.into())
    }

    pub fn next_token(text: impl Into<String>) -> Self {
        Self::NextToken(text.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Prompt(_) => "prompt",
            Self::InsideChoice(_) => "inside_choice",
            Self::NextToken(_) => "next_token",
            Self::Finish => "finish",
            Self::Reset => "reset",
            Self::Error(_) => "error",
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Messages a client sends over the duplex channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    StartGame { prompt: String },
    ResetGame,
    /// Any other message type is a choice; `data` holds the 1-based number.
    Choice { data: Value },
}

#[derive(Debug, Deserialize)]
struct RawClientMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawClientMessage = serde_json::from_str(text)?;
        Ok(match raw.kind.as_str() {
            "start_game" => Self::StartGame {
                prompt: match raw.data {
                    Value::String(prompt) => prompt,
                    Value::Null => String::new(),
                    other => other.to_string(),
                },
            },
            "reset_game" => Self::ResetGame,
            _ => Self::Choice { data: raw.data },
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::StartGame { .. } => "start_game",
            Self::ResetGame => "reset_game",
            Self::Choice { .. } => "choice",
        }
    }

    /// Zero-based candidate index from a 1-based choice number.
    ///
    /// Accepts integers, integral floats and numeric strings.
    pub fn choice_index(data: &Value) -> Option<usize> {
        let number = match data {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))?,
            Value::String(s) => s.trim().parse::<u64>().ok()?,
            _ => return None,
        };
        usize::try_from(number).ok()?.checked_sub(1)
    }
}
