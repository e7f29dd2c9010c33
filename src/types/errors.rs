use super::generation::Phase;
use crate::inference::InferenceError;

/// Failures of a generation session operation.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("prompt must not be empty")]
    InvalidPrompt,

    #[error("invalid choice {choice}: expected a number between 1 and {available}")]
    InvalidChoice { choice: String, available: usize },

    #[error("cannot {operation} while the session is {phase}")]
    InvalidState { operation: &'static str, phase: Phase },

    #[error("token oracle failed: {0}")]
    OracleFailure(#[from] InferenceError),
}

impl GenerationError {
    /// Whether the session must be torn down after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidState { .. } | Self::OracleFailure(_))
    }
}

/// Failures while handling one inbound client message.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("{message} is not accepted while {state}")]
    Rejected { message: &'static str, state: &'static str },

    #[error(transparent)]
    Generation(#[from] GenerationError),
}

impl ProtocolError {
    /// Whether the client should also receive a `finish` event.
    pub fn terminates_session(&self) -> bool {
        matches!(self, Self::Generation(GenerationError::OracleFailure(_)))
    }
}
