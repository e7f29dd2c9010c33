//! Data types shared by the generation session and the protocol layer

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the top-k continuations offered at a branch point.
///
/// Serialized with the field names the frontend expects:
/// `{ "i": rank, "index": token id, "prob": probability, "token": text }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "i")]
    pub rank: usize,
    #[serde(rename = "index")]
    pub token_id: u32,
    #[serde(rename = "prob")]
    pub probability: f32,
    #[serde(rename = "token")]
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Generating,
    AwaitingChoice,
    Finished,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Generating => "generating",
            Self::AwaitingChoice => "awaiting a choice",
            Self::Finished => "finished",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishReason {
    /// The decoded output contains the end-of-turn marker.
    EndOfTurn,
    /// Every token of the generation budget was committed.
    BudgetExhausted,
    /// The oracle or decoder failed and the session was torn down.
    Aborted,
}

/// Result of a single `step` or `resolve_choice` call.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    TokenEmitted {
        token: String,
    },
    Branch {
        candidates: Vec<Candidate>,
    },
    /// `last_token` is set when the final commit produced visible text
    /// before the budget ran out. It is `None` for end-of-turn.
    Finished {
        reason: FinishReason,
        last_token: Option<String>,
    },
}

impl StepOutcome {
    /// Text committed by this outcome, if any reached the client.
    pub fn emitted_token(&self) -> Option<&str> {
        match self {
            Self::TokenEmitted { token } => Some(token),
            Self::Finished { last_token, .. } => last_token.as_deref(),
            Self::Branch { .. } => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_wire_names() -> anyhow::Result<()> {
        let candidate = Candidate {
            rank: 0,
            token_id: 791,
            probability: 0.5,
            text: " The".to_string(),
        };

        let json = serde_json::to_value(&candidate)?;
        assert_eq!(json["i"], 0);
        assert_eq!(json["index"], 791);
        assert_eq!(json["prob"], 0.5);
        assert_eq!(json["token"], " The");
        Ok(())
    }

    #[test]
    fn test_emitted_token() {
        let finished = StepOutcome::Finished {
            reason: FinishReason::BudgetExhausted,
            last_token: Some(" end".to_string()),
        };
        assert_eq!(finished.emitted_token(), Some(" end"));
        assert!(finished.is_finished());

        let branch = StepOutcome::Branch { candidates: Vec::new() };
        assert_eq!(branch.emitted_token(), None);
    }
}
