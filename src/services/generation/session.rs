//! One conversation's generation state machine

use super::policy::{BranchPolicy, Decision};
use super::topk::top_k;
use crate::config::GenerationSettings;
use crate::inference::{ChatCodec, InferenceError, TokenOracle};
use crate::types::{Candidate, FinishReason, GenerationError, Phase, StepOutcome};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SessionState {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Prompt ids followed by committed ids. Append-only.
    pub tokens: Vec<u32>,
    pub prompt_len: usize,
    pub remaining_budget: usize,
    pub threshold: f32,
    /// Present only while the phase is `AwaitingChoice`.
    pub pending: Option<Vec<Candidate>>,
    pub phase: Phase,
    pub finish_reason: Option<FinishReason>,
}

impl SessionState {
    pub fn committed(&self) -> usize {
        self.tokens.len() - self.prompt_len
    }

    pub fn generated(&self) -> &[u32] {
        &self.tokens[self.prompt_len..]
    }

    pub fn pending(&self) -> &[Candidate] {
        self.pending.as_deref().unwrap_or_default()
    }
}

/// Greedy generation that suspends for a human choice whenever the model's
/// top-1 probability drops below the current threshold.
///
/// Every operation takes `&mut self`, so at most one oracle query is in
/// flight per session.
pub struct GenerationSession {
    oracle: Arc<dyn TokenOracle>,
    codec: Arc<dyn ChatCodec>,
    settings: Arc<GenerationSettings>,
    policy: BranchPolicy,
    state: SessionState,
}

impl GenerationSession {
    /// Render the prompt and open a session in the `Generating` phase.
    pub fn start(
        oracle: Arc<dyn TokenOracle>,
        codec: Arc<dyn ChatCodec>,
        settings: Arc<GenerationSettings>,
        prompt: &str,
    ) -> Result<Self, GenerationError> {
        if prompt.trim().is_empty() {
            return Err(GenerationError::InvalidPrompt);
        }

        let tokens = codec.encode_chat(&settings.system_prompt, prompt)?;
        let policy = BranchPolicy::from_settings(&settings);

        let state = SessionState {
            id: Uuid::now_v7(),
            started_at: Utc::now(),
            prompt_len: tokens.len(),
            tokens,
            remaining_budget: settings.max_new_tokens,
            threshold: policy.default_threshold(),
            pending: None,
            phase: Phase::Generating,
            finish_reason: None,
        };
        tracing::info!(
            "[SESSION] {} started at {}: {} prompt tokens, budget {}",
            state.id,
            state.started_at.to_rfc3339(),
            state.prompt_len,
            state.remaining_budget
        );

        Ok(Self {
            oracle,
            codec,
            settings,
            policy,
            state,
        })
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn id(&self) -> Uuid {
        self.state.id
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn threshold(&self) -> f32 {
        self.state.threshold
    }

    /// Wall-clock time since the session started.
    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now() - self.state.started_at
    }

    /// Decoded output so far, special tokens removed.
    pub fn generated_text(&self) -> Result<String, GenerationError> {
        Ok(self.codec.decode(self.state.generated(), true)?)
    }

    /// Query the oracle once and either branch or commit the top-1 token.
    pub async fn step(&mut self) -> Result<StepOutcome, GenerationError> {
        self.expect_phase(Phase::Generating, "step")?;

        let distribution = match self.query_oracle().await {
            Ok(distribution) => distribution,
            Err(e) => return Err(self.abort(e)),
        };

        let ranked = top_k(&distribution, self.settings.num_choices);
        let Some(&(top_id, top_prob)) = ranked.first() else {
            return Err(self.abort(InferenceError::EmptyDistribution));
        };

        let decision = self.policy.decide(top_prob, self.state.threshold);
        let next_threshold = self.policy.next_threshold(decision, self.state.threshold);

        match decision {
            Decision::Branch => {
                tracing::debug!(
                    "[SESSION] top-1 probability {:.3} < threshold {:.3}, branching and resetting to {:.3}",
                    top_prob,
                    self.state.threshold,
                    next_threshold
                );
                let candidates = match self.build_candidates(&ranked) {
                    Ok(candidates) => candidates,
                    Err(e) => return Err(self.abort(e)),
                };

                self.state.threshold = next_threshold;
                self.state.pending = Some(candidates.clone());
                self.state.phase = Phase::AwaitingChoice;
                Ok(StepOutcome::Branch { candidates })
            }
            Decision::Advance => {
                tracing::trace!(
                    "[SESSION] top-1 probability {:.3} >= threshold {:.3}, raising to {:.3}",
                    top_prob,
                    self.state.threshold,
                    next_threshold
                );
                self.state.threshold = next_threshold;
                self.commit(top_id)
            }
        }
    }

    /// Commit the pending candidate at `index` (zero-based rank).
    ///
    /// An out-of-range index leaves the session untouched.
    pub fn resolve_choice(&mut self, index: usize) -> Result<StepOutcome, GenerationError> {
        self.expect_phase(Phase::AwaitingChoice, "resolve a choice")?;

        let pending = self.state.pending();
        let token_id = match pending.get(index) {
            Some(candidate) => candidate.token_id,
            None => {
                return Err(GenerationError::InvalidChoice {
                    choice: (index + 1).to_string(),
                    available: pending.len(),
                })
            }
        };
        tracing::debug!(
            "[SESSION] {} operator chose rank {} (token {})",
            self.state.id,
            index,
            token_id
        );

        self.state.pending = None;
        self.state.phase = Phase::Generating;
        self.commit(token_id)
    }

    async fn query_oracle(&self) -> Result<Vec<f32>, InferenceError> {
        let oracle = Arc::clone(&self.oracle);
        let tokens = self.state.tokens.clone();

        tokio::task::spawn_blocking(move || oracle.next_token_distribution(&tokens))
            .await
            .map_err(|e| InferenceError::Worker(e.to_string()))?
    }

    fn build_candidates(&self, ranked: &[(u32, f32)]) -> Result<Vec<Candidate>, InferenceError> {
        ranked
            .iter()
            .enumerate()
            .map(|(rank, &(token_id, probability))| {
                Ok(Candidate {
                    rank,
                    token_id,
                    probability,
                    text: self.codec.decode_token(token_id, true)?,
                })
            })
            .collect()
    }

    fn commit(&mut self, token_id: u32) -> Result<StepOutcome, GenerationError> {
        self.state.tokens.push(token_id);
        self.state.remaining_budget = self.state.remaining_budget.saturating_sub(1);

        let text_so_far = match self.codec.decode(self.state.generated(), false) {
            Ok(text) => text,
            Err(e) => return Err(self.abort(e)),
        };
        if self.codec.detect_end_marker(&text_so_far) {
            self.finish(FinishReason::EndOfTurn);
            return Ok(StepOutcome::Finished {
                reason: FinishReason::EndOfTurn,
                last_token: None,
            });
        }

        let token = match self.codec.decode_token(token_id, false) {
            Ok(token) => token,
            Err(e) => return Err(self.abort(e)),
        };

        if self.state.remaining_budget == 0 {
            self.finish(FinishReason::BudgetExhausted);
            return Ok(StepOutcome::Finished {
                reason: FinishReason::BudgetExhausted,
                last_token: Some(token),
            });
        }

        Ok(StepOutcome::TokenEmitted { token })
    }

    fn expect_phase(&self, expected: Phase, operation: &'static str) -> Result<(), GenerationError> {
        if self.state.phase == expected {
            Ok(())
        } else {
            Err(GenerationError::InvalidState {
                operation,
                phase: self.state.phase,
            })
        }
    }

    fn finish(&mut self, reason: FinishReason) {
        self.state.pending = None;
        self.state.phase = Phase::Finished;
        self.state.finish_reason = Some(reason);
        tracing::info!(
            "[SESSION] {} finished ({:?}) after {} ms, {} tokens committed",
            self.state.id,
            reason,
            self.elapsed().num_milliseconds(),
            self.state.committed()
        );
    }

    fn abort(&mut self, error: InferenceError) -> GenerationError {
        tracing::error!("[SESSION] {} aborted: {}", self.state.id, error);
        self.finish(FinishReason::Aborted);
        GenerationError::OracleFailure(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::StubCodec;

    fn codec() -> Arc<StubCodec> {
        Arc::new(StubCodec::with_vocab(
            ["a", "b", "c", "d", "e", "f"].iter().map(|w| format!(" {w}")).collect(),
            "<|eot_id|>",
        ))
    }

    fn settings(budget: usize) -> Arc<GenerationSettings> {
        Arc::new(GenerationSettings {
            system_prompt: "sys".to_string(),
            max_new_tokens: budget,
            num_choices: 5,
            default_threshold: 0.2,
            threshold_increment: 0.02,
        })
    }

    /// Peaked on token 1 (" a").
    fn confident(_: &[u32]) -> Result<Vec<f32>, InferenceError> {
        Ok(vec![0.0, 0.9, 0.04, 0.03, 0.02, 0.01, 0.0])
    }

    /// Flat head, top-1 below the default threshold.
    fn uncertain(_: &[u32]) -> Result<Vec<f32>, InferenceError> {
        Ok(vec![0.05, 0.1, 0.18, 0.18, 0.17, 0.16, 0.16])
    }

    #[test]
    fn test_start_rejects_empty_prompt() {
        for prompt in ["", "   "] {
            let result = GenerationSession::start(Arc::new(confident), codec(), settings(5), prompt);
            assert!(matches!(result, Err(GenerationError::InvalidPrompt)));
        }
    }

    #[test]
    fn test_start_seeds_state() -> anyhow::Result<()> {
        let session = GenerationSession::start(Arc::new(confident), codec(), settings(5), "a b")?;
        let state = session.state();
        assert_eq!(state.prompt_len, 3); // " sys" hashed + " a" + " b"
        assert_eq!(state.tokens.len(), 3);
        assert_eq!(state.remaining_budget, 5);
        assert_eq!(state.threshold, 0.2);
        assert_eq!(state.phase, Phase::Generating);
        assert!(state.pending.is_none());
        assert!(state.started_at <= Utc::now());
        assert!(session.elapsed().num_milliseconds() >= 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_branch_then_resolve() -> anyhow::Result<()> {
        let mut session = GenerationSession::start(Arc::new(uncertain), codec(), settings(5), "a")?;

        let outcome = session.step().await?;
        let StepOutcome::Branch { candidates } = outcome else {
            panic!("expected a branch, got {outcome:?}");
        };
        let ids: Vec<u32> = candidates.iter().map(|c| c.token_id).collect();
        assert_eq!(ids, vec![2, 3, 4, 5, 6]);
        assert_eq!(candidates[0].text, " b");
        assert_eq!(session.phase(), Phase::AwaitingChoice);

        // Stepping while a choice is pending is a protocol violation.
        assert!(matches!(
            session.step().await,
            Err(GenerationError::InvalidState { phase: Phase::AwaitingChoice, .. })
        ));

        let outcome = session.resolve_choice(1)?;
        assert_eq!(outcome, StepOutcome::TokenEmitted { token: " c".to_string() });
        assert_eq!(session.phase(), Phase::Generating);
        assert!(session.state().pending.is_none());
        assert_eq!(session.state().generated(), &[3]);
        assert_eq!(session.state().remaining_budget, 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_choice_leaves_state_untouched() -> anyhow::Result<()> {
        let mut session = GenerationSession::start(Arc::new(uncertain), codec(), settings(5), "a")?;
        session.step().await?;
        let before = session.state().clone();

        let err = session.resolve_choice(5).unwrap_err();
        assert!(matches!(err, GenerationError::InvalidChoice { available: 5, .. }));

        let after = session.state();
        assert_eq!(after.tokens, before.tokens);
        assert_eq!(after.remaining_budget, before.remaining_budget);
        assert_eq!(after.phase, Phase::AwaitingChoice);
        assert_eq!(after.pending, before.pending);
        Ok(())
    }

    #[test]
    fn test_resolve_without_branch_is_invalid_state() -> anyhow::Result<()> {
        let mut session = GenerationSession::start(Arc::new(confident), codec(), settings(5), "a")?;
        assert!(matches!(
            session.resolve_choice(0),
            Err(GenerationError::InvalidState { phase: Phase::Generating, .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_oracle_failure_aborts() -> anyhow::Result<()> {
        let failing = |_: &[u32]| -> Result<Vec<f32>, InferenceError> {
            Err(InferenceError::Worker("device lost".to_string()))
        };
        let mut session = GenerationSession::start(Arc::new(failing), codec(), settings(5), "a")?;

        assert!(matches!(session.step().await, Err(GenerationError::OracleFailure(_))));
        assert_eq!(session.phase(), Phase::Finished);
        assert_eq!(session.state().finish_reason, Some(FinishReason::Aborted));
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_distribution_aborts() -> anyhow::Result<()> {
        let empty = |_: &[u32]| -> Result<Vec<f32>, InferenceError> { Ok(Vec::new()) };
        let mut session = GenerationSession::start(Arc::new(empty), codec(), settings(5), "a")?;

        assert!(matches!(
            session.step().await,
            Err(GenerationError::OracleFailure(InferenceError::EmptyDistribution))
        ));
        assert_eq!(session.phase(), Phase::Finished);
        Ok(())
    }

    #[tokio::test]
    async fn test_budget_exhaustion_emits_last_token() -> anyhow::Result<()> {
        let mut session = GenerationSession::start(Arc::new(confident), codec(), settings(1), "a")?;

        let outcome = session.step().await?;
        assert_eq!(
            outcome,
            StepOutcome::Finished {
                reason: FinishReason::BudgetExhausted,
                last_token: Some(" a".to_string()),
            }
        );
        assert_eq!(session.phase(), Phase::Finished);
        assert_eq!(session.generated_text()?, " a");
        Ok(())
    }
}
