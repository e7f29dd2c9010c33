use forkpath_bot::config::GenerationSettings;
use forkpath_bot::inference::{InferenceError, StubCodec, TokenOracle};
use forkpath_bot::types::{FinishReason, GenerationError, Phase, StepOutcome};
use forkpath_bot::GenerationSession;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const END: u32 = 0;
const A: u32 = 1;

fn codec() -> Arc<StubCodec> {
    Arc::new(StubCodec::with_vocab(
        ["a", "b", "c", "d", "e", "f"].iter().map(|w| format!(" {w}")).collect(),
        "<|eot_id|>",
    ))
}

fn settings(budget: usize) -> Arc<GenerationSettings> {
    Arc::new(GenerationSettings {
        system_prompt: "You are a test bot".to_string(),
        max_new_tokens: budget,
        num_choices: 5,
        ..GenerationSettings::default()
    })
}

fn peaked(id: u32, p: f32) -> Vec<f32> {
    let mut probs = vec![(1.0 - p) / 6.0; 7];
    probs[id as usize] = p;
    probs
}

fn flat() -> Vec<f32> {
    vec![0.02, 0.1, 0.19, 0.18, 0.18, 0.17, 0.16]
}

/// Oracle that plays back `script` by call number, repeating the last entry.
fn scripted(script: Vec<Vec<f32>>) -> (Arc<dyn TokenOracle>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let oracle: Arc<dyn TokenOracle> = Arc::new(move |_: &[u32]| -> Result<Vec<f32>, InferenceError> {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        Ok(script[n.min(script.len() - 1)].clone())
    });
    (oracle, calls)
}

fn assert_close(actual: f32, expected: f32) {
    assert!((actual - expected).abs() < 1e-5, "expected {expected}, got {actual}");
}

#[tokio::test]
async fn confident_oracle_never_branches() -> anyhow::Result<()> {
    let (oracle, calls) = scripted(vec![peaked(A, 0.9)]);
    let mut session = GenerationSession::start(oracle, codec(), settings(5), "hello there")?;

    let mut emitted = Vec::new();
    let mut last_threshold = session.threshold();
    let mut outcome = None;
    for _ in 0..5 {
        let next = session.step().await?;
        assert!(!matches!(next, StepOutcome::Branch { .. }));
        assert!(session.threshold() > last_threshold);
        last_threshold = session.threshold();
        emitted.extend(next.emitted_token().map(str::to_owned));
        outcome = Some(next);
    }

    assert_eq!(emitted, vec![" a"; 5]);
    assert!(matches!(
        outcome,
        Some(StepOutcome::Finished { reason: FinishReason::BudgetExhausted, .. })
    ));
    assert_close(session.threshold(), 0.3);
    assert_eq!(session.phase(), Phase::Finished);
    assert_eq!(session.state().remaining_budget, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 5);

    // Finished sessions accept nothing further.
    assert!(matches!(session.step().await, Err(GenerationError::InvalidState { .. })));
    Ok(())
}

#[tokio::test]
async fn uncertain_first_step_branches_then_resumes() -> anyhow::Result<()> {
    let (oracle, _) = scripted(vec![flat(), peaked(A, 0.9)]);
    let mut session = GenerationSession::start(oracle, codec(), settings(5), "hello")?;

    let StepOutcome::Branch { candidates } = session.step().await? else {
        panic!("expected a branch on the first step");
    };
    assert_eq!(candidates.len(), 5);
    assert!(candidates.windows(2).all(|w| w[0].probability >= w[1].probability));
    assert_eq!(candidates.iter().map(|c| c.rank).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    assert_eq!(session.phase(), Phase::AwaitingChoice);

    let top = candidates[0].token_id;
    let outcome = session.resolve_choice(0)?;
    assert!(matches!(outcome, StepOutcome::TokenEmitted { .. }));
    assert_eq!(session.state().generated(), &[top]);
    assert_close(session.threshold(), 0.2);
    assert_eq!(session.phase(), Phase::Generating);
    Ok(())
}

#[tokio::test]
async fn end_of_turn_finishes_early() -> anyhow::Result<()> {
    let (oracle, _) = scripted(vec![peaked(A, 0.9), peaked(A, 0.9), peaked(END, 0.9)]);
    let mut session = GenerationSession::start(oracle, codec(), settings(5), "hello")?;

    assert!(matches!(session.step().await?, StepOutcome::TokenEmitted { .. }));
    assert!(matches!(session.step().await?, StepOutcome::TokenEmitted { .. }));
    assert_eq!(
        session.step().await?,
        StepOutcome::Finished {
            reason: FinishReason::EndOfTurn,
            last_token: None,
        }
    );

    assert_eq!(session.phase(), Phase::Finished);
    assert_eq!(session.state().finish_reason, Some(FinishReason::EndOfTurn));
    assert!(session.state().remaining_budget > 0);
    assert_eq!(session.generated_text()?, " a a");
    assert!(matches!(session.step().await, Err(GenerationError::InvalidState { .. })));
    assert!(session.resolve_choice(0).is_err());
    Ok(())
}

#[tokio::test]
async fn committed_plus_remaining_is_constant() -> anyhow::Result<()> {
    let script = (0..12)
        .map(|i| if i % 3 == 1 { flat() } else { peaked(A, 0.9) })
        .collect();
    let (oracle, _) = scripted(script);
    let budget = 8;
    let mut session = GenerationSession::start(oracle, codec(), settings(budget), "hello")?;
    let prompt_len = session.state().prompt_len;

    let mut choice = 0;
    while session.phase() != Phase::Finished {
        let outcome = match session.phase() {
            Phase::AwaitingChoice => {
                choice = (choice + 1) % 5;
                session.resolve_choice(choice)?
            }
            _ => session.step().await?,
        };
        let state = session.state();
        assert_eq!(state.tokens.len(), prompt_len + state.committed());
        assert_eq!(state.committed() + state.remaining_budget, budget, "after {outcome:?}");
    }
    assert_eq!(session.state().committed(), budget);
    Ok(())
}

#[tokio::test]
async fn threshold_rises_until_a_branch_resets_it() -> anyhow::Result<()> {
    let (oracle, _) = scripted(vec![
        peaked(A, 0.9),
        peaked(A, 0.9),
        peaked(A, 0.9),
        peaked(A, 0.25),
    ]);
    let mut session = GenerationSession::start(oracle, codec(), settings(10), "hello")?;

    for expected in [0.22, 0.24, 0.26] {
        session.step().await?;
        assert_close(session.threshold(), expected);
    }

    // 0.25 cleared the default threshold but not the raised one.
    assert!(matches!(session.step().await?, StepOutcome::Branch { .. }));
    assert_close(session.threshold(), 0.2);
    Ok(())
}

#[tokio::test]
async fn out_of_range_choice_changes_nothing() -> anyhow::Result<()> {
    let (oracle, _) = scripted(vec![flat()]);
    let mut session = GenerationSession::start(oracle, codec(), settings(5), "hello")?;
    session.step().await?;
    let before = session.state().clone();

    for index in [5, 6, 100] {
        assert!(matches!(
            session.resolve_choice(index),
            Err(GenerationError::InvalidChoice { available: 5, .. })
        ));
    }

    let after = session.state();
    assert_eq!(after.tokens, before.tokens);
    assert_eq!(after.remaining_budget, before.remaining_budget);
    assert_eq!(after.phase, Phase::AwaitingChoice);
    assert_eq!(after.pending(), before.pending());
    Ok(())
}

#[tokio::test]
async fn choosing_the_end_marker_ends_the_turn() -> anyhow::Result<()> {
    // Ranks: " b", end marker, " c", ...
    let (oracle, _) = scripted(vec![vec![0.185, 0.1, 0.19, 0.18, 0.17, 0.16, 0.15]]);
    let mut session = GenerationSession::start(oracle, codec(), settings(5), "hello")?;

    let StepOutcome::Branch { candidates } = session.step().await? else {
        panic!("expected a branch");
    };
    assert_eq!(candidates[1].token_id, END);

    assert_eq!(
        session.resolve_choice(1)?,
        StepOutcome::Finished {
            reason: FinishReason::EndOfTurn,
            last_token: None,
        }
    );
    let state = session.state();
    assert_eq!(state.phase, Phase::Finished);
    assert_eq!(state.finish_reason, Some(FinishReason::EndOfTurn));
    assert!(state.pending.is_none());
    assert_eq!(state.remaining_budget, 4);
    Ok(())
}

#[tokio::test]
async fn choice_spending_the_last_budget_unit_finishes() -> anyhow::Result<()> {
    let (oracle, _) = scripted(vec![peaked(A, 0.9), flat()]);
    let mut session = GenerationSession::start(oracle, codec(), settings(2), "hello")?;

    assert!(matches!(session.step().await?, StepOutcome::TokenEmitted { .. }));
    assert!(matches!(session.step().await?, StepOutcome::Branch { .. }));

    // Rank 2 of the flat head is " d".
    assert_eq!(
        session.resolve_choice(2)?,
        StepOutcome::Finished {
            reason: FinishReason::BudgetExhausted,
            last_token: Some(" d".to_string()),
        }
    );
    assert_eq!(session.phase(), Phase::Finished);
    assert_eq!(session.state().remaining_budget, 0);
    assert_eq!(session.generated_text()?, " a d");
    assert!(matches!(session.resolve_choice(0), Err(GenerationError::InvalidState { .. })));
    Ok(())
}
