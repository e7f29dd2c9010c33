//! Single-shot prompt endpoint streaming generated text over SSE.
//!
//! There is no operator on this path, so every branch point is resolved to
//! the top-ranked candidate; the `choice` event still reports what was on
//! offer.

use crate::services::GenerationSession;
use crate::state::AppState;
use crate::types::StepOutcome;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub prompt: String,
}

/// SSE event with a JSON payload. Decoded model text may contain `\r` or
/// `\n`, which raw `data` fields cannot carry.
fn json_event(name: &str, payload: &impl Serialize) -> Event {
    Event::default()
        .event(name)
        .json_data(payload)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

pub async fn ask(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::info!("[ASK] Received prompt ({} chars)", request.prompt.len());

    let stream = async_stream::stream! {
        let mut session = match GenerationSession::start(
            Arc::clone(&state.backend.oracle),
            Arc::clone(&state.backend.codec),
            Arc::clone(&state.settings),
            &request.prompt,
        ) {
            Ok(session) => session,
            Err(e) => {
                yield Ok(json_event("error", &e.to_string()));
                return;
            }
        };

        let mut awaiting_choice = false;
        loop {
            let result = if awaiting_choice {
                session.resolve_choice(0)
            } else {
                session.step().await
            };
            awaiting_choice = false;

            match result {
                Ok(StepOutcome::TokenEmitted { token }) => {
                    yield Ok(json_event("token", &token));
                }
                Ok(StepOutcome::Branch { candidates }) => {
                    yield Ok(json_event("choice", &candidates));
                    awaiting_choice = true;
                }
                Ok(StepOutcome::Finished { reason, last_token }) => {
                    if let Some(token) = last_token {
                        yield Ok(json_event("token", &token));
                    }
                    tracing::info!("[ASK] Session {} finished: {:?}", session.id(), reason);
                    yield Ok(Event::default().event("finish").data(""));
                    break;
                }
                Err(e) => {
                    tracing::warn!("[ASK] Session {} failed: {}", session.id(), e);
                    yield Ok(json_event("error", &e.to_string()));
                    break;
                }
            }
            tokio::task::yield_now().await;
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
