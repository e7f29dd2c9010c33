//! Per-connection protocol driver
//!
//! Turns inbound client messages into session operations and session
//! outcomes into pushed events. Each handler owns at most one
//! [`GenerationSession`]; starting a new game discards the previous one.

use super::broadcast::{Broadcaster, ConnectionId};
use super::generation::GenerationSession;
use crate::config::GenerationSettings;
use crate::inference::Backend;
use crate::types::{ClientMessage, GenerationError, Phase, ProtocolError, ServerEvent, StepOutcome};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Connection-level view of the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Generating,
    AwaitingChoice,
    Finished,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Generating => "generating",
            Self::AwaitingChoice => "awaiting a choice",
            Self::Finished => "finished",
        }
    }
}

pub struct ProtocolHandler {
    connection: ConnectionId,
    backend: Backend,
    settings: Arc<GenerationSettings>,
    broadcaster: Arc<dyn Broadcaster>,
    session: Option<GenerationSession>,
    disconnected: watch::Receiver<bool>,
}

impl ProtocolHandler {
    pub fn new(
        connection: ConnectionId,
        backend: Backend,
        settings: Arc<GenerationSettings>,
        broadcaster: Arc<dyn Broadcaster>,
        disconnected: watch::Receiver<bool>,
    ) -> Self {
        Self {
            connection,
            backend,
            settings,
            broadcaster,
            session: None,
            disconnected,
        }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn session(&self) -> Option<&GenerationSession> {
        self.session.as_ref()
    }

    pub fn state(&self) -> ConnectionState {
        match self.session.as_ref().map(GenerationSession::phase) {
            None => ConnectionState::Idle,
            Some(Phase::Generating) => ConnectionState::Generating,
            Some(Phase::AwaitingChoice) => ConnectionState::AwaitingChoice,
            Some(Phase::Finished) => ConnectionState::Finished,
        }
    }

    /// Process inbound frames until the connection's sender side closes.
    pub async fn run(mut self, mut inbound: mpsc::UnboundedReceiver<String>) {
        while let Some(text) = inbound.recv().await {
            if self.is_disconnected() {
                break;
            }
            self.dispatch(&text).await;
        }
        if let Some(session) = self.session.take() {
            tracing::info!(
                "[PROTOCOL] {} closed, dropping session {}",
                self.connection,
                session.id()
            );
        }
    }

    /// Parse and handle one raw frame, reporting failures to the client.
    pub async fn dispatch(&mut self, text: &str) {
        let result = match ClientMessage::parse(text) {
            Ok(message) => self.handle(message).await,
            Err(e) => Err(ProtocolError::from(e)),
        };

        if let Err(e) = result {
            if self.is_disconnected() {
                return;
            }
            tracing::warn!("[PROTOCOL] {} {}", self.connection, e);
            self.emit(ServerEvent::error(e.to_string())).await;
            if e.terminates_session() {
                self.emit(ServerEvent::Finish).await;
            }
        }
    }

    /// Handle one message. Fatal session errors have already torn the
    /// session down when this returns `Err`.
    pub async fn handle(&mut self, message: ClientMessage) -> Result<(), ProtocolError> {
        tracing::debug!(
            "[PROTOCOL] {} received {} while {}",
            self.connection,
            message.kind(),
            self.state().as_str()
        );

        match message {
            ClientMessage::ResetGame => {
                self.emit(ServerEvent::Reset).await;
                Ok(())
            }
            ClientMessage::StartGame { prompt } => self.start_game(prompt).await,
            ClientMessage::Choice { data } => {
                self.expect_state(ConnectionState::AwaitingChoice, "a choice")?;
                let index = ClientMessage::choice_index(&data).ok_or_else(|| {
                    GenerationError::InvalidChoice {
                        choice: data.to_string(),
                        available: self.settings.num_choices,
                    }
                })?;
                self.resolve_choice(index).await
            }
        }
    }

    async fn start_game(&mut self, prompt: String) -> Result<(), ProtocolError> {
        if self.state() == ConnectionState::AwaitingChoice {
            return Err(ProtocolError::Rejected {
                message: "start_game",
                state: ConnectionState::AwaitingChoice.as_str(),
            });
        }

        let session = GenerationSession::start(
            Arc::clone(&self.backend.oracle),
            Arc::clone(&self.backend.codec),
            Arc::clone(&self.settings),
            &prompt,
        )?;
        if let Some(previous) = self.session.replace(session) {
            tracing::debug!("[PROTOCOL] {} replacing session {}", self.connection, previous.id());
        }

        self.emit(ServerEvent::Prompt(prompt)).await;
        self.drive().await
    }

    async fn resolve_choice(&mut self, index: usize) -> Result<(), ProtocolError> {
        let Some(session) = self.session.as_mut() else {
            return Err(self.reject("a choice"));
        };

        let outcome = match session.resolve_choice(index) {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.fail(e)),
        };

        if self.publish(outcome).await {
            self.drive().await
        } else {
            Ok(())
        }
    }

    /// Step until the session branches or finishes.
    async fn drive(&mut self) -> Result<(), ProtocolError> {
        loop {
            let Some(session) = self.session.as_mut() else {
                return Ok(());
            };
            let result = session.step().await;

            if self.is_disconnected() {
                // The step completed; its outcome has no audience.
                if let Some(session) = self.session.take() {
                    tracing::info!(
                        "[PROTOCOL] {} disconnected mid-drive, discarding session {}",
                        self.connection,
                        session.id()
                    );
                }
                return Ok(());
            }

            let outcome = result.map_err(|e| self.fail(e))?;
            if !self.publish(outcome).await {
                return Ok(());
            }
            tokio::task::yield_now().await;
        }
    }

    /// Push the events for one outcome. Returns whether driving continues.
    async fn publish(&mut self, outcome: StepOutcome) -> bool {
        match outcome {
            StepOutcome::TokenEmitted { token } => {
                self.emit(ServerEvent::NextToken(token)).await;
                true
            }
            StepOutcome::Branch { candidates } => {
                self.emit(ServerEvent::InsideChoice(candidates)).await;
                false
            }
            StepOutcome::Finished { reason, last_token } => {
                if let Some(token) = last_token {
                    self.emit(ServerEvent::NextToken(token)).await;
                }
                tracing::info!("[PROTOCOL] {} session finished: {:?}", self.connection, reason);
                self.emit(ServerEvent::Finish).await;
                false
            }
        }
    }

    async fn emit(&self, event: ServerEvent) {
        self.broadcaster.broadcast(self.connection, event);
        tokio::task::yield_now().await;
    }

    fn fail(&mut self, error: GenerationError) -> ProtocolError {
        if error.is_fatal() {
            if let Some(session) = self.session.take() {
                tracing::error!(
                    "[PROTOCOL] {} tearing down session {}: {}",
                    self.connection,
                    session.id(),
                    error
                );
            }
        }
        error.into()
    }

    fn expect_state(&self, expected: ConnectionState, message: &'static str) -> Result<(), ProtocolError> {
        if self.state() == expected {
            Ok(())
        } else {
            Err(self.reject(message))
        }
    }

    fn reject(&self, message: &'static str) -> ProtocolError {
        ProtocolError::Rejected {
            message,
            state: self.state().as_str(),
        }
    }

    fn is_disconnected(&self) -> bool {
        *self.disconnected.borrow()
    }
}
