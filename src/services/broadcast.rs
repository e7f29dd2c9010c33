//! Push fan-out from protocol handlers to connected listeners

use crate::types::events::ServerEvent;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Which events a listener receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastScope {
    /// Every event from every connection (multi-viewer).
    All,
    /// Only events produced by the listener's own connection.
    Connection,
}

impl FromStr for BroadcastScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "connection" => Ok(Self::Connection),
            other => Err(format!("expected 'all' or 'connection', got '{other}'")),
        }
    }
}

/// Push sink for protocol events. Must never block the caller.
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, origin: ConnectionId, event: ServerEvent);
}

#[derive(Debug, Clone)]
pub struct Envelope {
    pub origin: ConnectionId,
    pub event: ServerEvent,
}

/// Bounded fan-out over a `tokio::sync::broadcast` channel.
///
/// A listener that falls more than `capacity` events behind skips the
/// backlog instead of holding up the sender or other listeners.
#[derive(Clone)]
pub struct ListenerHub {
    sender: broadcast::Sender<Envelope>,
    scope: BroadcastScope,
}

impl ListenerHub {
    pub fn new(capacity: usize, scope: BroadcastScope) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, scope }
    }

    pub fn scope(&self) -> BroadcastScope {
        self.scope
    }

    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Events visible to `connection` under the hub's scope.
    pub fn subscribe(&self, connection: ConnectionId) -> impl Stream<Item = ServerEvent> + Send + 'static {
        let scope = self.scope;
        BroadcastStream::new(self.sender.subscribe()).filter_map(move |item| match item {
            Ok(envelope) => match scope {
                BroadcastScope::All => Some(envelope.event),
                BroadcastScope::Connection if envelope.origin == connection => Some(envelope.event),
                BroadcastScope::Connection => None,
            },
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!("[HUB] listener {} lagged, skipped {} events", connection, skipped);
                None
            }
        })
    }
}

impl Broadcaster for ListenerHub {
    fn broadcast(&self, origin: ConnectionId, event: ServerEvent) {
        tracing::trace!("[HUB] {} -> {}", origin, event.event_type());
        // No listeners is not an error: the event simply has no audience.
        let _ = self.sender.send(Envelope { origin, event });
    }
}
