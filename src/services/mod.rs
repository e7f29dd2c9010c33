pub mod broadcast;
pub mod generation;
pub mod protocol;

pub use broadcast::{BroadcastScope, Broadcaster, ConnectionId, ListenerHub};
pub use generation::GenerationSession;
pub use protocol::ProtocolHandler;
