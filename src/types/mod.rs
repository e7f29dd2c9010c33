pub mod errors;
pub mod events;
pub mod generation;

pub use errors::{GenerationError, ProtocolError};
pub use events::{ClientMessage, ServerEvent};
pub use generation::{Candidate, FinishReason, Phase, StepOutcome};
