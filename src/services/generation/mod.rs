//! Branch-on-uncertainty generation core

pub mod policy;
pub mod session;
pub mod topk;

pub use policy::{BranchPolicy, Decision};
pub use session::{GenerationSession, SessionState};
