// Core modules
pub mod config;
pub mod inference;
pub mod services;
pub mod state;
pub mod types;
pub mod web;

// Re-exports
pub use config::Config;
pub use inference::Backend;
pub use services::{GenerationSession, ProtocolHandler};
pub use state::AppState;
