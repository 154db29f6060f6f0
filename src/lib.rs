//! Prompt-to-code generation sessions: compose a prompt, call a backend,
//! type the reply into the document character by character, then let the
//! user accept, reject or rephrase it.
pub mod actions;
pub mod client;
pub mod composer;
pub mod config;
pub mod document;
pub mod error;
pub mod feedback;
pub mod generation;
pub mod inserter;
pub mod logging;
pub mod session;
pub mod terminal;
pub mod ui;

#[cfg(test)]
mod testing;

pub use document::{Buffer, Document, Position, Range, SharedDocument};
pub use feedback::{FeedbackDecision, FeedbackGate, Notifier};
pub use generation::{GenerationClient, GenerationMode};
pub use session::{CycleOutcome, SessionController, SessionState, SubmitError};
