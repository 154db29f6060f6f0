/// Error taxonomy for a generation session.
///
/// Every variant renders a human-readable message through `Display`; the
/// session controller hands that text to the notifier unchanged, so nothing
/// here ever escapes the controller as an uncaught fault.
use thiserror::Error;

use crate::document::Range;

// ── Composition ───────────────────────────────────────────────────────────────

/// The user gave us nothing to work with. Recovered locally by asking again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompositionError {
    #[error("No prompt provided.")]
    EmptyPrompt,
    #[error("No code selected.")]
    EmptySelection,
    #[error("No generated code to rephrase.")]
    NothingToRephrase,
}

// ── Generation backend ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("the backend did not respond in time")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("backend rejected the request ({status}): {body}")]
    BackendRejected { status: u16, body: String },
    #[error("No valid code generated.")]
    EmptyResponse,
}

impl GenerationError {
    /// Short tag used in log fields (`timeout`, `network`, ...).
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::Timeout => "timeout",
            GenerationError::Network(_) => "network",
            GenerationError::BackendRejected { .. } => "backend-rejected",
            GenerationError::EmptyResponse => "empty-response",
        }
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GenerationError::Timeout
        } else {
            GenerationError::Network(e.to_string())
        }
    }
}

// ── Host document ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    #[error("No active editor is open.")]
    NoActiveDocument,
    #[error("position {line}:{column} is outside the document")]
    InvalidPosition { line: usize, column: usize },
    #[error("range {0} is no longer valid")]
    InvalidRange(Range),
}

// ── Insertion / removal ───────────────────────────────────────────────────────

/// A single write failed mid-run. `written` is whatever made it into the
/// document before the failure; it is left in place.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Failed to insert code into the editor: {source}")]
pub struct InsertionError {
    pub written: Range,
    #[source]
    pub source: DocumentError,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Failed to remove last inserted code: {source}")]
pub struct RemovalError {
    pub range: Range,
    #[source]
    pub source: DocumentError,
}
