use std::fmt;
use std::future::Future;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GenerationError;

// ── Mode ──────────────────────────────────────────────────────────────────────

/// Tag sent alongside every prompt; selects the backend's instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    Fix,
    #[default]
    Generate,
    Comment,
    Chat,
}

impl GenerationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationMode::Fix => "fix",
            GenerationMode::Generate => "generate",
            GenerationMode::Comment => "comment",
            GenerationMode::Chat => "chat",
        }
    }

    /// System instructions sent with requests in this mode.
    pub fn system_prompt(self) -> &'static str {
        match self {
            GenerationMode::Fix => {
                "You fix code. Reply with the corrected code only: no explanation, \
                 no prose, no markdown fences."
            }
            GenerationMode::Generate => {
                "You write code. Reply with the requested code only: no explanation, \
                 no prose, no markdown fences."
            }
            GenerationMode::Comment => {
                "You document code. Reply with the given code with clear comments added \
                 and nothing else changed: no prose, no markdown fences."
            }
            GenerationMode::Chat => "You are a helpful programming assistant.",
        }
    }
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fix" => Ok(GenerationMode::Fix),
            "generate" => Ok(GenerationMode::Generate),
            "comment" => Ok(GenerationMode::Comment),
            "chat" => Ok(GenerationMode::Chat),
            other => Err(format!("unknown mode '{other}' (expected fix, generate, comment or chat)")),
        }
    }
}

// ── Request ───────────────────────────────────────────────────────────────────

/// One call to the backend. Built by the composer, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub raw_prompt: String,
    pub is_rephrase: bool,
    pub composed_prompt: String,
    pub mode: GenerationMode,
}

// ── Backend boundary ──────────────────────────────────────────────────────────

pub trait GenerationClient {
    /// Send `composed_prompt` and return the raw reply text. May take seconds.
    fn generate(
        &self,
        composed_prompt: &str,
        mode: GenerationMode,
    ) -> impl Future<Output = Result<String, GenerationError>>;
}

// ── Response sanitizer ────────────────────────────────────────────────────────

/// Drop one opening and one closing fence line (```` ```lang ````), then trim.
/// Interior lines are never touched, even if they contain fences themselves.
pub fn sanitize(raw: &str) -> Result<String, GenerationError> {
    let trimmed = raw.trim();
    let mut lines: Vec<&str> = trimmed.split('\n').collect();

    if lines.first().is_some_and(|l| l.trim_start().starts_with("```")) {
        lines.remove(0);
    }
    if lines.last().is_some_and(|l| l.trim_start().starts_with("```")) {
        lines.pop();
    }

    let code = lines.join("\n").trim().to_string();
    if code.is_empty() {
        return Err(GenerationError::EmptyResponse);
    }
    Ok(code)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
