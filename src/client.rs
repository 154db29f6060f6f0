use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::GenerationError;
use crate::generation::{GenerationClient, GenerationMode};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

// ── SSE delta types ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Option<Vec<StreamChoice>>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<Delta>,
}

/// Only `content` is kept; `reasoning_content` (DeepSeek-R1, Qwen3 thinking
/// mode) is dropped so it never lands in the document.
#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

// ── SSE accumulation ──────────────────────────────────────────────────────────

/// Collects `data:` lines from a chat-completions event stream. Network
/// chunks may split a line (or a UTF-8 sequence) anywhere, so bytes after the
/// last newline are held back until the next chunk completes them.
#[derive(Debug, Default)]
pub struct SseAccumulator {
    leftover: Vec<u8>,
    text: String,
}

impl SseAccumulator {
    pub fn push(&mut self, raw: &[u8]) {
        self.leftover.extend_from_slice(raw);
        let Some(cut) = self.leftover.iter().rposition(|b| *b == b'\n') else {
            return;
        };
        let complete: Vec<u8> = self.leftover.drain(..=cut).collect();
        for line in String::from_utf8_lossy(&complete).lines() {
            self.accept_line(line);
        }
    }

    /// Flush whatever is still buffered and return the accumulated text.
    pub fn finish(mut self) -> String {
        let tail = std::mem::take(&mut self.leftover);
        self.accept_line(&String::from_utf8_lossy(&tail));
        self.text
    }

    fn accept_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() || line == "data: [DONE]" {
            return;
        }
        let Some(json_str) = line.strip_prefix("data:") else {
            return;
        };
        let chunk: StreamChunk = match serde_json::from_str(json_str.trim_start()) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "skipping malformed stream line");
                return;
            }
        };
        for choice in chunk.choices.unwrap_or_default() {
            if let Some(content) = choice.delta.and_then(|d| d.content) {
                self.text.push_str(&content);
            }
        }
    }
}

// ── Client ────────────────────────────────────────────────────────────────────

/// OpenAI-compatible chat-completions backend (Groq, OpenAI, Ollama, ...).
pub struct HttpClient {
    http: reqwest::Client,
    pub endpoint: String,
    pub model: String,
    api_key: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl HttpClient {
    pub fn new(endpoint: String, model: String) -> Result<Self, GenerationError> {
        Self::with_timeout(endpoint, model, DEFAULT_TIMEOUT)
    }

    /// Fails if the HTTP client cannot be built (e.g. no TLS backend), rather
    /// than falling back to a client without the timeout.
    pub fn with_timeout(endpoint: String, model: String, timeout: Duration) -> Result<Self, GenerationError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint,
            model,
            api_key: None,
            max_tokens: None,
            temperature: None,
        })
    }

    pub fn set_api_key(&mut self, key: String) {
        self.api_key = Some(key);
    }

    pub fn set_sampling(&mut self, max_tokens: Option<u32>, temperature: Option<f32>) {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
    }

    /// Accepts both a bare host (`https://api.groq.com/openai`) and one that
    /// already ends in `/v1`.
    pub fn url(&self) -> String {
        let base = self.endpoint.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/chat/completions")
        } else {
            format!("{base}/v1/chat/completions")
        }
    }

    fn body(&self, composed_prompt: &str, mode: GenerationMode) -> Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "stream": true,
            "messages": [
                { "role": "system", "content": mode.system_prompt() },
                { "role": "user", "content": composed_prompt },
            ],
        });
        if let Some(max) = self.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if let Some(t) = self.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        body
    }
}

impl GenerationClient for HttpClient {
    async fn generate(&self, composed_prompt: &str, mode: GenerationMode) -> Result<String, GenerationError> {
        let url = self.url();
        debug!(%url, model = %self.model, %mode, "sending generation request");

        let mut req = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&self.body(composed_prompt, mode));

        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }

        let resp = req.send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(GenerationError::BackendRejected { status, body });
        }

        let mut stream = resp.bytes_stream();
        let mut acc = SseAccumulator::default();
        while let Some(chunk) = stream.next().await {
            let bytes = chunk?;
            acc.push(&bytes);
        }

        let text = acc.finish();
        if text.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(text)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
