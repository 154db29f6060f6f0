/// Scripted collaborators for unit tests.
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::document::{Buffer, Document, Position, Range, SharedDocument};
use crate::error::{DocumentError, GenerationError};
use crate::feedback::{FeedbackDecision, FeedbackGate, NoticeLevel, Notifier};
use crate::generation::{GenerationClient, GenerationMode};

// ── Document that breaks on cue ───────────────────────────────────────────────

/// A `Buffer` that fails or fires a cancellation token after N inserts.
pub struct FlakyDocument {
    inner: Buffer,
    writes: usize,
    fail_after: Option<usize>,
    cancel_after: Option<(usize, CancellationToken)>,
    fail_deletes: bool,
}

impl FlakyDocument {
    pub fn new(text: &str) -> Self {
        Self {
            inner: Buffer::with_text(text),
            writes: 0,
            fail_after: None,
            cancel_after: None,
            fail_deletes: false,
        }
    }

    pub fn fail_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn cancel_after(mut self, n: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((n, token));
        self
    }

    pub fn fail_deletes(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn text(&self) -> String {
        self.inner.text()
    }
}

impl Document for FlakyDocument {
    fn insert_at(&mut self, position: Position, text: &str) -> Result<Position, DocumentError> {
        if self.fail_after.is_some_and(|n| self.writes >= n) {
            return Err(DocumentError::NoActiveDocument);
        }
        let after = self.inner.insert_at(position, text)?;
        self.writes += 1;
        if let Some((n, token)) = &self.cancel_after {
            if self.writes >= *n {
                token.cancel();
            }
        }
        Ok(after)
    }

    fn delete_range(&mut self, range: Range) -> Result<(), DocumentError> {
        if self.fail_deletes {
            return Err(DocumentError::InvalidRange(range));
        }
        self.inner.delete_range(range)
    }

    fn current_cursor(&self) -> Position {
        self.inner.current_cursor()
    }

    fn text_in(&self, range: Range) -> Result<String, DocumentError> {
        self.inner.text_in(range)
    }

    fn set_cursor(&mut self, position: Position) -> Result<(), DocumentError> {
        self.inner.set_cursor(position)
    }
}

// ── Generation backend ────────────────────────────────────────────────────────

/// Replies from a queue; an empty queue never answers. Clones share state so
/// the test can keep a handle after moving one into the controller.
#[derive(Clone, Default)]
pub struct ScriptedClient {
    replies: Arc<Mutex<VecDeque<Result<String, GenerationError>>>>,
    calls: Arc<Mutex<Vec<(String, GenerationMode)>>>,
    observed: Arc<Mutex<Vec<String>>>,
    watch: Option<SharedDocument<Buffer>>,
}

impl ScriptedClient {
    pub fn new(replies: Vec<Result<String, GenerationError>>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into())),
            ..Default::default()
        }
    }

    /// Record the text of `document` at the moment each request arrives.
    pub fn watching(mut self, document: SharedDocument<Buffer>) -> Self {
        self.watch = Some(document);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn modes(&self) -> Vec<GenerationMode> {
        self.calls.lock().unwrap().iter().map(|(_, m)| *m).collect()
    }

    pub fn observed(&self) -> Vec<String> {
        self.observed.lock().unwrap().clone()
    }
}

impl GenerationClient for ScriptedClient {
    async fn generate(&self, composed_prompt: &str, mode: GenerationMode) -> Result<String, GenerationError> {
        self.calls.lock().unwrap().push((composed_prompt.to_string(), mode));
        if let Some(doc) = &self.watch {
            let text = doc.lock().await.text();
            self.observed.lock().unwrap().push(text);
        }
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(reply) => reply,
            None => std::future::pending().await,
        }
    }
}

// ── Feedback gate ─────────────────────────────────────────────────────────────

/// Answers from queues. Running out of decisions never answers, which lets
/// tests park the controller in AwaitingFeedback.
#[derive(Clone, Default)]
pub struct ScriptedGate {
    decisions: Arc<Mutex<VecDeque<Option<FeedbackDecision>>>>,
    prompts: Arc<Mutex<VecDeque<Option<String>>>>,
    shown: Arc<Mutex<Vec<String>>>,
    prompt_requests: Arc<Mutex<usize>>,
}

impl ScriptedGate {
    pub fn new(decisions: Vec<Option<FeedbackDecision>>) -> Self {
        Self {
            decisions: Arc::new(Mutex::new(decisions.into())),
            ..Default::default()
        }
    }

    pub fn with_prompts(self, prompts: Vec<Option<String>>) -> Self {
        *self.prompts.lock().unwrap() = prompts.into();
        self
    }

    /// Texts the gate was asked about, in order.
    pub fn shown(&self) -> Vec<String> {
        self.shown.lock().unwrap().clone()
    }

    pub fn prompt_requests(&self) -> usize {
        *self.prompt_requests.lock().unwrap()
    }
}

impl FeedbackGate for ScriptedGate {
    async fn ask(&mut self, generated_text: &str) -> Option<FeedbackDecision> {
        self.shown.lock().unwrap().push(generated_text.to_string());
        let next = self.decisions.lock().unwrap().pop_front();
        match next {
            Some(decision) => decision,
            None => std::future::pending().await,
        }
    }

    async fn request_prompt(&mut self, _label: &str) -> Option<String> {
        *self.prompt_requests.lock().unwrap() += 1;
        self.prompts.lock().unwrap().pop_front().flatten()
    }
}

// ── Notifier ──────────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    notices: Arc<Mutex<Vec<(NoticeLevel, String)>>>,
}

impl RecordingNotifier {
    pub fn errors(&self) -> Vec<String> {
        self.with_level(NoticeLevel::Error)
    }

    pub fn infos(&self) -> Vec<String> {
        self.with_level(NoticeLevel::Info)
    }

    fn with_level(&self, level: NoticeLevel) -> Vec<String> {
        self.notices
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&mut self, level: NoticeLevel, message: &str) {
        self.notices.lock().unwrap().push((level, message.to_string()));
    }
}
