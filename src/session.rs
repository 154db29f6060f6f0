/// Generation session: the state machine that turns a prompt into resident
/// code and then acts on the user's accept / reject / rephrase decision.
///
///   Idle → Composing → Generating → Inserting → AwaitingFeedback → Idle
///                          │            │              │
///                          └──→ Error ←─┘              └─ rephrase → Composing
///
/// The controller is the only writer of session state. At most one generated
/// block is resident at a time: reject and rephrase both remove the previous
/// block before anything else happens.
use std::time::Instant;

use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::composer::PromptComposer;
use crate::document::{Document, Position, Range, SharedDocument};
use crate::error::{CompositionError, RemovalError};
use crate::feedback::{FeedbackDecision, FeedbackGate, Notifier};
use crate::generation::{sanitize, GenerationClient, GenerationMode, GenerationRequest};
use crate::inserter::{InsertOutcome, StreamInserter};

const PROMPT_LABEL: &str = "Enter your prompt for code generation";
const REPHRASE_LABEL: &str = "Rephrase your prompt for code generation";

// ── Session data ──────────────────────────────────────────────────────────────

/// What the controller remembers across cycles of one workflow.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    occupied: Option<Range>,
    last_generated: Option<String>,
    last_prompt: Option<String>,
    chain_depth: usize,
}

impl Session {
    fn new() -> Self {
        Self {
            id: Utc::now().format("%Y%m%d-%H%M%S%.3f").to_string(),
            occupied: None,
            last_generated: None,
            last_prompt: None,
            chain_depth: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Span currently holding the last inserted block, if it is still tracked.
    pub fn occupied_range(&self) -> Option<Range> {
        self.occupied
    }

    pub fn last_generated_text(&self) -> Option<&str> {
        self.last_generated.as_deref()
    }

    pub fn last_prompt(&self) -> Option<&str> {
        self.last_prompt.as_deref()
    }

    /// Number of rephrase cycles chained onto the current baseline.
    pub fn chain_depth(&self) -> usize {
        self.chain_depth
    }

    fn track(&mut self, range: Range, text: String) {
        self.occupied = Some(range);
        self.last_generated = Some(text);
    }

    /// Drop the baseline. A tracked range is released, not deleted.
    fn reset(&mut self) {
        self.occupied = None;
        self.last_generated = None;
        self.chain_depth = 0;
    }
}

// ── States and outcomes ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Composing { raw_prompt: String, chained: bool },
    Generating { request: GenerationRequest },
    Inserting { request: GenerationRequest, start: Position },
    AwaitingFeedback { range: Range },
    Error { message: String },
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Composing { .. } => "composing",
            SessionState::Generating { .. } => "generating",
            SessionState::Inserting { .. } => "inserting",
            SessionState::AwaitingFeedback { .. } => "awaiting-feedback",
            SessionState::Error { .. } => "error",
        }
    }
}

/// How one submitted prompt (including any rephrase cycles it led to) ended.
/// Every variant leaves the controller in `Idle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Accepted { range: Range },
    Rejected,
    /// Gate closed without a choice; the block stays resident, uncommitted.
    Dismissed { range: Range },
    /// The user never supplied a usable prompt.
    NoPrompt,
    Failed { message: String },
    /// Torn down mid-flight. `written` is the partial block left behind.
    Canceled { written: Option<Range> },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("a generation is already in progress ({state})")]
    Busy { state: &'static str },
    #[error("the session has been closed")]
    Closed,
}

enum PromptInput {
    Ready(String),
    Missing,
    Canceled,
}

// ── Controller ────────────────────────────────────────────────────────────────

pub struct SessionController<C, G, N, D> {
    client: C,
    gate: G,
    notifier: N,
    document: SharedDocument<D>,
    composer: PromptComposer,
    inserter: StreamInserter,
    mode: GenerationMode,
    session: Session,
    state: SessionState,
    cancel: CancellationToken,
}

impl<C, G, N, D> SessionController<C, G, N, D>
where
    C: GenerationClient,
    G: FeedbackGate,
    N: Notifier,
    D: Document,
{
    pub fn new(client: C, gate: G, notifier: N, document: SharedDocument<D>) -> Self {
        Self {
            client,
            gate,
            notifier,
            document,
            composer: PromptComposer::new(),
            inserter: StreamInserter::default(),
            mode: GenerationMode::Generate,
            session: Session::new(),
            state: SessionState::Idle,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_composer(mut self, composer: PromptComposer) -> Self {
        self.composer = composer;
        self
    }

    pub fn with_inserter(mut self, inserter: StreamInserter) -> Self {
        self.inserter = inserter;
        self
    }

    pub fn with_mode(mut self, mode: GenerationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Tie the session's lifetime to a token owned by the host surface.
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn document(&self) -> &SharedDocument<D> {
        &self.document
    }

    /// The host surface reuses its gate for menus between cycles.
    pub fn gate_mut(&mut self) -> &mut G {
        &mut self.gate
    }

    /// Token that tears the session down when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // ── Entry points (all require Idle) ──────────────────────────────────────

    /// Start a fresh, unchained generation. Any accepted block stays in the
    /// document but is no longer tracked.
    pub async fn submit(&mut self, raw_prompt: &str) -> Result<CycleOutcome, SubmitError> {
        self.ensure_open()?;
        self.ensure_idle()?;
        self.session.reset();
        let mut guard = CycleGuard { controller: self };
        Ok(guard.controller.run(raw_prompt.to_string(), false).await)
    }

    /// Regenerate from the last generated text. The resident block (accepted
    /// or not) is removed first.
    pub async fn rephrase(&mut self, new_prompt: Option<String>) -> Result<CycleOutcome, SubmitError> {
        self.ensure_open()?;
        self.ensure_idle()?;
        if self.session.last_generated.is_none() {
            self.notifier.info(&CompositionError::NothingToRephrase.to_string());
            return Ok(CycleOutcome::NoPrompt);
        }
        // Failure is already reported; fail-forward
        let _ = self.remove().await;
        self.session.chain_depth += 1;
        let mut guard = CycleGuard { controller: self };
        Ok(guard.controller.run(new_prompt.unwrap_or_default(), true).await)
    }

    /// Explicitly reject whatever is resident, e.g. a partial block left by a
    /// failed or canceled insertion.
    pub async fn reject(&mut self) -> Result<CycleOutcome, SubmitError> {
        self.ensure_idle()?;
        let _ = self.remove().await;
        self.session.reset();
        Ok(CycleOutcome::Rejected)
    }

    /// Delete the tracked block. Returns `Ok(false)` when nothing is tracked.
    /// On failure the range is dropped anyway so removal is never retried.
    pub async fn remove(&mut self) -> Result<bool, RemovalError> {
        let Some(range) = self.session.occupied.take() else {
            debug!("nothing to remove");
            return Ok(false);
        };

        let deleted = self.document.lock().await.delete_range(range);
        match deleted {
            Ok(()) => {
                info!(%range, "removed generated block");
                self.notifier.info("Last inserted code removed.");
                Ok(true)
            }
            Err(source) => {
                let err = RemovalError { range, source };
                warn!(%range, error = %err, "removal failed; range released");
                self.notifier.error(&err.to_string());
                Err(err)
            }
        }
    }

    /// Leave `Error` once the failure has been shown.
    pub fn acknowledge(&mut self) {
        if matches!(self.state, SessionState::Error { .. }) {
            self.transition(SessionState::Idle);
        }
    }

    fn ensure_open(&self) -> Result<(), SubmitError> {
        if self.is_closed() {
            return Err(SubmitError::Closed);
        }
        Ok(())
    }

    fn ensure_idle(&self) -> Result<(), SubmitError> {
        match self.state {
            SessionState::Idle => Ok(()),
            ref other => {
                warn!(state = other.name(), "submission rejected while busy");
                Err(SubmitError::Busy { state: other.name() })
            }
        }
    }

    // ── The cycle ─────────────────────────────────────────────────────────────

    async fn run(&mut self, mut raw_prompt: String, mut chained: bool) -> CycleOutcome {
        let cancel = self.cancel.clone();

        loop {
            // Composing
            self.transition(SessionState::Composing { raw_prompt: raw_prompt.clone(), chained });
            let prompt = match self.ensure_prompt(raw_prompt, chained).await {
                PromptInput::Ready(p) => p,
                PromptInput::Missing => return self.no_prompt(),
                PromptInput::Canceled => return self.canceled(None),
            };
            let prior = if chained { self.session.last_generated.clone() } else { None };
            let request = match self.composer.request(&prompt, prior.as_deref(), self.mode) {
                Ok(r) => r,
                Err(_) => return self.no_prompt(),
            };
            self.session.last_prompt = Some(prompt);

            // Generating
            self.transition(SessionState::Generating { request: request.clone() });
            let started = Instant::now();
            let reply = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                reply = self.client.generate(&request.composed_prompt, request.mode) => Some(reply),
            };
            let Some(reply) = reply else {
                return self.canceled(None);
            };
            let text = match reply.and_then(|raw| sanitize(&raw)) {
                Ok(text) => text,
                Err(e) => {
                    warn!(kind = e.kind(), error = %e, "generation failed");
                    return self.fail(format!("Failed to generate code: {e}"));
                }
            };
            info!(
                mode = %request.mode,
                prompt_len = request.composed_prompt.len(),
                reply_len = text.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "generation complete"
            );

            // Inserting
            let start = self.document.lock().await.current_cursor();
            self.transition(SessionState::Inserting { request, start });
            // Tracked from the first write on, in case this future is dropped
            self.session.track(Range::empty(start), text.clone());
            let written = self.session.occupied.get_or_insert(Range::empty(start));
            let inserted = self.inserter.insert_tracked(&self.document, start, &text, &cancel, written).await;
            let range = match inserted {
                Ok(InsertOutcome::Completed(range)) => {
                    self.session.track(range, text.clone());
                    range
                }
                Ok(InsertOutcome::Canceled(range)) => {
                    self.session.track(range, text);
                    return self.canceled(Some(range));
                }
                Err(e) => {
                    // Partial text stays until the user rejects it
                    self.session.track(e.written, text);
                    return self.fail(e.to_string());
                }
            };

            // AwaitingFeedback
            self.transition(SessionState::AwaitingFeedback { range });
            let decision = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                decision = self.gate.ask(&text) => Some(decision),
            };
            let Some(decision) = decision else {
                return self.canceled(Some(range));
            };
            debug!(decision = decision.as_ref().map_or("dismissed", |d| d.label()), "feedback");

            match decision {
                None => {
                    self.notifier.info("No option selected.");
                    self.transition(SessionState::Idle);
                    return CycleOutcome::Dismissed { range };
                }
                Some(FeedbackDecision::Accept) => {
                    self.notifier.info("Code accepted.");
                    self.transition(SessionState::Idle);
                    return CycleOutcome::Accepted { range };
                }
                Some(FeedbackDecision::Reject) => {
                    let _ = self.remove().await;
                    self.session.reset();
                    self.transition(SessionState::Idle);
                    return CycleOutcome::Rejected;
                }
                Some(FeedbackDecision::Rephrase(new_prompt)) => {
                    let _ = self.remove().await;
                    self.session.chain_depth += 1;
                    raw_prompt = new_prompt.unwrap_or_default();
                    chained = true;
                }
            }
        }
    }

    /// Use `raw` if it has content, otherwise ask the user once.
    async fn ensure_prompt(&mut self, raw: String, chained: bool) -> PromptInput {
        if !raw.trim().is_empty() {
            return PromptInput::Ready(raw);
        }
        let label = if chained { REPHRASE_LABEL } else { PROMPT_LABEL };
        let cancel = self.cancel.clone();
        let asked = tokio::select! {
            biased;
            _ = cancel.cancelled() => return PromptInput::Canceled,
            asked = self.gate.request_prompt(label) => asked,
        };
        match asked {
            Some(p) if !p.trim().is_empty() => PromptInput::Ready(p),
            _ => PromptInput::Missing,
        }
    }

    fn no_prompt(&mut self) -> CycleOutcome {
        self.notifier.info(&CompositionError::EmptyPrompt.to_string());
        self.transition(SessionState::Idle);
        CycleOutcome::NoPrompt
    }

    fn fail(&mut self, message: String) -> CycleOutcome {
        self.transition(SessionState::Error { message: message.clone() });
        self.notifier.error(&message);
        self.acknowledge();
        CycleOutcome::Failed { message }
    }

    fn canceled(&mut self, written: Option<Range>) -> CycleOutcome {
        info!(written = ?written, "session canceled");
        self.transition(SessionState::Idle);
        CycleOutcome::Canceled { written }
    }
}

impl<C, G, N, D> SessionController<C, G, N, D> {
    fn transition(&mut self, next: SessionState) {
        debug!(session = %self.session.id, from = self.state.name(), to = next.name(), "transition");
        self.state = next;
    }

    fn abandon_cycle(&mut self) {
        if matches!(self.state, SessionState::Idle) {
            return;
        }
        warn!(
            state = self.state.name(),
            written = ?self.session.occupied,
            "cycle dropped before it finished; treated as canceled"
        );
        self.transition(SessionState::Idle);
    }
}

/// Puts the controller back in `Idle` when a cycle future is dropped early
/// (a host-side timeout or a losing `select!` branch). Like a cancel, any
/// block already written stays tracked and can still be rejected.
struct CycleGuard<'a, C, G, N, D> {
    controller: &'a mut SessionController<C, G, N, D>,
}

impl<C, G, N, D> Drop for CycleGuard<'_, C, G, N, D> {
    fn drop(&mut self) {
        self.controller.abandon_cycle();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::document::{shared, Buffer};
    use crate::error::GenerationError;
    use crate::testing::{FlakyDocument, RecordingNotifier, ScriptedClient, ScriptedGate};

    const ADD_FN: &str = "function add(a,b){return a+b;}";
    const ARROW_FN: &str = "const add = (a, b) => a + b;";

    type TestController<D> = SessionController<ScriptedClient, ScriptedGate, RecordingNotifier, D>;

    fn controller<D: Document>(
        client: &ScriptedClient,
        gate: &ScriptedGate,
        notifier: &RecordingNotifier,
        document: SharedDocument<D>,
    ) -> TestController<D> {
        SessionController::new(client.clone(), gate.clone(), notifier.clone(), document)
            .with_inserter(StreamInserter::new(Duration::ZERO))
    }

    fn span(text: &str) -> Range {
        Range::new(Position::new(0, 0), Position::new(0, text.chars().count()))
    }

    #[tokio::test]
    async fn test_accept_keeps_block_and_baseline() {
        let doc = shared(Buffer::with_text(""));
        let client = ScriptedClient::new(vec![Ok(format!("```js\n{ADD_FN}\n```"))]);
        let gate = ScriptedGate::new(vec![Some(FeedbackDecision::Accept)]);
        let notifier = RecordingNotifier::default();
        let mut ctl = controller(&client, &gate, &notifier, doc.clone());

        let outcome = ctl.submit("write a function that adds two numbers").await.unwrap();

        assert_eq!(outcome, CycleOutcome::Accepted { range: span(ADD_FN) });
        assert_eq!(ctl.state(), &SessionState::Idle);
        assert_eq!(ctl.session().occupied_range(), Some(span(ADD_FN)));
        assert_eq!(ctl.session().last_generated_text(), Some(ADD_FN));
        assert_eq!(doc.lock().await.text(), ADD_FN);
        assert_eq!(gate.shown(), vec![ADD_FN.to_string()]);
        assert!(client.prompts()[0].contains("write a function that adds two numbers"));
        assert_eq!(notifier.infos(), vec!["Code accepted.".to_string()]);
    }

    #[tokio::test]
    async fn test_rephrase_removes_block_before_chaining() {
        let doc = shared(Buffer::with_text(""));
        let client = ScriptedClient::new(vec![Ok(ADD_FN.into()), Ok(ARROW_FN.into())])
            .watching(doc.clone());
        let gate = ScriptedGate::new(vec![
            Some(FeedbackDecision::Rephrase(Some("make it arrow-style".into()))),
            Some(FeedbackDecision::Accept),
        ]);
        let notifier = RecordingNotifier::default();
        let mut ctl = controller(&client, &gate, &notifier, doc.clone());

        let outcome = ctl.submit("write a function that adds two numbers").await.unwrap();

        assert_eq!(outcome, CycleOutcome::Accepted { range: span(ARROW_FN) });
        // The old block was gone by the time the second request went out
        assert_eq!(client.observed(), vec![String::new(), String::new()]);
        let chained = &client.prompts()[1];
        let old = chained.find(ADD_FN).unwrap();
        let new = chained.find("make it arrow-style").unwrap();
        assert!(old < new);
        assert_eq!(doc.lock().await.text(), ARROW_FN);
        assert_eq!(ctl.session().chain_depth(), 1);
        assert_eq!(ctl.session().last_generated_text(), Some(ARROW_FN));
    }

    #[tokio::test]
    async fn test_rephrase_accepted_result_from_idle() {
        let doc = shared(Buffer::with_text(""));
        let client = ScriptedClient::new(vec![Ok(ADD_FN.into()), Ok(ARROW_FN.into())])
            .watching(doc.clone());
        let gate = ScriptedGate::new(vec![
            Some(FeedbackDecision::Accept),
            Some(FeedbackDecision::Accept),
        ]);
        let notifier = RecordingNotifier::default();
        let mut ctl = controller(&client, &gate, &notifier, doc.clone());

        ctl.submit("write a function that adds two numbers").await.unwrap();
        let outcome = ctl.rephrase(Some("make it arrow-style".into())).await.unwrap();

        assert_eq!(outcome, CycleOutcome::Accepted { range: span(ARROW_FN) });
        assert_eq!(client.observed()[1], "");
        assert!(client.prompts()[1].contains(ADD_FN));
        assert_eq!(doc.lock().await.text(), ARROW_FN);
    }

    #[tokio::test]
    async fn test_backend_failure_touches_nothing() {
        let doc = shared(Buffer::with_text("existing();\n"));
        let client = ScriptedClient::new(vec![Err(GenerationError::Timeout)]);
        let gate = ScriptedGate::default();
        let notifier = RecordingNotifier::default();
        let mut ctl = controller(&client, &gate, &notifier, doc.clone());

        let outcome = ctl.submit("add a logger").await.unwrap();

        assert!(matches!(outcome, CycleOutcome::Failed { .. }));
        assert_eq!(ctl.state(), &SessionState::Idle);
        assert_eq!(doc.lock().await.text(), "existing();\n");
        assert_eq!(ctl.session().occupied_range(), None);
        let errors = notifier.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("did not respond in time"));
        assert!(gate.shown().is_empty());
    }

    #[tokio::test]
    async fn test_fenced_empty_reply_is_a_failure() {
        let doc = shared(Buffer::with_text(""));
        let client = ScriptedClient::new(vec![Ok("```\n```".into())]);
        let gate = ScriptedGate::default();
        let notifier = RecordingNotifier::default();
        let mut ctl = controller(&client, &gate, &notifier, doc.clone());

        let outcome = ctl.submit("anything").await.unwrap();

        assert!(matches!(outcome, CycleOutcome::Failed { ref message } if message.contains("No valid code")));
        assert_eq!(doc.lock().await.text(), "");
    }

    #[tokio::test]
    async fn test_cancel_mid_insertion_keeps_partial_text() {
        let text = "abcdefghijklmnopqrstuvwxyz0123";
        let cancel = CancellationToken::new();
        let doc = shared(FlakyDocument::new("").cancel_after(5, cancel.clone()));
        let client = ScriptedClient::new(vec![Ok(text.into())]);
        let gate = ScriptedGate::default();
        let notifier = RecordingNotifier::default();
        let mut ctl = SessionController::new(client.clone(), gate.clone(), notifier.clone(), doc.clone())
            .with_inserter(StreamInserter::new(Duration::from_millis(5)))
            .with_cancel_token(cancel);

        let outcome = ctl.submit("alphabet").await.unwrap();

        let written = Range::new(Position::new(0, 0), Position::new(0, 5));
        assert_eq!(outcome, CycleOutcome::Canceled { written: Some(written) });
        assert_eq!(doc.lock().await.text(), "abcde");
        assert_eq!(doc.lock().await.writes(), 5);
        assert_eq!(ctl.state(), &SessionState::Idle);
        assert!(notifier.errors().is_empty());
        assert!(gate.shown().is_empty());
        assert_eq!(ctl.session().occupied_range(), Some(written));

        // Torn down: no new work, but the partial block can still be rejected
        assert_eq!(ctl.submit("again").await, Err(SubmitError::Closed));
        assert_eq!(ctl.reject().await.unwrap(), CycleOutcome::Rejected);
        assert_eq!(doc.lock().await.text(), "");
    }

    #[tokio::test]
    async fn test_cancel_while_generating() {
        let doc = shared(Buffer::with_text("x"));
        let client = ScriptedClient::new(vec![]);
        let gate = ScriptedGate::default();
        let notifier = RecordingNotifier::default();
        let mut ctl = controller(&client, &gate, &notifier, doc.clone());

        let token = ctl.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });
        let outcome = ctl.submit("never answered").await.unwrap();

        assert_eq!(outcome, CycleOutcome::Canceled { written: None });
        assert_eq!(doc.lock().await.text(), "x");
        assert!(ctl.is_closed());
    }

    #[tokio::test]
    async fn test_insertion_failure_leaves_partial_until_rejected() {
        let doc = shared(FlakyDocument::new("").fail_after(4));
        let client = ScriptedClient::new(vec![Ok("abcdefgh".into())]);
        let gate = ScriptedGate::default();
        let notifier = RecordingNotifier::default();
        let mut ctl = controller(&client, &gate, &notifier, doc.clone());

        let outcome = ctl.submit("letters").await.unwrap();

        assert!(matches!(outcome, CycleOutcome::Failed { .. }));
        assert_eq!(ctl.state(), &SessionState::Idle);
        assert_eq!(doc.lock().await.text(), "abcd");
        assert_eq!(ctl.session().occupied_range(), Some(span("abcd")));
        assert!(notifier.errors()[0].starts_with("Failed to insert code into the editor"));

        ctl.reject().await.unwrap();
        assert_eq!(doc.lock().await.text(), "");
        assert_eq!(ctl.session().occupied_range(), None);
        assert_eq!(ctl.session().last_generated_text(), None);
    }

    #[tokio::test]
    async fn test_reject_clears_chain() {
        let doc = shared(Buffer::with_text(""));
        let client = ScriptedClient::new(vec![Ok(ADD_FN.into()), Ok("x".into())]);
        let gate = ScriptedGate::new(vec![
            Some(FeedbackDecision::Reject),
            Some(FeedbackDecision::Accept),
        ]);
        let notifier = RecordingNotifier::default();
        let mut ctl = controller(&client, &gate, &notifier, doc.clone());

        assert_eq!(ctl.submit("add").await.unwrap(), CycleOutcome::Rejected);
        assert_eq!(doc.lock().await.text(), "");
        assert_eq!(ctl.session().last_generated_text(), None);

        ctl.submit("next").await.unwrap();
        assert!(!client.prompts()[1].contains(ADD_FN));
        assert!(!client.prompts()[1].contains("Here is the existing code"));
    }

    #[tokio::test]
    async fn test_removal_is_idempotent() {
        let doc = shared(Buffer::with_text(""));
        let client = ScriptedClient::new(vec![Ok(ADD_FN.into())]);
        let gate = ScriptedGate::new(vec![Some(FeedbackDecision::Accept)]);
        let notifier = RecordingNotifier::default();
        let mut ctl = controller(&client, &gate, &notifier, doc.clone());
        ctl.submit("add").await.unwrap();

        assert_eq!(ctl.remove().await, Ok(true));
        let notices = notifier.infos().len();
        assert_eq!(ctl.remove().await, Ok(false));
        assert_eq!(notifier.infos().len(), notices);
        assert!(notifier.errors().is_empty());
        assert_eq!(doc.lock().await.text(), "");
    }

    #[tokio::test]
    async fn test_failed_removal_releases_range() {
        let doc = shared(FlakyDocument::new("").fail_deletes());
        let client = ScriptedClient::new(vec![Ok(ADD_FN.into())]);
        let gate = ScriptedGate::new(vec![Some(FeedbackDecision::Reject)]);
        let notifier = RecordingNotifier::default();
        let mut ctl = controller(&client, &gate, &notifier, doc.clone());

        assert_eq!(ctl.submit("add").await.unwrap(), CycleOutcome::Rejected);
        assert_eq!(ctl.session().occupied_range(), None);
        assert!(notifier.errors()[0].starts_with("Failed to remove last inserted code"));
        assert_eq!(doc.lock().await.text(), ADD_FN);

        // Nothing left to retry
        assert_eq!(ctl.remove().await, Ok(false));
        assert_eq!(notifier.errors().len(), 1);
    }

    #[tokio::test]
    async fn test_rephrase_without_prompt_asks_again() {
        let doc = shared(Buffer::with_text(""));
        let client = ScriptedClient::new(vec![Ok(ADD_FN.into()), Ok(ARROW_FN.into())]);
        let gate = ScriptedGate::new(vec![
            Some(FeedbackDecision::Rephrase(None)),
            Some(FeedbackDecision::Accept),
        ])
        .with_prompts(vec![Some("shorter please".into())]);
        let notifier = RecordingNotifier::default();
        let mut ctl = controller(&client, &gate, &notifier, doc.clone());

        let outcome = ctl.submit("add").await.unwrap();

        assert_eq!(outcome, CycleOutcome::Accepted { range: span(ARROW_FN) });
        assert_eq!(gate.prompt_requests(), 1);
        assert!(client.prompts()[1].contains("shorter please"));
    }

    #[tokio::test]
    async fn test_rephrase_abandoned_still_removes_old_block() {
        let doc = shared(Buffer::with_text(""));
        let client = ScriptedClient::new(vec![Ok(ADD_FN.into())]);
        let gate = ScriptedGate::new(vec![Some(FeedbackDecision::Rephrase(None))])
            .with_prompts(vec![None]);
        let notifier = RecordingNotifier::default();
        let mut ctl = controller(&client, &gate, &notifier, doc.clone());

        let outcome = ctl.submit("add").await.unwrap();

        assert_eq!(outcome, CycleOutcome::NoPrompt);
        assert_eq!(ctl.state(), &SessionState::Idle);
        assert_eq!(doc.lock().await.text(), "");
        assert_eq!(client.prompts().len(), 1);
        assert!(notifier.infos().contains(&"No prompt provided.".to_string()));
    }

    #[tokio::test]
    async fn test_empty_submission_reprompts() {
        let doc = shared(Buffer::with_text(""));
        let client = ScriptedClient::new(vec![Ok("hello()".into())]);
        let gate = ScriptedGate::new(vec![Some(FeedbackDecision::Accept)])
            .with_prompts(vec![Some("say hello".into())]);
        let notifier = RecordingNotifier::default();
        let mut ctl = controller(&client, &gate, &notifier, doc.clone());

        let outcome = ctl.submit("   ").await.unwrap();

        assert!(matches!(outcome, CycleOutcome::Accepted { .. }));
        assert_eq!(ctl.session().last_prompt(), Some("say hello"));
    }

    #[tokio::test]
    async fn test_dismiss_leaves_block_resident() {
        let doc = shared(Buffer::with_text(""));
        let client = ScriptedClient::new(vec![Ok(ADD_FN.into())]);
        let gate = ScriptedGate::new(vec![None]);
        let notifier = RecordingNotifier::default();
        let mut ctl = controller(&client, &gate, &notifier, doc.clone());

        let outcome = ctl.submit("add").await.unwrap();

        assert_eq!(outcome, CycleOutcome::Dismissed { range: span(ADD_FN) });
        assert_eq!(ctl.session().occupied_range(), Some(span(ADD_FN)));
        assert_eq!(doc.lock().await.text(), ADD_FN);
    }

    #[tokio::test]
    async fn test_every_decision_returns_to_idle() {
        let decisions = [
            Some(FeedbackDecision::Accept),
            Some(FeedbackDecision::Reject),
            Some(FeedbackDecision::Rephrase(Some("again".into()))),
            None,
        ];
        for first in decisions {
            let doc = shared(Buffer::with_text(""));
            let client = ScriptedClient::new(vec![Ok("a".into()), Ok("b".into()), Ok("c".into())]);
            let gate = ScriptedGate::new(vec![
                first.clone(),
                Some(FeedbackDecision::Accept),
                Some(FeedbackDecision::Accept),
            ]);
            let notifier = RecordingNotifier::default();
            let mut ctl = controller(&client, &gate, &notifier, doc.clone());

            ctl.submit("first").await.unwrap();
            assert_eq!(ctl.state(), &SessionState::Idle, "after {first:?}");
            assert!(ctl.submit("second").await.is_ok(), "after {first:?}");
        }
    }

    #[tokio::test]
    async fn test_submit_while_busy_is_rejected() {
        let doc = shared(Buffer::with_text(""));
        let client = ScriptedClient::new(vec![Ok(ADD_FN.into())]);
        let gate = ScriptedGate::default();
        let notifier = RecordingNotifier::default();
        let mut ctl = controller(&client, &gate, &notifier, doc.clone());
        ctl.state = SessionState::AwaitingFeedback { range: span(ADD_FN) };

        let busy = Err(SubmitError::Busy { state: "awaiting-feedback" });
        assert_eq!(ctl.submit("second").await, busy);
        assert_eq!(ctl.rephrase(Some("again".into())).await, busy);
        assert_eq!(ctl.reject().await, busy);
        assert!(client.prompts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_cycle_returns_to_idle() {
        let doc = shared(Buffer::with_text(""));
        let client = ScriptedClient::new(vec![Ok(ADD_FN.into()), Ok(ARROW_FN.into())]);
        // No decisions: the gate never answers
        let gate = ScriptedGate::default();
        let notifier = RecordingNotifier::default();
        let mut ctl = controller(&client, &gate, &notifier, doc.clone());

        let dropped = tokio::time::timeout(Duration::from_millis(20), ctl.submit("add")).await;
        assert!(dropped.is_err());
        assert_eq!(ctl.state(), &SessionState::Idle);
        assert_eq!(ctl.session().occupied_range(), Some(span(ADD_FN)));
        assert!(!ctl.is_closed());

        assert_eq!(ctl.reject().await, Ok(CycleOutcome::Rejected));
        assert_eq!(doc.lock().await.text(), "");

        // A new cycle is accepted rather than refused as busy
        let again = tokio::time::timeout(Duration::from_millis(20), ctl.submit("arrow")).await;
        assert!(again.is_err());
        assert_eq!(client.prompts().len(), 2);
        assert_eq!(ctl.state(), &SessionState::Idle);
        assert_eq!(doc.lock().await.text(), ARROW_FN);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_mid_insertion_tracks_partial_block() {
        let doc = shared(Buffer::with_text(""));
        let client = ScriptedClient::new(vec![Ok("abcdefghijklmnopqrstuvwxyz".into())]);
        let gate = ScriptedGate::default();
        let notifier = RecordingNotifier::default();
        let mut ctl = SessionController::new(client.clone(), gate.clone(), notifier.clone(), doc.clone())
            .with_inserter(StreamInserter::new(Duration::from_millis(10)));

        // Writes land at 0, 10, 20, 30 and 40ms
        let dropped = tokio::time::timeout(Duration::from_millis(45), ctl.submit("alphabet")).await;
        assert!(dropped.is_err());

        let written = Range::new(Position::new(0, 0), Position::new(0, 5));
        assert_eq!(doc.lock().await.text(), "abcde");
        assert_eq!(ctl.state(), &SessionState::Idle);
        assert_eq!(ctl.session().occupied_range(), Some(written));
        assert!(gate.shown().is_empty());

        ctl.reject().await.unwrap();
        assert_eq!(doc.lock().await.text(), "");
    }

    #[tokio::test]
    async fn test_fresh_submit_after_accept_releases_old_block() {
        let doc = shared(Buffer::with_text(""));
        let client = ScriptedClient::new(vec![Ok("one".into()), Ok("two".into())]);
        let gate = ScriptedGate::new(vec![
            Some(FeedbackDecision::Accept),
            Some(FeedbackDecision::Accept),
        ]);
        let notifier = RecordingNotifier::default();
        let mut ctl = controller(&client, &gate, &notifier, doc.clone());

        ctl.submit("first").await.unwrap();
        ctl.submit("second").await.unwrap();

        assert_eq!(doc.lock().await.text(), "onetwo");
        assert_eq!(
            ctl.session().occupied_range(),
            Some(Range::new(Position::new(0, 3), Position::new(0, 6)))
        );
        assert_eq!(ctl.session().chain_depth(), 0);
    }

    #[tokio::test]
    async fn test_rephrase_with_nothing_generated() {
        let doc = shared(Buffer::with_text(""));
        let client = ScriptedClient::new(vec![]);
        let gate = ScriptedGate::default();
        let notifier = RecordingNotifier::default();
        let mut ctl = controller(&client, &gate, &notifier, doc);

        assert_eq!(ctl.rephrase(Some("shorter".into())).await, Ok(CycleOutcome::NoPrompt));
        assert!(client.prompts().is_empty());
        assert_eq!(notifier.infos(), vec!["No generated code to rephrase.".to_string()]);
    }

    #[tokio::test]
    async fn test_mode_is_forwarded() {
        let doc = shared(Buffer::with_text(""));
        let client = ScriptedClient::new(vec![Ok("// adds".into())]);
        let gate = ScriptedGate::new(vec![Some(FeedbackDecision::Accept)]);
        let notifier = RecordingNotifier::default();
        let mut ctl = controller(&client, &gate, &notifier, doc).with_mode(GenerationMode::Comment);

        ctl.submit("comment this").await.unwrap();
        assert_eq!(client.modes(), vec![GenerationMode::Comment]);
    }
}
