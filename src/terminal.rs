/// Terminal host surface for the `lask` binary.
///
/// The generated code is typed to stdout through `Echo`; menus, prompts and
/// notices go to stderr so `--dry-run` output on stdout stays clean. Keys are
/// read in raw mode, one keypress at a time, and raw mode is only held while
/// a menu or prompt is open.
use std::io::{self, Stdout, Write};

use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::document::{Document, Position, Range};
use crate::error::DocumentError;
use crate::feedback::{FeedbackDecision, FeedbackGate, NoticeLevel, Notifier};
use crate::ui;

// ── Raw mode guard ────────────────────────────────────────────────────────────

struct RawMode;

impl RawMode {
    fn enable() -> Option<Self> {
        match enable_raw_mode() {
            Ok(()) => Some(RawMode),
            Err(e) => {
                warn!(error = %e, "terminal does not support raw mode");
                None
            }
        }
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

fn flush_stderr() {
    let _ = io::stderr().flush();
}

// ── Gate ──────────────────────────────────────────────────────────────────────

/// What to do once a cycle has returned to idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostAction {
    NewPrompt,
    Rephrase,
    Reject,
    Quit,
}

/// Key-driven feedback gate. Ctrl-C while a menu is open cancels `cancel`,
/// since raw mode swallows the signal.
pub struct TerminalGate {
    events: Option<EventStream>,
    cancel: CancellationToken,
}

impl TerminalGate {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { events: None, cancel }
    }

    /// Menu shown between cycles.
    pub async fn next_action(&mut self) -> HostAction {
        eprint!("\n  {}  ", ui::NEXT_MENU);
        flush_stderr();
        let Some(_raw) = RawMode::enable() else {
            return HostAction::Quit;
        };
        let action = loop {
            let Some(key) = self.next_key().await else {
                break HostAction::Quit;
            };
            match key.code {
                KeyCode::Char('n') => break HostAction::NewPrompt,
                KeyCode::Char('p') => break HostAction::Rephrase,
                KeyCode::Char('r') => break HostAction::Reject,
                KeyCode::Char('q') | KeyCode::Esc => break HostAction::Quit,
                _ => continue,
            }
        };
        eprint!("\r\n");
        action
    }

    /// Next key press. `None` on Ctrl-C, end of input or a read error.
    async fn next_key(&mut self) -> Option<KeyEvent> {
        let events = self.events.get_or_insert_with(EventStream::new);
        while let Some(event) = events.next().await {
            match event {
                Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
                        debug!("ctrl-c in menu");
                        self.cancel.cancel();
                        return None;
                    }
                    return Some(key);
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!(error = %e, "terminal input failed");
                    return None;
                }
            }
        }
        None
    }

    /// Minimal line editor: printable chars, backspace, enter, esc.
    async fn read_line(&mut self, label: &str) -> Option<String> {
        eprint!("  {label}: ");
        flush_stderr();
        let _raw = RawMode::enable()?;
        let mut line = String::new();
        loop {
            let Some(key) = self.next_key().await else {
                eprint!("\r\n");
                return None;
            };
            match key.code {
                KeyCode::Enter => break,
                KeyCode::Esc => {
                    eprint!("\r\n");
                    return None;
                }
                KeyCode::Backspace => {
                    if line.pop().is_some() {
                        eprint!("\x08 \x08");
                    }
                }
                KeyCode::Char(c) => {
                    line.push(c);
                    eprint!("{c}");
                }
                _ => {}
            }
            flush_stderr();
        }
        eprint!("\r\n");
        Some(line)
    }
}

impl FeedbackGate for TerminalGate {
    async fn ask(&mut self, _generated_text: &str) -> Option<FeedbackDecision> {
        eprint!("\n\n  {}  ", ui::FEEDBACK_MENU);
        flush_stderr();
        let decision = {
            let _raw = RawMode::enable()?;
            loop {
                let Some(key) = self.next_key().await else {
                    eprint!("\r\n");
                    return None;
                };
                match key.code {
                    KeyCode::Char('a') => break FeedbackDecision::Accept,
                    KeyCode::Char('r') => break FeedbackDecision::Reject,
                    KeyCode::Char('p') => break FeedbackDecision::Rephrase(None),
                    KeyCode::Char('q') | KeyCode::Esc => {
                        eprint!("\r\n");
                        return None;
                    }
                    _ => continue,
                }
            }
        };
        eprintln!("{}", decision.label());

        if decision == FeedbackDecision::Rephrase(None) {
            let prompt = self.read_line("New prompt").await;
            return Some(FeedbackDecision::Rephrase(prompt.filter(|p| !p.trim().is_empty())));
        }
        Some(decision)
    }

    async fn request_prompt(&mut self, label: &str) -> Option<String> {
        self.read_line(label).await
    }
}

// ── Notifier ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn notify(&mut self, level: NoticeLevel, message: &str) {
        eprintln!("  {} {message}", ui::notice_glyph(level));
    }
}

// ── Echo ──────────────────────────────────────────────────────────────────────

/// Passes every edit through to `inner` and writes inserted text to `out`
/// as it lands, which is what makes the typing effect visible.
pub struct Echo<D, W = Stdout> {
    inner: D,
    out: W,
}

impl<D: Document> Echo<D> {
    pub fn new(inner: D) -> Self {
        Self::with_writer(inner, io::stdout())
    }
}

impl<D: Document, W: Write> Echo<D, W> {
    pub fn with_writer(inner: D, out: W) -> Self {
        Self { inner, out }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut D {
        &mut self.inner
    }

    pub fn writer(&self) -> &W {
        &self.out
    }
}

impl<D: Document, W: Write> Document for Echo<D, W> {
    fn insert_at(&mut self, position: Position, text: &str) -> Result<Position, DocumentError> {
        let end = self.inner.insert_at(position, text)?;
        if let Err(e) = self.out.write_all(text.as_bytes()).and_then(|()| self.out.flush()) {
            debug!(error = %e, "echo write failed");
        }
        Ok(end)
    }

    fn delete_range(&mut self, range: Range) -> Result<(), DocumentError> {
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
