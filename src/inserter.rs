/// Character-paced insertion of generated text into a live document.
///
/// The text is split into single-character and newline edits, applied in
/// document order. Between edits the run waits `delay` for the typing effect;
/// that wait races the cancellation token so a teardown stops the loop before
/// the next write. Partial output is never rolled back.
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::document::{Document, Position, Range};
use crate::error::InsertionError;

pub const DEFAULT_TYPING_DELAY: Duration = Duration::from_millis(20);

/// One atomic write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOp {
    Char(char),
    Newline,
}

impl EditOp {
    /// Where the cursor goes once this op has been applied at `at`.
    fn advance(self, at: Position) -> Position {
        match self {
            EditOp::Char(_) => at.advance(1),
            EditOp::Newline => at.next_line(),
        }
    }
}

/// Line by line, char by char, with a newline op between lines.
pub fn decompose(text: &str) -> Vec<EditOp> {
    let mut ops = Vec::with_capacity(text.len());
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            ops.push(EditOp::Newline);
        }
        ops.extend(line.chars().map(EditOp::Char));
    }
    ops
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Completed(Range),
    /// Stopped by the cancellation token; the range covers what was written.
    Canceled(Range),
}

impl InsertOutcome {
    pub fn range(&self) -> Range {
        match self {
            InsertOutcome::Completed(r) | InsertOutcome::Canceled(r) => *r,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamInserter {
    delay: Duration,
}

impl Default for StreamInserter {
    fn default() -> Self {
        Self::new(DEFAULT_TYPING_DELAY)
    }
}

impl StreamInserter {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub async fn insert<D: Document>(
        &self,
        document: &Mutex<D>,
        start: Position,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<InsertOutcome, InsertionError> {
        let mut written = Range::empty(start);
        self.insert_tracked(document, start, text, cancel, &mut written).await
    }

    /// Same as `insert`, but `written` is kept current after every edit, so
    /// the span is still known if this future is dropped part-way through.
    pub async fn insert_tracked<D: Document>(
        &self,
        document: &Mutex<D>,
        start: Position,
        text: &str,
        cancel: &CancellationToken,
        written: &mut Range,
    ) -> Result<InsertOutcome, InsertionError> {
        let ops = decompose(text);
        *written = Range::empty(start);

        for (issued, op) in ops.iter().enumerate() {
            if cancel.is_cancelled() {
                debug!(issued, total = ops.len(), "insertion canceled");
                return Ok(InsertOutcome::Canceled(*written));
            }

            let mut buf = [0u8; 4];
            let fragment: &str = match op {
                EditOp::Char(c) => c.encode_utf8(&mut buf),
                EditOp::Newline => "\n",
            };

            // Lock scope is one edit
            let result = document.lock().await.insert_at(written.end, fragment);
            if let Err(source) = result {
                warn!(issued, total = ops.len(), error = %source, "insertion aborted");
                return Err(InsertionError { written: *written, source });
            }
            written.end = op.advance(written.end);

            if !self.pace(cancel).await {
                debug!(issued = issued + 1, total = ops.len(), "insertion canceled");
                return Ok(InsertOutcome::Canceled(*written));
            }
        }

        debug!(ops = ops.len(), range = %written, "insertion complete");
        Ok(InsertOutcome::Completed(*written))
    }

    /// Wait out the typing delay. Returns false if canceled meanwhile.
    async fn pace(&self, cancel: &CancellationToken) -> bool {
        if self.delay.is_zero() {
            tokio::task::yield_now().await;
            return !cancel.is_cancelled();
        }
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.delay) => true,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
