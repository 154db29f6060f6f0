/// One-shot editor actions that bypass the streaming session: rewrite a
/// selection in place (fix or comment), or drop a finished block at the cursor.
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::document::{Document, Range};
use crate::composer::PromptComposer;
use crate::error::{CompositionError, DocumentError, GenerationError};
use crate::generation::{sanitize, GenerationClient, GenerationMode};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error(transparent)]
    Composition(#[from] CompositionError),
    #[error("Failed to generate code: {0}")]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Document(#[from] DocumentError),
}

/// Send the selected text in `fix` mode and replace the selection with the
/// sanitized reply.
pub async fn fix_selection<C, D>(client: &C, document: &Mutex<D>, range: Range) -> Result<Range, ActionError>
where
    C: GenerationClient,
    D: Document,
{
    rewrite_selection(client, document, range, GenerationMode::Fix).await
}

/// Same as `fix_selection`, in `comment` mode: the selection comes back with
/// comments added.
pub async fn comment_selection<C, D>(client: &C, document: &Mutex<D>, range: Range) -> Result<Range, ActionError>
where
    C: GenerationClient,
    D: Document,
{
    rewrite_selection(client, document, range, GenerationMode::Comment).await
}

/// The document is only touched once the reply is in hand, and either the
/// whole selection is replaced or nothing is.
async fn rewrite_selection<C, D>(
    client: &C,
    document: &Mutex<D>,
    range: Range,
    mode: GenerationMode,
) -> Result<Range, ActionError>
where
    C: GenerationClient,
    D: Document,
{
    let selected = document.lock().await.text_in(range)?;
    if selected.trim().is_empty() {
        return Err(CompositionError::EmptySelection.into());
    }

    debug!(%range, %mode, len = selected.len(), "rewriting selection");
    let request = PromptComposer::new().request(&selected, None, mode)?;
    let reply = client.generate(&request.composed_prompt, mode).await?;
    let rewritten = sanitize(&reply)?;

    let mut doc = document.lock().await;
    // Re-read under the lock: the selection may have moved while we waited
    if doc.text_in(range)? != selected {
        return Err(DocumentError::InvalidRange(range).into());
    }

    // New text goes in after the selection first, so a failed write leaves
    // the selection as it was
    let inserted_end = doc.insert_at(range.end, &rewritten)?;
    if let Err(source) = doc.delete_range(range) {
        let inserted = Range::new(range.end, inserted_end);
        if let Err(e) = doc.delete_range(inserted) {
            warn!(%inserted, error = %e, "could not take back rewritten text");
        }
        return Err(source.into());
    }

    let replaced = Range::new(range.start, range.start.after(&rewritten));
    info!(%mode, from = %range, to = %replaced, "selection rewritten");
    Ok(replaced)
}

/// Insert `text` at the cursor as a single edit and leave the cursor after it.
pub async fn insert_block<D: Document>(document: &Mutex<D>, text: &str) -> Result<Range, DocumentError> {
    let mut doc = document.lock().await;
    let start = doc.current_cursor();
    let end = doc.insert_at(start, text)?;
    doc.set_cursor(end)?;
    let range = Range::new(start, end);
    debug!(%range, "block inserted");
    Ok(range)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
