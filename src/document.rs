/// Host document boundary and the cursor value types the core tracks.
///
/// The core never talks to a concrete editor. It needs three operations
/// (`insert_at`, `delete_range`, `current_cursor`) plus the two cursor
/// translations on `Position`. `Buffer` is the rope-backed implementation the
/// terminal host uses; editors embed the core by implementing `Document`.
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use ropey::Rope;
use tokio::sync::Mutex;

use crate::error::DocumentError;

// ── DocumentCursor ────────────────────────────────────────────────────────────

/// Zero-based line / column (in chars) inside a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub const fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }

    /// Same line, `n` columns to the right.
    pub fn advance(self, n: usize) -> Self {
        Self { line: self.line, column: self.column + n }
    }

    /// Column 0 of the following line.
    pub fn next_line(self) -> Self {
        Self { line: self.line + 1, column: 0 }
    }

    /// Where the cursor ends up after `text` is typed at this position.
    pub fn after(self, text: &str) -> Self {
        text.chars().fold(self, |pos, ch| {
            if ch == '\n' { pos.next_line() } else { pos.advance(1) }
        })
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 1-based for humans
        write!(f, "{}:{}", self.line + 1, self.column + 1)
    }
}

/// Parses the 1-based `line:column` form that `Display` prints.
impl FromStr for Position {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (line, column) = s
            .split_once(':')
            .ok_or_else(|| format!("expected LINE:COLUMN, got '{s}'"))?;
        let parse = |part: &str| match part.trim().parse::<usize>() {
            Ok(n) if n >= 1 => Ok(n - 1),
            _ => Err(format!("'{part}' is not a 1-based number")),
        };
        Ok(Position::new(parse(line)?, parse(column)?))
    }
}

/// Ordered pair of positions covering exactly the characters of one insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Zero-width range at `at`.
    pub const fn empty(at: Position) -> Self {
        Self { start: at, end: at }
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

// ── Document boundary ─────────────────────────────────────────────────────────

pub trait Document {
    /// Insert `text` at `position`, returning the position just after it.
    fn insert_at(&mut self, position: Position, text: &str) -> Result<Position, DocumentError>;

    fn delete_range(&mut self, range: Range) -> Result<(), DocumentError>;

    fn current_cursor(&self) -> Position;

    /// Text covered by `range`. Only the fix-selection action reads text back.
    fn text_in(&self, range: Range) -> Result<String, DocumentError>;

    fn set_cursor(&mut self, position: Position) -> Result<(), DocumentError>;
}

/// A document shared between the host and the session controller. Each
/// lock is held for exactly one edit, so host edits can land between
/// inserted characters but never inside one.
pub type SharedDocument<D> = Arc<Mutex<D>>;

pub fn shared<D: Document>(document: D) -> SharedDocument<D> {
    Arc::new(Mutex::new(document))
}

// ── Buffer ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Buffer {
    rope: Rope,
    cursor: Position,
    path: Option<PathBuf>,
    modified: bool,
}

impl Buffer {
    pub fn with_text(text: &str) -> Self {
        Self {
            rope: Rope::from_str(text),
            cursor: Position::default(),
            path: None,
            modified: false,
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut buffer = Self::with_text(&content);
        buffer.path = Some(path.to_path_buf());
        Ok(buffer)
    }

    /// Write back to the file this buffer was loaded from.
    pub fn save(&mut self) -> Result<()> {
        let Some(path) = &self.path else {
            anyhow::bail!("buffer has no file path");
        };
        std::fs::write(path, self.rope.to_string())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        self.modified = false;
        Ok(())
    }

    pub fn text(&self) -> String {
        self.rope.to_string()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Position just past the last character.
    pub fn end(&self) -> Position {
        let last = self.rope.len_lines().saturating_sub(1);
        Position::new(last, self.line_len(last))
    }

    /// Length of `line` in chars, without its `\n`. Only `\n` ends a line;
    /// a `\r` before it is an ordinary column.
    fn line_len(&self, line: usize) -> usize {
        let slice = self.rope.line(line);
        let len = slice.len_chars();
        if len > 0 && slice.char(len - 1) == '\n' { len - 1 } else { len }
    }

    fn char_index(&self, pos: Position) -> Result<usize, DocumentError> {
        let invalid = DocumentError::InvalidPosition { line: pos.line, column: pos.column };
        if pos.line >= self.rope.len_lines() || pos.column > self.line_len(pos.line) {
            return Err(invalid);
        }
        Ok(self.rope.line_to_char(pos.line) + pos.column)
    }

    fn position_of(&self, char_idx: usize) -> Position {
        let line = self.rope.char_to_line(char_idx);
        Position::new(line, char_idx - self.rope.line_to_char(line))
    }

    fn range_indices(&self, range: Range) -> Result<(usize, usize), DocumentError> {
        let start = self.char_index(range.start).map_err(|_| DocumentError::InvalidRange(range))?;
        let end = self.char_index(range.end).map_err(|_| DocumentError::InvalidRange(range))?;
        if start > end {
            return Err(DocumentError::InvalidRange(range));
        }
        Ok((start, end))
    }
}

impl Document for Buffer {
    fn insert_at(&mut self, position: Position, text: &str) -> Result<Position, DocumentError> {
        let at = self.char_index(position)?;
        let cursor = self.char_index(self.cursor).unwrap_or(at);
        let inserted = text.chars().count();

        self.rope.insert(at, text);
        self.modified = true;

        // Typing at the caret carries the caret along
        if cursor >= at {
            self.cursor = self.position_of(cursor + inserted);
        }
        Ok(self.position_of(at + inserted))
    }

    fn delete_range(&mut self, range: Range) -> Result<(), DocumentError> {
        let (start, end) = self.range_indices(range)?;
        let cursor = self.char_index(self.cursor).unwrap_or(start);

        self.rope.remove(start..end);
        self.modified = true;

        let cursor = if cursor >= end {
            cursor - (end - start)
        } else {
            cursor.min(start)
        };
        self.cursor = self.position_of(cursor);
        Ok(())
    }

    fn current_cursor(&self) -> Position {
        self.cursor
    }

    fn text_in(&self, range: Range) -> Result<String, DocumentError> {
        let (start, end) = self.range_indices(range)?;
        Ok(self.rope.slice(start..end).to_string())
    }

    fn set_cursor(&mut self, position: Position) -> Result<(), DocumentError> {
        self.char_index(position)?;
        self.cursor = position;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
