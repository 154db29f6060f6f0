/// Glyphs and one-line summaries shared by the terminal gate and the CLI.
use crate::feedback::NoticeLevel;
use crate::session::CycleOutcome;

// ── Glyphs ────────────────────────────────────────────────────────────────────

pub fn notice_glyph(level: NoticeLevel) -> &'static str {
    match level {
        NoticeLevel::Info  => "·",
        NoticeLevel::Error => "✗",
    }
}

pub const FEEDBACK_MENU: &str = "[a] accept  [r] reject  [p] rephrase  [esc] dismiss";
pub const NEXT_MENU: &str = "[n] new prompt  [p] rephrase  [r] reject  [q] quit";

// ── Outcome summaries ─────────────────────────────────────────────────────────

pub fn outcome_line(outcome: &CycleOutcome) -> String {
    match outcome {
        CycleOutcome::Accepted { range } => format!("✓ accepted  {range}"),
        CycleOutcome::Rejected => "↩ rejected".to_string(),
        CycleOutcome::Dismissed { range } => format!("◌ left in place (undecided)  {range}"),
        CycleOutcome::NoPrompt => "◌ nothing generated".to_string(),
        CycleOutcome::Failed { message } => format!("✗ {message}"),
        CycleOutcome::Canceled { written: Some(range) } if !range.is_empty() => {
            format!("■ canceled  partial block at {range}")
        }
        CycleOutcome::Canceled { .. } => "■ canceled".to_string(),
    }
}
