use std::future::Future;

/// What the user decided about a freshly inserted block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackDecision {
    Accept,
    Reject,
    /// `None` means the user gave no new prompt; the controller asks for one.
    Rephrase(Option<String>),
}

impl FeedbackDecision {
    pub fn label(&self) -> &'static str {
        match self {
            FeedbackDecision::Accept => "accept",
            FeedbackDecision::Reject => "reject",
            FeedbackDecision::Rephrase(_) => "rephrase",
        }
    }
}

/// Modal three-way choice shown after insertion.
pub trait FeedbackGate {
    /// `None` when the user dismissed the prompt without choosing. That is a
    /// neutral outcome: the block stays resident and uncommitted.
    fn ask(&mut self, generated_text: &str) -> impl Future<Output = Option<FeedbackDecision>>;

    /// Ask for a (new) prompt. `None` or blank means the user gave up.
    fn request_prompt(&mut self, label: &str) -> impl Future<Output = Option<String>>;
}

/// Severity of a visible message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// Where human-readable status and failure messages go.
pub trait Notifier {
    fn notify(&mut self, level: NoticeLevel, message: &str);

    fn info(&mut self, message: &str) {
        self.notify(NoticeLevel::Info, message);
    }

    fn error(&mut self, message: &str) {
        self.notify(NoticeLevel::Error, message);
    }
}
