/// Outbound prompt construction. Pure string work: no network, no document.
use crate::error::CompositionError;
use crate::generation::{GenerationMode, GenerationRequest};

/// Supplies the project files the user picked as context. The composer only
/// splices the paths into the prompt; it never opens or interprets them.
pub trait ContextSource {
    fn list_selected_files(&self) -> Vec<String>;
}

impl ContextSource for Vec<String> {
    fn list_selected_files(&self) -> Vec<String> {
        self.clone()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PromptComposer {
    selected_files: Vec<String>,
}

impl PromptComposer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the selected files from `source` for use in later prompts.
    pub fn with_context(source: &impl ContextSource) -> Self {
        Self { selected_files: source.list_selected_files() }
    }

    /// Build the prompt text. With `prior_text` the previous generated block
    /// is chained in front of the new prompt.
    pub fn compose(&self, raw_prompt: &str, prior_text: Option<&str>) -> Result<String, CompositionError> {
        self.compose_as(GenerationMode::Generate, raw_prompt, prior_text)
    }

    /// `compose` with the fresh template picked by `mode`. In `fix` and
    /// `comment` mode the raw prompt is the code itself.
    pub fn compose_as(
        &self,
        mode: GenerationMode,
        raw_prompt: &str,
        prior_text: Option<&str>,
    ) -> Result<String, CompositionError> {
        if raw_prompt.trim().is_empty() {
            return Err(CompositionError::EmptyPrompt);
        }

        let body = match prior_text {
            Some(prior) => format!(
                "Here is the existing code:\n{prior}\nNow, generate new code based on this and the following prompt:\n{raw_prompt}"
            ),
            None => match mode {
                GenerationMode::Fix => format!(
                    "Fix any errors in the following code:\n{raw_prompt}\n\
                     Return only the corrected code without any additional explanation, prose, or markdown fences."
                ),
                GenerationMode::Comment => format!(
                    "Add clear comments to the following code without changing what it does:\n{raw_prompt}\n\
                     Return only the commented code without any additional explanation, prose, or markdown fences."
                ),
                GenerationMode::Generate | GenerationMode::Chat => format!(
                    "You are an AI assistant. Your task is to generate code based on the following prompt:\n\
                     {raw_prompt}\n\
                     Return only the code without any additional explanation, prose, or markdown fences."
                ),
            },
        };

        if self.selected_files.is_empty() {
            return Ok(body);
        }
        let files = self.selected_files.join("\n");
        Ok(format!("Selected files:\n{files}\n\n{body}"))
    }

    /// Compose and package as a backend request.
    pub fn request(
        &self,
        raw_prompt: &str,
        prior_text: Option<&str>,
        mode: GenerationMode,
    ) -> Result<GenerationRequest, CompositionError> {
        Ok(GenerationRequest {
            composed_prompt: self.compose_as(mode, raw_prompt, prior_text)?,
            raw_prompt: raw_prompt.to_string(),
            is_rephrase: prior_text.is_some(),
            mode,
        })
    }
}
