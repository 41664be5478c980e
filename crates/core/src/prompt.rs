//! Prompt construction contract.
//!
//! The orchestrator never decides how history is rendered for a model; it
//! hands the transcript to a [`PromptBuilder`] and sends whatever comes back.

use crate::message::Message;
use crate::provider::PromptMessage;

/// Everything a prompt builder may look at.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub history: &'a [Message],

    /// Whether any tool will be offered with this request
    pub tools_available: bool,

    /// Token budget for the whole request
    pub context_window_tokens: usize,

    /// Vault-relative path of the note the user is looking at
    pub current_file: Option<&'a str>,
}

pub trait PromptBuilder: Send + Sync {
    fn build(&self, context: &PromptContext<'_>) -> Vec<PromptMessage>;
}
