//! Default prompt construction.
//!
//! Renders the transcript as provider-agnostic [`PromptMessage`]s and trims
//! the oldest history to fit the context window. Token counts use a
//! character heuristic (~4 characters per token) plus a small per-message
//! overhead for role markers.

use tracing::debug;
use vaultpilot_core::message::{Message, ToolCallStatus};
use vaultpilot_core::prompt::{PromptBuilder, PromptContext};
use vaultpilot_core::provider::PromptMessage;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant working inside the user's note vault. \
Answer concisely and reference notes by their vault-relative path.";

const TOOLS_NOTE: &str = "You can call tools to list, read, search, edit and organize notes. \
Prefer fs_edit for small changes to an existing note.";

const MESSAGE_OVERHEAD: usize = 4;

/// Estimate the token count for a string. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

fn estimate_message(message: &PromptMessage) -> usize {
    let calls: usize = message
        .tool_calls
        .iter()
        .map(|c| estimate_tokens(&c.name) + estimate_tokens(&c.arguments.as_text()))
        .sum();
    MESSAGE_OVERHEAD + estimate_tokens(&message.content) + calls
}

/// History rendered as groups that must be kept or dropped together.
///
/// An assistant turn and the tool results answering it form one group, so
/// trimming never leaves a tool result without the call it belongs to.
struct Group {
    messages: Vec<PromptMessage>,
    tokens: usize,
    pinned: bool,
}

pub struct DefaultPromptBuilder {
    system_prompt: String,
}

impl DefaultPromptBuilder {
    pub fn new(system_prompt: Option<String>) -> Self {
        Self {
            system_prompt: system_prompt.unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }

    fn system_message(&self, context: &PromptContext<'_>) -> PromptMessage {
        let mut text = self.system_prompt.clone();
        if context.tools_available {
            text.push_str("\n\n");
            text.push_str(TOOLS_NOTE);
        }
        if let Some(file) = context.current_file {
            text.push_str(&format!("\n\nThe user is currently viewing the note '{file}'."));
        }
        PromptMessage::system(text)
    }

    fn render(message: &Message) -> Vec<PromptMessage> {
        match message {
            Message::User(user) => {
                let mut content = user.content.clone();
                for attachment in &user.attachments {
                    content.push_str(&format!(
                        "\n\n<attachment name=\"{}\">\n{}\n</attachment>",
                        attachment.name, attachment.content
                    ));
                }
                vec![PromptMessage::user(content)]
            }
            Message::Assistant(assistant) => {
                if assistant.content.trim().is_empty() && assistant.tool_calls.is_empty() {
                    return Vec::new();
                }
                vec![PromptMessage::assistant(
                    assistant.content.clone(),
                    assistant.tool_calls.clone(),
                )]
            }
            Message::Tool(tool) => tool
                .calls
                .iter()
                .map(|call| {
                    let text = match call.status() {
                        ToolCallStatus::PendingApproval | ToolCallStatus::Running => {
                            "Tool call was not executed.".to_string()
                        }
                        _ => call.result_text(),
                    };
                    PromptMessage::tool_result(call.request.id.clone(), text)
                })
                .collect(),
        }
    }

    fn group(history: &[Message]) -> Vec<Group> {
        let last_user = history.iter().rposition(|m| matches!(m, Message::User(_)));
        let mut groups: Vec<Group> = Vec::new();

        for (i, message) in history.iter().enumerate() {
            let rendered = Self::render(message);
            if rendered.is_empty() {
                continue;
            }
            let tokens = rendered.iter().map(estimate_message).sum();

            let joins_previous = matches!(message, Message::Tool(_))
                && i > 0
                && matches!(&history[i - 1], Message::Assistant(a) if !a.tool_calls.is_empty());
            if joins_previous && let Some(previous) = groups.last_mut() {
                previous.messages.extend(rendered);
                previous.tokens += tokens;
                continue;
            }

            groups.push(Group {
                messages: rendered,
                tokens,
                pinned: Some(i) == last_user,
            });
        }
        groups
    }
}

impl Default for DefaultPromptBuilder {
    fn default() -> Self {
        Self::new(None)
    }
}

impl PromptBuilder for DefaultPromptBuilder {
    fn build(&self, context: &PromptContext<'_>) -> Vec<PromptMessage> {
        let system = self.system_message(context);
        let mut groups = Self::group(context.history);

        let mut total = estimate_message(&system) + groups.iter().map(|g| g.tokens).sum::<usize>();
        let mut dropped = 0;
        while total > context.context_window_tokens {
            let Some(oldest) = groups.iter().position(|g| !g.pinned) else {
                break;
            };
            total -= groups.remove(oldest).tokens;
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, total, budget = context.context_window_tokens, "Trimmed prompt history");
        }

        std::iter::once(system)
            .chain(groups.into_iter().flat_map(|g| g.messages))
            .collect()
    }
}
