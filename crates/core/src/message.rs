//! Transcript message types.
//!
//! A conversation transcript is an ordered list of [`Message`]s: user turns,
//! assistant replies (possibly still streaming) and tool messages that pair
//! each requested call with its response.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::provider::Usage;
use crate::tool::{ToolArguments, ToolOutcome};

/// Unique identifier for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Lifecycle tag on an assistant message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationState {
    Streaming,
    Completed,
    Aborted,
}

/// A web citation attached to an assistant reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// A file or snippet attached to a user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    pub timestamp: DateTime<Utc>,
}

/// A finalized request from the model to invoke a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: ToolArguments,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    pub state: GenerationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub timestamp: DateTime<Utc>,
}

impl AssistantMessage {
    /// A fresh, empty message in the `streaming` state.
    pub fn streaming() -> Self {
        Self {
            id: new_id(),
            content: String::new(),
            reasoning: None,
            citations: Vec::new(),
            tool_calls: Vec::new(),
            state: GenerationState::Streaming,
            usage: None,
            timestamp: Utc::now(),
        }
    }

    /// No text, no reasoning, no citations.
    pub fn is_vacuous(&self) -> bool {
        self.content.trim().is_empty()
            && self.reasoning.as_deref().is_none_or(|r| r.trim().is_empty())
            && self.citations.is_empty()
    }

    /// Move to `aborted` if still streaming. Returns whether the state changed.
    pub fn mark_aborted(&mut self) -> bool {
        if self.state == GenerationState::Streaming {
            self.state = GenerationState::Aborted;
            true
        } else {
            false
        }
    }

    /// Move to `completed` if still streaming. Returns whether the state changed.
    pub fn mark_completed(&mut self) -> bool {
        if self.state == GenerationState::Streaming {
            self.state = GenerationState::Completed;
            true
        } else {
            false
        }
    }
}

/// Status of one tool call.
///
/// `pending_approval` and `running` are the only non-terminal states; a
/// terminal status never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    PendingApproval,
    Running,
    Success,
    Error,
    Aborted,
    Rejected,
}

impl ToolCallStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::PendingApproval | Self::Running)
    }

    /// Terminal states after which looping again would be pointless.
    pub fn halts_loop(&self) -> bool {
        matches!(self, Self::Aborted | Self::Rejected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingApproval => "pending_approval",
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
            Self::Aborted => "aborted",
            Self::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResponse {
    pub status: ToolCallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One tool call paired with its (possibly still pending) response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub request: ToolCallRequest,
    pub response: ToolCallResponse,
}

impl ToolCallRecord {
    pub fn new(request: ToolCallRequest, status: ToolCallStatus) -> Self {
        Self {
            request,
            response: ToolCallResponse {
                status,
                output: None,
                error: None,
            },
        }
    }

    /// A call resolved locally, without ever reaching a backend.
    pub fn failed(request: ToolCallRequest, reason: impl Into<String>) -> Self {
        Self {
            request,
            response: ToolCallResponse {
                status: ToolCallStatus::Error,
                output: None,
                error: Some(reason.into()),
            },
        }
    }

    pub fn status(&self) -> ToolCallStatus {
        self.response.status
    }

    /// `pending_approval` → `running`. Returns whether the state changed.
    pub fn start(&mut self) -> bool {
        if self.response.status == ToolCallStatus::PendingApproval {
            self.response.status = ToolCallStatus::Running;
            true
        } else {
            false
        }
    }

    /// Record a terminal outcome. Ignored once the call is terminal.
    pub fn resolve(&mut self, outcome: ToolOutcome) -> bool {
        if self.response.status.is_terminal() {
            return false;
        }
        match outcome {
            ToolOutcome::Success(text) => {
                self.response.status = ToolCallStatus::Success;
                self.response.output = Some(text);
            }
            ToolOutcome::Error(message) => {
                self.response.status = ToolCallStatus::Error;
                self.response.error = Some(message);
            }
            ToolOutcome::Aborted => {
                self.response.status = ToolCallStatus::Aborted;
            }
        }
        true
    }

    /// Human rejection of a pending call. Ignored unless pending.
    pub fn reject(&mut self, reason: impl Into<String>) -> bool {
        if self.response.status != ToolCallStatus::PendingApproval {
            return false;
        }
        self.response.status = ToolCallStatus::Rejected;
        self.response.error = Some(reason.into());
        true
    }

    /// The text reported back to the model for this call.
    pub fn result_text(&self) -> String {
        match self.response.status {
            ToolCallStatus::Success => self.response.output.clone().unwrap_or_default(),
            ToolCallStatus::Error => format!(
                "Error: {}",
                self.response.error.as_deref().unwrap_or("unknown error")
            ),
            ToolCallStatus::Aborted => "Tool call was aborted.".into(),
            ToolCallStatus::Rejected => "The user declined this tool call.".into(),
            ToolCallStatus::PendingApproval | ToolCallStatus::Running => {
                "Tool call was not executed.".into()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMessage {
    pub id: String,
    pub calls: Vec<ToolCallRecord>,
    pub timestamp: DateTime<Utc>,
}

impl ToolMessage {
    pub fn new(calls: Vec<ToolCallRecord>) -> Self {
        Self {
            id: new_id(),
            calls,
            timestamp: Utc::now(),
        }
    }

    pub fn all_terminal(&self) -> bool {
        self.calls.iter().all(|c| c.status().is_terminal())
    }

    pub fn any_halting(&self) -> bool {
        self.calls.iter().any(|c| c.status().halts_loop())
    }

    pub fn has_status(&self, status: ToolCallStatus) -> bool {
        self.calls.iter().any(|c| c.status() == status)
    }
}

/// A single message in a conversation transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
    Tool(ToolMessage),
}

impl Message {
    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::User(UserMessage {
            id: new_id(),
            content: content.into(),
            attachments: Vec::new(),
            timestamp: Utc::now(),
        })
    }

    pub fn user_with_attachments(content: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self::User(UserMessage {
            id: new_id(),
            content: content.into(),
            attachments,
            timestamp: Utc::now(),
        })
    }

    /// Create a completed assistant message with plain text.
    pub fn assistant(content: impl Into<String>) -> Self {
        let mut message = AssistantMessage::streaming();
        message.content = content.into();
        message.state = GenerationState::Completed;
        Self::Assistant(message)
    }

    pub fn id(&self) -> &str {
        match self {
            Self::User(m) => &m.id,
            Self::Assistant(m) => &m.id,
            Self::Tool(m) => &m.id,
        }
    }

    pub fn as_assistant(&self) -> Option<&AssistantMessage> {
        match self {
            Self::Assistant(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_tool(&self) -> Option<&ToolMessage> {
        match self {
            Self::Tool(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_tool_mut(&mut self) -> Option<&mut ToolMessage> {
        match self {
            Self::Tool(m) => Some(m),
            _ => None,
        }
    }
}
