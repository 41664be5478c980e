//! # vaultpilot core
//!
//! Domain types, traits, and error definitions for the vaultpilot
//! response-orchestration engine. Every other crate depends inward on
//! this one.
//!
//! Every subsystem seam (LLM provider, tool, external tool server, prompt
//! builder) is defined as a trait here; implementations live in their
//! respective crates, which keeps them swappable and easy to stub in tests.

pub mod agent;
pub mod cancel;
pub mod error;
pub mod event;
pub mod message;
pub mod prompt;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{LoopConfig, TerminationReason};
pub use cancel::LinkedToken;
pub use error::{Error, ProviderError, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{
    AssistantMessage, Attachment, Citation, ConversationId, GenerationState, Message,
    ToolCallRecord, ToolCallRequest, ToolCallStatus, ToolMessage, UserMessage,
};
pub use prompt::{PromptBuilder, PromptContext};
pub use provider::{
    ChunkReceiver, PromptMessage, Provider, ProviderRequest, ProviderResponse, Role, StreamChunk,
    ToolCallDelta, Usage,
};
pub use tool::{
    Tool, ToolArguments, ToolContext, ToolDescriptor, ToolOutcome, ToolRegistry, ToolServer,
};
pub use tokio_util::sync::CancellationToken;
