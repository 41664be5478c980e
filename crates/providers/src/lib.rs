//! LLM provider implementations for vaultpilot.
//!
//! All providers implement `vaultpilot_core::Provider` and hand back raw
//! fragments; folding them into transcript messages happens in the agent.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;
