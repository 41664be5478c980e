//! The response-orchestration loop for vaultpilot.
//!
//! A run repeats one cycle until the model stops asking for tools:
//!
//! 1. **Prepare**: list the tools on offer and build the prompt
//! 2. **Request**: stream the reply, folding fragments into an assistant message
//! 3. **Dispatch**: seed each tool call as `running` or `pending_approval`,
//!    execute the runnable ones concurrently, write results back in place
//! 4. **Decide**: loop, stop for approval, or stop on abort
//!
//! Every transcript change is published to subscribers as a full snapshot.

pub mod aggregator;
pub mod controller;
pub mod generator;
pub mod hub;
pub mod progress;
pub mod prompt;
pub mod service;

pub use aggregator::StreamAggregator;
pub use controller::AgentLoopController;
pub use generator::{GeneratorSettings, ResponseGenerator, RunReport, RunScope};
pub use hub::{Subscription, Transcript, TranscriptHub};
pub use progress::{AgentProgress, ProgressGuard, ProgressNotifier};
pub use prompt::{DefaultPromptBuilder, estimate_tokens};
pub use service::{AgentService, RunInput};
