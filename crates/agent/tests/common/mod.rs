//! Shared fixtures for the agent integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::{Notify, mpsc};

use vaultpilot_agent::{
    AgentService, DefaultPromptBuilder, GeneratorSettings, Subscription, Transcript,
};
use vaultpilot_config::{BuiltinToolsConfig, ToolServerConfig, ToolToggle};
use vaultpilot_core::error::{ProviderError, ToolError};
use vaultpilot_core::message::{
    AssistantMessage, Citation, ConversationId, Message, ToolCallRecord, ToolCallRequest,
    ToolMessage,
};
use vaultpilot_core::provider::{
    ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolCallDelta, Usage,
};
use vaultpilot_core::tool::{ToolArguments, ToolDescriptor, ToolServer};
use vaultpilot_core::CancellationToken;
use vaultpilot_tools::{FsVault, Skill, SkillStore, StaticSkillStore, ToolGateway, local_registry};

// ── Scripted provider ────────────────────────────────────────────────────

/// What one `stream()` call does.
pub enum Step {
    /// Send every fragment, then close the stream
    Chunks(Vec<StreamChunk>),
    /// Send the fragments, then fail mid-stream
    ChunksThenError(Vec<StreamChunk>, ProviderError),
    /// Send the fragments and keep the stream open forever
    Hold(Vec<StreamChunk>),
    /// Open the stream but never send anything
    Stall,
    /// Fail before any fragment
    Fail(ProviderError),
}

/// Replays scripted streams and complete responses in order.
pub struct ScriptedProvider {
    streams: Mutex<VecDeque<Step>>,
    completions: Mutex<VecDeque<ProviderResponse>>,
    repeat: Option<Vec<StreamChunk>>,
    held: Mutex<Vec<mpsc::Sender<Result<StreamChunk, ProviderError>>>>,
    requests: Mutex<Vec<ProviderRequest>>,
    stream_calls: AtomicUsize,
    complete_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(streams: Vec<Step>) -> Self {
        Self {
            streams: Mutex::new(streams.into()),
            completions: Mutex::new(VecDeque::new()),
            repeat: None,
            held: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            stream_calls: AtomicUsize::new(0),
            complete_calls: AtomicUsize::new(0),
        }
    }

    /// Streams the same fragments on every request.
    pub fn repeating(chunks: Vec<StreamChunk>) -> Self {
        Self {
            repeat: Some(chunks),
            ..Self::new(vec![])
        }
    }

    pub fn with_completions(self, responses: Vec<ProviderResponse>) -> Self {
        *self.completions.lock().unwrap() = responses.into();
        self
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.completions.lock().unwrap().pop_front();
        next.ok_or_else(|| ProviderError::ApiError {
            status_code: 500,
            message: "script exhausted".into(),
        })
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        let step = self.streams.lock().unwrap().pop_front();
        let step = match step.or_else(|| self.repeat.clone().map(Step::Chunks)) {
            Some(step) => step,
            None => {
                return Err(ProviderError::ApiError {
                    status_code: 500,
                    message: "script exhausted".into(),
                });
            }
        };

        let (tx, rx) = mpsc::channel(64);
        match step {
            Step::Chunks(chunks) => {
                for chunk in chunks {
                    let _ = tx.send(Ok(chunk)).await;
                }
            }
            Step::ChunksThenError(chunks, error) => {
                for chunk in chunks {
                    let _ = tx.send(Ok(chunk)).await;
                }
                let _ = tx.send(Err(error)).await;
            }
            Step::Hold(chunks) => {
                for chunk in chunks {
                    let _ = tx.send(Ok(chunk)).await;
                }
                self.held.lock().unwrap().push(tx);
            }
            Step::Stall => self.held.lock().unwrap().push(tx),
            Step::Fail(error) => return Err(error),
        }
        Ok(rx)
    }
}

// ── Fragment and response builders ───────────────────────────────────────

pub fn text(content: &str) -> StreamChunk {
    StreamChunk::text(content)
}

/// A complete tool call in one fragment.
pub fn call(index: u32, id: &str, name: &str, arguments: &str) -> StreamChunk {
    StreamChunk {
        tool_calls: vec![ToolCallDelta {
            index,
            id: Some(id.into()),
            kind: Some("function".into()),
            name: Some(name.into()),
            arguments: Some(arguments.into()),
        }],
        ..StreamChunk::default()
    }
}

pub fn call_fragment(index: u32, arguments: &str) -> StreamChunk {
    StreamChunk {
        tool_calls: vec![ToolCallDelta {
            index,
            arguments: Some(arguments.into()),
            ..ToolCallDelta::default()
        }],
        ..StreamChunk::default()
    }
}

pub fn citation(url: &str) -> StreamChunk {
    StreamChunk {
        citations: vec![Citation {
            url: url.into(),
            title: None,
        }],
        ..StreamChunk::default()
    }
}

pub fn usage() -> StreamChunk {
    StreamChunk {
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        ..StreamChunk::default()
    }
}

pub fn response(content: &str) -> ProviderResponse {
    ProviderResponse {
        content: content.into(),
        reasoning: None,
        citations: vec![],
        tool_calls: vec![],
        usage: None,
        model: "test-model".into(),
    }
}

// ── Test doubles for tool backends ───────────────────────────────────────

/// Counts skill lookups so tests can prove a call never reached the store.
#[derive(Default)]
pub struct CountingSkills {
    pub lookups: AtomicUsize,
}

#[async_trait]
impl SkillStore for CountingSkills {
    async fn list(&self) -> Vec<Skill> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        vec![Skill::parse(
            "daily-review",
            "---\nname: Daily review\ndescription: Review today's notes\n---\nOpen today's note.",
        )]
    }
}

/// An external server whose only tool blocks until cancelled.
#[derive(Default)]
pub struct HangingServer {
    pub started: Notify,
    pub saw_cancel: AtomicBool,
}

#[async_trait]
impl ToolServer for HangingServer {
    fn name(&self) -> &str {
        "ext"
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        Ok(vec![ToolDescriptor {
            name: "wait".into(),
            description: "Blocks until cancelled".into(),
            input_schema: serde_json::json!({"type": "object"}),
        }])
    }

    async fn call_tool(
        &self,
        _tool: &str,
        _arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<String, ToolError> {
        self.started.notify_one();
        cancel.cancelled().await;
        self.saw_cancel.store(true, Ordering::SeqCst);
        Err(ToolError::Aborted)
    }
}

/// Register `server` as `ext`, with `wait` opted into auto-execution.
pub fn add_hanging_server(gateway: &ToolGateway, server: Arc<HangingServer>) {
    let mut config = ToolServerConfig::new("ext", "unused");
    config.tools.insert(
        "wait".into(),
        ToolToggle {
            enabled: true,
            auto_execute: true,
        },
    );
    gateway.add_server(config, server).unwrap();
}

// ── Harness ──────────────────────────────────────────────────────────────

pub fn settings() -> GeneratorSettings {
    GeneratorSettings {
        model: "test-model".into(),
        temperature: 0.0,
        max_tokens: None,
        stream: true,
        first_chunk_timeout: Duration::from_secs(5),
        context_window_tokens: 32_000,
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub provider: Arc<ScriptedProvider>,
    pub service: AgentService,
    pub conversation: ConversationId,
    snapshots: Arc<Mutex<Vec<Transcript>>>,
    _subscription: Subscription,
}

impl Harness {
    pub fn new(provider: ScriptedProvider) -> Self {
        Self::build(provider, Arc::new(StaticSkillStore::default()), settings())
    }

    pub fn build(
        provider: ScriptedProvider,
        skills: Arc<dyn SkillStore>,
        settings: GeneratorSettings,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("notes")).unwrap();
        std::fs::write(dir.path().join("notes/a.md"), "# A\nalpha").unwrap();
        std::fs::write(dir.path().join("notes/b.md"), "# B\nbeta").unwrap();

        let vault = Arc::new(FsVault::new(dir.path(), vec![".obsidian".into()], 1024 * 1024));
        let gateway = ToolGateway::new(local_registry(vault, skills), BuiltinToolsConfig::default());

        let provider = Arc::new(provider);
        let service = AgentService::new(
            Arc::clone(&provider) as Arc<dyn Provider>,
            Arc::new(gateway),
            Arc::new(DefaultPromptBuilder::default()),
            settings,
        );

        let conversation = ConversationId::from("test-conversation");
        let snapshots = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&snapshots);
        let subscription = service.subscribe(
            &conversation,
            move |t: &Transcript| sink.lock().unwrap().push(Arc::clone(t)),
            false,
        );

        Self {
            dir,
            provider,
            service,
            conversation,
            snapshots,
            _subscription: subscription,
        }
    }

    pub fn snapshots(&self) -> Vec<Transcript> {
        self.snapshots.lock().unwrap().clone()
    }

    pub fn transcript(&self) -> Vec<Message> {
        self.service.transcript(&self.conversation)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.dir.path().join(path).exists()
    }
}

// ── Transcript inspection ────────────────────────────────────────────────

pub fn assistants(transcript: &[Message]) -> Vec<&AssistantMessage> {
    transcript.iter().filter_map(Message::as_assistant).collect()
}

pub fn tool_messages(transcript: &[Message]) -> Vec<&ToolMessage> {
    transcript.iter().filter_map(Message::as_tool).collect()
}

pub fn find_call<'a>(transcript: &'a [Message], call_id: &str) -> &'a ToolCallRecord {
    tool_messages(transcript)
        .into_iter()
        .flat_map(|m| m.calls.iter())
        .find(|c| c.request.id == call_id)
        .unwrap_or_else(|| panic!("no tool call {call_id} in transcript"))
}

pub fn request(id: &str, name: &str, arguments: serde_json::Value) -> ToolCallRequest {
    ToolCallRequest {
        id: id.into(),
        name: name.into(),
        arguments: ToolArguments::Structured(arguments),
    }
}
