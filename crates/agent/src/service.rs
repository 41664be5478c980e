//! The surface the host application talks to.
//!
//! [`AgentService`] owns every conversation's transcript and allowance set,
//! serializes runs per conversation, and exposes the approval workflow for
//! calls that were left `pending_approval`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::Utc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use vaultpilot_config::AppConfig;
use vaultpilot_core::agent::LoopConfig;
use vaultpilot_core::error::{Error, Result};
use vaultpilot_core::event::{DomainEvent, EventBus};
use vaultpilot_core::message::{
    Attachment, ConversationId, Message, ToolCallRequest, ToolCallStatus,
};
use vaultpilot_core::prompt::PromptBuilder;
use vaultpilot_core::provider::Provider;
use vaultpilot_security::{AllowanceSet, allowance_key};
use vaultpilot_tools::ToolGateway;

use crate::controller::AgentLoopController;
use crate::generator::{GeneratorSettings, ResponseGenerator, RunReport, RunScope};
use crate::hub::{Subscription, Transcript, TranscriptHub};
use crate::progress::AgentProgress;
use crate::prompt::DefaultPromptBuilder;

const SUPERSEDED: &str = "Superseded by a new user message.";
const DECLINED: &str = "The user declined this tool call.";

/// What the caller hands to one run.
#[derive(Debug, Clone, Default)]
pub struct RunInput {
    /// A new user turn. `None` continues the conversation as it stands,
    /// e.g. after resolving pending approvals.
    pub message: Option<String>,
    pub attachments: Vec<Attachment>,
    pub allowed_skills: Vec<String>,
    pub current_file: Option<String>,
}

impl RunInput {
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            message: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn resume() -> Self {
        Self::default()
    }
}

#[derive(Default)]
struct ConversationState {
    transcript: Vec<Message>,
    allowances: AllowanceSet,
}

impl ConversationState {
    /// Position of a call as (message index, call index).
    fn locate(&self, call_id: &str) -> Option<(usize, usize)> {
        self.transcript.iter().enumerate().rev().find_map(|(i, m)| {
            let tool = m.as_tool()?;
            let j = tool.calls.iter().position(|c| c.request.id == call_id)?;
            Some((i, j))
        })
    }

    fn pending_call(&self, call_id: &str) -> Result<(usize, usize)> {
        let (i, j) = self
            .locate(call_id)
            .ok_or_else(|| Error::Internal(format!("unknown tool call '{call_id}'")))?;
        let status = self.transcript[i].as_tool().map(|m| m.calls[j].status());
        if status != Some(ToolCallStatus::PendingApproval) {
            return Err(Error::Internal(format!(
                "tool call '{call_id}' is not awaiting approval"
            )));
        }
        Ok((i, j))
    }

    fn request(&self, (i, j): (usize, usize)) -> Option<ToolCallRequest> {
        self.transcript[i].as_tool().map(|m| m.calls[j].request.clone())
    }

    fn pending_count(&self) -> usize {
        self.transcript
            .iter()
            .filter_map(Message::as_tool)
            .flat_map(|m| m.calls.iter())
            .filter(|c| c.status() == ToolCallStatus::PendingApproval)
            .count()
    }

    fn reject_pending(&mut self, reason: &str) -> usize {
        let mut rejected = 0;
        for call in self
            .transcript
            .iter_mut()
            .filter_map(Message::as_tool_mut)
            .flat_map(|m| m.calls.iter_mut())
        {
            if call.reject(reason) {
                rejected += 1;
            }
        }
        rejected
    }
}

struct Conversation {
    state: tokio::sync::Mutex<ConversationState>,
    controller: AgentLoopController,
}

pub struct AgentService {
    generator: Arc<ResponseGenerator>,
    conversations: Mutex<HashMap<ConversationId, Arc<Conversation>>>,
}

impl AgentService {
    pub fn new(
        provider: Arc<dyn Provider>,
        gateway: Arc<ToolGateway>,
        prompt_builder: Arc<dyn PromptBuilder>,
        settings: GeneratorSettings,
    ) -> Self {
        let generator = ResponseGenerator::new(
            provider,
            gateway,
            prompt_builder,
            TranscriptHub::new(),
            Arc::new(EventBus::default()),
            settings,
        );
        Self {
            generator: Arc::new(generator),
            conversations: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        gateway: Arc<ToolGateway>,
    ) -> Self {
        Self::new(
            provider,
            gateway,
            Arc::new(DefaultPromptBuilder::new(config.agent.system_prompt.clone())),
            GeneratorSettings::from_config(config),
        )
    }

    pub fn gateway(&self) -> &Arc<ToolGateway> {
        self.generator.gateway()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        self.generator.events()
    }

    fn conversation(&self, id: &ConversationId) -> Arc<Conversation> {
        let mut conversations = self
            .conversations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = conversations.entry(id.clone()).or_insert_with(|| {
            debug!(conversation_id = %id, "New conversation");
            Arc::new(Conversation {
                state: tokio::sync::Mutex::new(ConversationState::default()),
                controller: AgentLoopController::new(Arc::clone(&self.generator)),
            })
        });
        Arc::clone(entry)
    }

    fn existing(&self, id: &ConversationId) -> Result<Arc<Conversation>> {
        self.conversations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("unknown conversation '{id}'")))
    }

    /// Run the agent loop for one conversation.
    ///
    /// Runs on the same conversation are serialized. A new user message
    /// rejects any calls still awaiting approval from the previous turn.
    pub async fn run(
        &self,
        conversation_id: &ConversationId,
        loop_config: &LoopConfig,
        input: RunInput,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let conversation = self.conversation(conversation_id);
        let mut guard = conversation.state.lock().await;
        let state = &mut *guard;

        if let Some(text) = input.message {
            let superseded = state.reject_pending(SUPERSEDED);
            if superseded > 0 {
                info!(conversation_id = %conversation_id, superseded, "Rejected stale approvals");
            }
            state
                .transcript
                .push(Message::user_with_attachments(text, input.attachments));
            self.generator.publish(conversation_id, &state.transcript);
        } else {
            let pending = state.pending_count();
            if pending > 0 {
                return Err(Error::Internal(format!(
                    "{pending} tool call(s) still await approval"
                )));
            }
        }
        if !state.transcript.iter().any(|m| matches!(m, Message::User(_))) {
            return Err(Error::Internal("conversation has no user message".into()));
        }

        let scope = RunScope {
            conversation_id,
            loop_config,
            allowances: &state.allowances,
            allowed_skills: &input.allowed_skills,
            current_file: input.current_file.as_deref(),
        };
        conversation
            .controller
            .run(&scope, &mut state.transcript, cancel)
            .await
    }

    /// Deliver transcript snapshots for one conversation until the returned
    /// handle is dropped or unsubscribed.
    pub fn subscribe<F>(
        &self,
        conversation_id: &ConversationId,
        callback: F,
        emit_current: bool,
    ) -> Subscription
    where
        F: Fn(&Transcript) + Send + Sync + 'static,
    {
        self.generator
            .hub()
            .subscribe(conversation_id, callback, emit_current)
    }

    /// The latest published transcript.
    pub fn transcript(&self, conversation_id: &ConversationId) -> Vec<Message> {
        self.generator
            .hub()
            .latest(conversation_id)
            .map(|t| t.to_vec())
            .unwrap_or_default()
    }

    pub fn progress(&self, conversation_id: &ConversationId) -> watch::Receiver<AgentProgress> {
        self.conversation(conversation_id)
            .controller
            .progress()
            .subscribe()
    }

    /// Stop the conversation's run in progress.
    pub fn cancel_run(&self, conversation_id: &ConversationId) -> bool {
        self.existing(conversation_id)
            .map(|c| c.controller.stop())
            .unwrap_or(false)
    }

    /// Cancel one in-flight tool call by id.
    pub fn abort_tool_call(&self, call_id: &str) -> bool {
        self.gateway().abort_tool_call(call_id)
    }

    /// Execute a call that is awaiting approval and record its outcome.
    ///
    /// With `remember`, the call's allowance key is granted for the rest of
    /// the conversation.
    pub async fn approve_tool_call(
        &self,
        conversation_id: &ConversationId,
        call_id: &str,
        remember: bool,
    ) -> Result<ToolCallStatus> {
        let conversation = self.existing(conversation_id)?;
        let mut guard = conversation.state.lock().await;
        let state = &mut *guard;

        let position = state.pending_call(call_id)?;
        let Some(request) = state.request(position) else {
            return Err(Error::Internal(format!("unknown tool call '{call_id}'")));
        };
        if remember {
            let key = allowance_key(&request);
            info!(conversation_id = %conversation_id, key = %key, "Allowance granted");
            state.allowances.grant(key);
        }

        let (i, j) = position;
        if let Some(tool) = state.transcript[i].as_tool_mut() {
            tool.calls[j].start();
        }
        self.generator.publish(conversation_id, &state.transcript);

        let started = Instant::now();
        let outcome = self
            .gateway()
            .call_tool(&request.name, &request.arguments, &request.id, &CancellationToken::new())
            .await;

        let status = match state.transcript[i].as_tool_mut() {
            Some(tool) => {
                tool.calls[j].resolve(outcome);
                tool.calls[j].status()
            }
            None => ToolCallStatus::Error,
        };
        self.generator.publish(conversation_id, &state.transcript);
        self.events().publish(DomainEvent::ToolExecuted {
            conversation_id: conversation_id.to_string(),
            tool_name: request.name,
            status: status.as_str().into(),
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });
        Ok(status)
    }

    /// Resolve a pending call as `rejected`.
    pub async fn reject_tool_call(
        &self,
        conversation_id: &ConversationId,
        call_id: &str,
    ) -> Result<()> {
        let conversation = self.existing(conversation_id)?;
        let mut guard = conversation.state.lock().await;
        let (i, j) = guard.pending_call(call_id)?;
        if let Some(tool) = guard.transcript[i].as_tool_mut() {
            tool.calls[j].reject(DECLINED);
        }
        info!(conversation_id = %conversation_id, call_id, "Tool call rejected");
        self.generator.publish(conversation_id, &guard.transcript);
        Ok(())
    }

    /// Describe what a pending mutating call would do, without doing it.
    pub async fn preview_tool_call(
        &self,
        conversation_id: &ConversationId,
        call_id: &str,
    ) -> Result<String> {
        let conversation = self.existing(conversation_id)?;
        let request = {
            let guard = conversation.state.lock().await;
            let position = guard.pending_call(call_id)?;
            guard.request(position)
        };
        let Some(request) = request else {
            return Err(Error::Internal(format!("unknown tool call '{call_id}'")));
        };
        Ok(self
            .gateway()
            .preview(&request.name, &request.arguments, &request.id)
            .await?)
    }
}
