//! The turn orchestrator.
//!
//! Each iteration builds a prompt, gets one reply from the model (streamed
//! when configured, with a non-streaming fallback), dispatches any tool
//! calls the reply carries and decides whether to go around again. Every
//! transcript mutation is published through the [`TranscriptHub`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vaultpilot_config::AppConfig;
use vaultpilot_core::agent::{LoopConfig, TerminationReason};
use vaultpilot_core::error::{ProviderError, Result};
use vaultpilot_core::event::{DomainEvent, EventBus};
use vaultpilot_core::message::{
    AssistantMessage, ConversationId, Message, ToolCallRecord, ToolCallRequest, ToolCallStatus,
    ToolMessage,
};
use vaultpilot_core::prompt::{PromptBuilder, PromptContext};
use vaultpilot_core::provider::{Provider, ProviderRequest};
use vaultpilot_core::tool::ToolDescriptor;
use vaultpilot_security::{AllowanceSet, Decision, PermissionResolver};
use vaultpilot_tools::ToolGateway;

use crate::aggregator::StreamAggregator;
use crate::hub::TranscriptHub;
use crate::progress::ProgressNotifier;

/// Model and transport settings for every request.
#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub stream: bool,
    pub first_chunk_timeout: Duration,
    pub context_window_tokens: usize,
}

impl GeneratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.provider.model.clone(),
            temperature: config.provider.temperature,
            max_tokens: Some(config.provider.max_tokens),
            stream: config.agent.stream,
            first_chunk_timeout: Duration::from_millis(config.agent.first_chunk_timeout_ms),
            context_window_tokens: config.agent.context_window_tokens,
        }
    }
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Inputs that stay fixed for the duration of one run.
#[derive(Debug, Clone, Copy)]
pub struct RunScope<'a> {
    pub conversation_id: &'a ConversationId,
    pub loop_config: &'a LoopConfig,
    pub allowances: &'a AllowanceSet,
    /// Skill ids or names `open_skill` may load during this run
    pub allowed_skills: &'a [String],
    pub current_file: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub reason: TerminationReason,
    /// Model requests made
    pub iterations: u32,
}

enum Attempt {
    Done,
    Cancelled,
    Fallback,
}

#[derive(Debug, Default)]
struct RoundSummary {
    halting: bool,
    pending: usize,
    settled: bool,
}

impl RoundSummary {
    fn of(message: &ToolMessage) -> Self {
        Self {
            halting: message.any_halting(),
            pending: message
                .calls
                .iter()
                .filter(|c| c.status() == ToolCallStatus::PendingApproval)
                .count(),
            settled: message.all_terminal(),
        }
    }
}

pub struct ResponseGenerator {
    provider: Arc<dyn Provider>,
    gateway: Arc<ToolGateway>,
    prompt_builder: Arc<dyn PromptBuilder>,
    permissions: PermissionResolver,
    hub: TranscriptHub,
    events: Arc<EventBus>,
    settings: GeneratorSettings,
}

impl ResponseGenerator {
    pub fn new(
        provider: Arc<dyn Provider>,
        gateway: Arc<ToolGateway>,
        prompt_builder: Arc<dyn PromptBuilder>,
        hub: TranscriptHub,
        events: Arc<EventBus>,
        settings: GeneratorSettings,
    ) -> Self {
        Self {
            provider,
            gateway,
            prompt_builder,
            permissions: PermissionResolver::new(),
            hub,
            events,
            settings,
        }
    }

    pub fn hub(&self) -> &TranscriptHub {
        &self.hub
    }

    pub fn gateway(&self) -> &Arc<ToolGateway> {
        &self.gateway
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn settings(&self) -> &GeneratorSettings {
        &self.settings
    }

    pub(crate) fn publish(&self, id: &ConversationId, transcript: &[Message]) {
        self.hub.publish(id, Arc::new(transcript.to_vec()));
    }

    /// Drive iterations until the model stops asking for tools, a limit is
    /// hit, or the run is cancelled.
    ///
    /// Provider failures that survive the streaming fallback are returned as
    /// errors; everything else ends in a [`RunReport`].
    pub async fn run(
        &self,
        scope: &RunScope<'_>,
        transcript: &mut Vec<Message>,
        cancel: &CancellationToken,
        progress: &ProgressNotifier,
    ) -> Result<RunReport> {
        let id = scope.conversation_id;
        let config = scope.loop_config;
        let mut iterations = 0u32;
        let mut tool_rounds = 0u32;
        let mut recovery_used = false;
        let mut tools_offered = false;

        let reason = loop {
            if cancel.is_cancelled() {
                info!(conversation_id = %id, "Run cancelled, not starting another iteration");
                break TerminationReason::Aborted;
            }
            let limit = config
                .max_auto_iterations
                .saturating_add(u32::from(recovery_used));
            if iterations >= limit {
                warn!(conversation_id = %id, iterations, "Max iterations reached");
                break TerminationReason::MaxIterations;
            }

            iterations += 1;
            progress.iteration(iterations);
            debug!(conversation_id = %id, iteration = iterations, "Agent loop iteration");
            self.events.publish(DomainEvent::IterationStarted {
                conversation_id: id.to_string(),
                iteration: iterations,
                timestamp: Utc::now(),
            });

            let tools = if config.enable_tools {
                self.gateway.list_tools(config.include_builtin_tools).await
            } else {
                Vec::new()
            };
            tools_offered |= !tools.is_empty();

            let request = self.build_request(scope, transcript, &tools);
            let Some(reply) = self.generate(id, transcript, request, cancel).await? else {
                break TerminationReason::Aborted;
            };

            if reply.tool_calls.is_empty() {
                if reply.is_vacuous() && tool_rounds > 0 && !recovery_used {
                    recovery_used = true;
                    transcript.pop();
                    self.publish(id, transcript);
                    info!(conversation_id = %id, "Empty reply after a tool round, retrying once");
                    continue;
                }
                break if tools_offered {
                    TerminationReason::Completed
                } else {
                    TerminationReason::NoTools
                };
            }

            let round = self
                .dispatch(scope, transcript, &reply.tool_calls, &tools, cancel)
                .await;
            if cancel.is_cancelled() || round.halting {
                info!(conversation_id = %id, "Tool round ended aborted or rejected");
                break TerminationReason::Aborted;
            }
            if round.pending > 0 {
                info!(conversation_id = %id, pending = round.pending, "Tool calls awaiting approval");
                break TerminationReason::Completed;
            }
            if !round.settled {
                warn!(conversation_id = %id, "Tool round left unresolved calls");
                break TerminationReason::Completed;
            }
            tool_rounds += 1;
        };

        info!(conversation_id = %id, reason = %reason, iterations, "Run finished");
        Ok(RunReport { reason, iterations })
    }

    fn build_request(
        &self,
        scope: &RunScope<'_>,
        transcript: &[Message],
        tools: &[ToolDescriptor],
    ) -> ProviderRequest {
        let context = PromptContext {
            history: transcript,
            tools_available: !tools.is_empty(),
            context_window_tokens: self.settings.context_window_tokens,
            current_file: scope.current_file,
        };
        ProviderRequest {
            model: self.settings.model.clone(),
            messages: self.prompt_builder.build(&context),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            tools: tools.to_vec(),
            stream: self.settings.stream,
            stop: vec![],
        }
    }

    /// One model exchange. Appends the reply to the transcript and returns a
    /// copy, or `None` when cancelled.
    async fn generate(
        &self,
        id: &ConversationId,
        transcript: &mut Vec<Message>,
        request: ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<Option<AssistantMessage>> {
        let slot = transcript.len();
        let mut aggregator = StreamAggregator::new();
        transcript.push(Message::Assistant(aggregator.snapshot().clone()));
        self.publish(id, transcript);

        let mut attempt = if self.settings.stream {
            match self
                .stream_into(id, transcript, slot, &mut aggregator, request.clone(), cancel)
                .await
            {
                Err(e) if e.is_transient() => {
                    warn!(conversation_id = %id, error = %e, "Streaming failed, retrying without streaming");
                    Ok(Attempt::Fallback)
                }
                other => other,
            }
        } else {
            Ok(Attempt::Fallback)
        };
        let streamed = matches!(attempt, Ok(Attempt::Done));

        if matches!(attempt, Ok(Attempt::Fallback)) {
            if self.settings.stream {
                aggregator = StreamAggregator::new();
                transcript[slot] = Message::Assistant(aggregator.snapshot().clone());
                self.publish(id, transcript);
            }
            attempt = self.complete_into(&mut aggregator, request, cancel).await;
        }

        match attempt {
            Ok(Attempt::Cancelled) => {
                if let Message::Assistant(message) = &mut transcript[slot]
                    && message.mark_aborted()
                {
                    info!(conversation_id = %id, "Reply aborted");
                    self.publish(id, transcript);
                }
                return Ok(None);
            }
            Err(e) => {
                self.discard_failed(id, transcript, slot);
                return Err(e.into());
            }
            Ok(_) => {}
        }

        let mut reply = aggregator.finish();
        reply.mark_completed();
        transcript[slot] = Message::Assistant(reply.clone());
        self.publish(id, transcript);

        debug!(
            conversation_id = %id,
            streamed,
            tool_calls = reply.tool_calls.len(),
            "Reply completed"
        );
        self.events.publish(DomainEvent::ResponseGenerated {
            conversation_id: id.to_string(),
            model: self.settings.model.clone(),
            tokens_used: reply.usage.map_or(0, |u| u.total_tokens),
            streamed,
            timestamp: Utc::now(),
        });
        Ok(Some(reply))
    }

    async fn stream_into(
        &self,
        id: &ConversationId,
        transcript: &mut Vec<Message>,
        slot: usize,
        aggregator: &mut StreamAggregator,
        request: ProviderRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<Attempt, ProviderError> {
        let opening = async {
            let mut rx = self.provider.stream(request).await?;
            let item = rx.recv().await;
            Ok::<_, ProviderError>((rx, item))
        };
        let (mut rx, mut next) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Attempt::Cancelled),
            first = tokio::time::timeout(self.settings.first_chunk_timeout, opening) => match first {
                Ok(result) => result?,
                Err(_) => {
                    warn!(
                        conversation_id = %id,
                        timeout_ms = self.settings.first_chunk_timeout.as_millis() as u64,
                        "No fragment before the first-chunk timeout, retrying without streaming"
                    );
                    return Ok(Attempt::Fallback);
                }
            },
        };

        loop {
            match next {
                None => return Ok(Attempt::Done),
                Some(Err(e)) => return Err(e),
                Some(Ok(chunk)) => {
                    aggregator.apply(chunk);
                    transcript[slot] = Message::Assistant(aggregator.snapshot().clone());
                    self.publish(id, transcript);
                }
            }
            next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Attempt::Cancelled),
                item = rx.recv() => item,
            };
        }
    }

    async fn complete_into(
        &self,
        aggregator: &mut StreamAggregator,
        mut request: ProviderRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<Attempt, ProviderError> {
        request.stream = false;
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Attempt::Cancelled),
            response = self.provider.complete(request) => response?,
        };
        *aggregator = StreamAggregator::from_response(response);
        Ok(Attempt::Done)
    }

    fn discard_failed(&self, id: &ConversationId, transcript: &mut Vec<Message>, slot: usize) {
        let vacuous = match &mut transcript[slot] {
            Message::Assistant(message) if message.is_vacuous() => true,
            Message::Assistant(message) => {
                message.mark_aborted();
                false
            }
            _ => false,
        };
        if vacuous {
            transcript.remove(slot);
        }
        self.publish(id, transcript);
    }

    fn seed(
        &self,
        scope: &RunScope<'_>,
        request: ToolCallRequest,
        offered: &HashSet<&str>,
    ) -> ToolCallRecord {
        if !offered.contains(request.name.as_str()) {
            let reason = format!("Tool '{}' is not available", request.name);
            return ToolCallRecord::failed(request, reason);
        }
        match self.permissions.decide(
            &request,
            scope.allowances,
            scope.allowed_skills,
            &*self.gateway,
        ) {
            Decision::Execute => ToolCallRecord::new(request, ToolCallStatus::Running),
            Decision::RequireApproval => {
                ToolCallRecord::new(request, ToolCallStatus::PendingApproval)
            }
            Decision::Deny(reason) => ToolCallRecord::failed(request, reason),
        }
    }

    /// Seed, publish and execute one round of tool calls. Runnable calls
    /// execute concurrently; each result is written back in place.
    async fn dispatch(
        &self,
        scope: &RunScope<'_>,
        transcript: &mut Vec<Message>,
        calls: &[ToolCallRequest],
        tools: &[ToolDescriptor],
        cancel: &CancellationToken,
    ) -> RoundSummary {
        let id = scope.conversation_id;
        let offered: HashSet<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        let records: Vec<ToolCallRecord> = calls
            .iter()
            .cloned()
            .map(|request| self.seed(scope, request, &offered))
            .collect();
        let runnable: Vec<(usize, ToolCallRequest)> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.status() == ToolCallStatus::Running)
            .map(|(position, r)| (position, r.request.clone()))
            .collect();

        let index = transcript.len();
        transcript.push(Message::Tool(ToolMessage::new(records)));
        self.publish(id, transcript);
        debug!(
            conversation_id = %id,
            calls = calls.len(),
            running = runnable.len(),
            "Dispatching tool calls"
        );

        let mut in_flight: FuturesUnordered<_> = runnable
            .iter()
            .map(|(position, request)| async move {
                let started = Instant::now();
                let outcome = self
                    .gateway
                    .call_tool(&request.name, &request.arguments, &request.id, cancel)
                    .await;
                (*position, request, outcome, started.elapsed())
            })
            .collect();

        // Results are written back by position; ids are not trusted to be unique.
        while let Some((position, request, outcome, elapsed)) = in_flight.next().await {
            let Some(call) = transcript[index]
                .as_tool_mut()
                .and_then(|m| m.calls.get_mut(position))
            else {
                continue;
            };
            if !call.resolve(outcome) {
                continue;
            }
            let status = call.status();
            self.publish(id, transcript);
            self.events.publish(DomainEvent::ToolExecuted {
                conversation_id: id.to_string(),
                tool_name: request.name.clone(),
                status: status.as_str().into(),
                duration_ms: elapsed.as_millis() as u64,
                timestamp: Utc::now(),
            });
        }

        transcript[index]
            .as_tool()
            .map(RoundSummary::of)
            .unwrap_or_default()
    }
}
