//! `vaultpilot chat`: single-message or interactive chat against the vault.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use vaultpilot_agent::{AgentService, RunInput, Transcript};
use vaultpilot_core::CancellationToken;
use vaultpilot_core::agent::LoopConfig;
use vaultpilot_core::message::{
    ConversationId, GenerationState, Message, ToolCallRequest, ToolCallStatus,
};
use vaultpilot_core::provider::Provider;
use vaultpilot_providers::OpenAiCompatProvider;

use super::{build_gateway, load_config};

#[derive(Args, Debug)]
pub struct ChatArgs {
    /// Send a single message instead of entering interactive mode
    #[arg(short, long)]
    pub message: Option<String>,

    /// Conversation id (defaults to a fresh one)
    #[arg(long)]
    pub conversation: Option<String>,

    /// Skill the model may open; repeat for several
    #[arg(long = "skill", value_name = "SKILL")]
    pub skills: Vec<String>,

    /// Vault-relative path of the note being edited
    #[arg(long)]
    pub file: Option<String>,

    /// Do not offer tools to the model
    #[arg(long)]
    pub no_tools: bool,

    /// Override the per-run model request limit
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Approve every tool call without asking
    #[arg(short, long)]
    pub yes: bool,
}

pub async fn run(args: ChatArgs, vault: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(vault)?;
    if !config.has_api_key() && !config.provider.api_url.contains("localhost") {
        anyhow::bail!(
            "no API key configured; set VAULTPILOT_API_KEY or provider.api_key in {}",
            vaultpilot_config::AppConfig::config_dir().join("config.toml").display()
        );
    }

    let provider: Arc<dyn Provider> = Arc::new(
        OpenAiCompatProvider::from_config(&config.provider).context("failed to create provider")?,
    );
    let gateway = build_gateway(&config).await;
    let service = AgentService::from_config(&config, provider, gateway);

    let mut loop_config = config.agent.loop_config();
    if args.no_tools {
        loop_config.enable_tools = false;
    }
    if let Some(max) = args.max_iterations {
        loop_config.max_auto_iterations = max.max(1);
    }

    let conversation = args
        .conversation
        .as_deref()
        .map(ConversationId::from)
        .unwrap_or_default();
    let printer = Arc::new(Printer::default());
    let sink = Arc::clone(&printer);
    let _subscription = service.subscribe(
        &conversation,
        move |transcript: &Transcript| sink.render(transcript),
        false,
    );

    let mut session = Session {
        service: &service,
        conversation,
        loop_config,
        args: &args,
        stdin: BufReader::new(tokio::io::stdin()).lines(),
    };

    if let Some(message) = args.message.clone() {
        return session.turn(message).await;
    }

    println!("VaultPilot ({}, vault {})", config.provider.model, config.vault.root.display());
    println!("Type a message and press Enter. Ctrl+C stops a reply, 'exit' quits.");
    loop {
        print!("\n> ");
        std::io::stdout().flush()?;
        let Some(line) = session.stdin.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }
        if let Err(e) = session.turn(line.to_string()).await {
            eprintln!("error: {e:#}");
        }
    }
    Ok(())
}

struct Session<'a> {
    service: &'a AgentService,
    conversation: ConversationId,
    loop_config: LoopConfig,
    args: &'a ChatArgs,
    stdin: Lines<BufReader<Stdin>>,
}

impl Session<'_> {
    /// Send one user message, then keep resolving approvals and resuming
    /// until the model no longer waits on the user.
    async fn turn(&mut self, message: String) -> anyhow::Result<()> {
        let mut input = RunInput {
            message: Some(message),
            allowed_skills: self.args.skills.clone(),
            current_file: self.args.file.clone(),
            ..RunInput::default()
        };
        loop {
            let cancel = CancellationToken::new();
            let watcher = tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        cancel.cancel();
                    }
                }
            });
            let report = self
                .service
                .run(&self.conversation, &self.loop_config, input, &cancel)
                .await;
            watcher.abort();
            let report = report?;
            println!();
            tracing::debug!(reason = %report.reason, iterations = report.iterations, "Run finished");

            let pending = pending_calls(&self.service.transcript(&self.conversation));
            if pending.is_empty() {
                println!("[{}]", report.reason);
                return Ok(());
            }
            for call in pending {
                self.resolve(&call).await?;
            }
            input = RunInput {
                allowed_skills: self.args.skills.clone(),
                current_file: self.args.file.clone(),
                ..RunInput::resume()
            };
        }
    }

    async fn resolve(&mut self, call: &ToolCallRequest) -> anyhow::Result<()> {
        let choice = if self.args.yes {
            Choice::Once
        } else {
            println!("\nThe assistant wants to run {} {}", call.name, call.arguments.as_text());
            if let Ok(preview) = self
                .service
                .preview_tool_call(&self.conversation, &call.id)
                .await
            {
                println!("  {preview}");
            }
            self.ask().await?
        };

        match choice {
            Choice::Once | Choice::Always => {
                let remember = matches!(choice, Choice::Always);
                let status = self
                    .service
                    .approve_tool_call(&self.conversation, &call.id, remember)
                    .await?;
                tracing::debug!(call_id = %call.id, status = status.as_str(), "Approved call finished");
            }
            Choice::Decline => {
                self.service
                    .reject_tool_call(&self.conversation, &call.id)
                    .await?;
            }
        }
        Ok(())
    }

    async fn ask(&mut self) -> anyhow::Result<Choice> {
        loop {
            print!("Allow? [y]es / [n]o / [a]lways for this kind of call: ");
            std::io::stdout().flush()?;
            let Some(answer) = self.stdin.next_line().await? else {
                return Ok(Choice::Decline);
            };
            if let Some(choice) = Choice::parse(&answer) {
                return Ok(choice);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Choice {
    Once,
    Always,
    Decline,
}

impl Choice {
    fn parse(answer: &str) -> Option<Self> {
        match answer.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => Some(Self::Once),
            "a" | "always" => Some(Self::Always),
            "n" | "no" => Some(Self::Decline),
            _ => None,
        }
    }
}

fn pending_calls(transcript: &[Message]) -> Vec<ToolCallRequest> {
    transcript
        .iter()
        .filter_map(Message::as_tool)
        .flat_map(|m| m.calls.iter())
        .filter(|c| c.status() == ToolCallStatus::PendingApproval)
        .map(|c| c.request.clone())
        .collect()
}

/// Writes transcript snapshots to stdout incrementally.
#[derive(Default)]
struct Printer {
    state: Mutex<PrintState>,
}

#[derive(Default)]
struct PrintState {
    /// Assistant text already written, by message id
    text: HashMap<String, String>,
    /// Last status reported, by call id
    calls: HashMap<String, ToolCallStatus>,
}

impl Printer {
    fn render(&self, transcript: &Transcript) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = String::new();
        for message in transcript.iter() {
            match message {
                Message::Assistant(reply) => {
                    let written = state.text.entry(reply.id.clone()).or_default();
                    out.push_str(&delta(written, &reply.content));
                    if reply.state == GenerationState::Aborted && !written.ends_with(" [stopped]") {
                        written.push_str(" [stopped]");
                        out.push_str(" [stopped]");
                    }
                }
                Message::Tool(tool) => {
                    for call in &tool.calls {
                        let status = call.status();
                        if state.calls.insert(call.request.id.clone(), status) != Some(status) {
                            out.push_str(&format!("\n  [{}] {}", call.request.name, status.as_str()));
                        }
                    }
                }
                Message::User(_) => {}
            }
        }
        if !out.is_empty() {
            print!("{out}");
            let _ = std::io::stdout().flush();
        }
    }
}

/// The part of `content` not yet written. A reply that was reset and
/// regenerated is written again in full on a new line.
fn delta(written: &mut String, content: &str) -> String {
    if let Some(rest) = content.strip_prefix(written.as_str()) {
        let rest = rest.to_string();
        written.push_str(&rest);
        rest
    } else {
        *written = content.to_string();
        format!("\n{content}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_writes_only_new_text() {
        let mut written = String::new();
        assert_eq!(delta(&mut written, "Hel"), "Hel");
        assert_eq!(delta(&mut written, "Hello"), "lo");
        assert_eq!(delta(&mut written, "Hello"), "");
    }

    #[test]
    fn regenerated_reply_is_rewritten() {
        let mut written = "partial".to_string();
        assert_eq!(delta(&mut written, "Fresh answer"), "\nFresh answer");
        assert_eq!(written, "Fresh answer");
    }

    #[test]
    fn approval_answers() {
        assert_eq!(Choice::parse("Y"), Some(Choice::Once));
        assert_eq!(Choice::parse(" always "), Some(Choice::Always));
        assert_eq!(Choice::parse("no"), Some(Choice::Decline));
        assert_eq!(Choice::parse("maybe"), None);
    }
}
