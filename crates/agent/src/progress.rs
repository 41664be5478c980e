//! Lightweight run progress, published over a `watch` channel.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use vaultpilot_core::agent::TerminationReason;
use vaultpilot_core::message::{Message, ToolCallStatus};

/// Snapshot of what a conversation's run is doing right now.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AgentProgress {
    pub active: bool,

    /// Model requests made so far in the current run
    pub iteration: u32,

    /// A tool call is executing
    pub tool_phase: bool,

    pub pending_approvals: usize,

    /// Set when the last run finished normally
    pub termination: Option<TerminationReason>,
}

/// Publishes [`AgentProgress`] for one conversation.
#[derive(Debug, Clone)]
pub struct ProgressNotifier {
    tx: Arc<watch::Sender<AgentProgress>>,
}

impl ProgressNotifier {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(AgentProgress::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<AgentProgress> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> AgentProgress {
        self.tx.borrow().clone()
    }

    /// Mark a run as started. The returned guard deactivates progress when dropped.
    pub fn start(&self) -> ProgressGuard {
        self.tx.send_modify(|p| {
            *p = AgentProgress {
                active: true,
                pending_approvals: p.pending_approvals,
                ..AgentProgress::default()
            }
        });
        ProgressGuard {
            notifier: self.clone(),
            done: false,
        }
    }

    pub fn iteration(&self, iteration: u32) {
        self.tx.send_if_modified(|p| {
            let changed = p.iteration != iteration;
            p.iteration = iteration;
            changed
        });
    }

    /// Derive the tool-phase signal and approval count from a transcript.
    pub fn observe(&self, transcript: &[Message]) {
        let calls = transcript
            .iter()
            .filter_map(Message::as_tool)
            .flat_map(|m| m.calls.iter());
        let (mut running, mut pending) = (false, 0);
        for call in calls {
            match call.status() {
                ToolCallStatus::Running => running = true,
                ToolCallStatus::PendingApproval => pending += 1,
                _ => {}
            }
        }
        self.tx.send_if_modified(|p| {
            let changed = p.tool_phase != running || p.pending_approvals != pending;
            p.tool_phase = running;
            p.pending_approvals = pending;
            changed
        });
    }
}

impl Default for ProgressNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a run marked active. Dropping it without [`finish`](Self::finish)
/// deactivates progress with no termination reason.
#[derive(Debug)]
pub struct ProgressGuard {
    notifier: ProgressNotifier,
    done: bool,
}

impl ProgressGuard {
    pub fn finish(mut self, reason: TerminationReason) {
        self.close(Some(reason));
    }

    fn close(&mut self, reason: Option<TerminationReason>) {
        if self.done {
            return;
        }
        self.done = true;
        self.notifier.tx.send_modify(|p| {
            p.active = false;
            p.tool_phase = false;
            p.termination = reason;
        });
    }
}

impl Drop for ProgressGuard {
    fn drop(&mut self) {
        self.close(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultpilot_core::message::{ToolCallRecord, ToolCallRequest, ToolMessage};
    use vaultpilot_core::tool::ToolArguments;

    fn record(id: &str, status: ToolCallStatus) -> ToolCallRecord {
        ToolCallRecord::new(
            ToolCallRequest {
                id: id.into(),
                name: "fs_write".into(),
                arguments: ToolArguments::default(),
            },
            status,
        )
    }

    #[test]
    fn start_iterate_finish() {
        let notifier = ProgressNotifier::new();
        let rx = notifier.subscribe();

        let guard = notifier.start();
        notifier.iteration(2);
        assert!(rx.borrow().active);
        assert_eq!(rx.borrow().iteration, 2);

        guard.finish(TerminationReason::MaxIterations);
        let progress = rx.borrow().clone();
        assert!(!progress.active);
        assert_eq!(progress.termination, Some(TerminationReason::MaxIterations));
    }

    #[test]
    fn dropped_guard_deactivates() {
        let notifier = ProgressNotifier::new();
        {
            let _guard = notifier.start();
            assert!(notifier.current().active);
        }
        let progress = notifier.current();
        assert!(!progress.active);
        assert_eq!(progress.termination, None);
    }

    #[test]
    fn observes_tool_phase_and_approvals() {
        let notifier = ProgressNotifier::new();
        let transcript = vec![
            Message::user("go"),
            Message::Tool(ToolMessage::new(vec![
                record("a", ToolCallStatus::Running),
                record("b", ToolCallStatus::PendingApproval),
                record("c", ToolCallStatus::PendingApproval),
            ])),
        ];
        notifier.observe(&transcript);
        let progress = notifier.current();
        assert!(progress.tool_phase);
        assert_eq!(progress.pending_approvals, 2);

        notifier.observe(&transcript[..1]);
        assert!(!notifier.current().tool_phase);
    }
}
