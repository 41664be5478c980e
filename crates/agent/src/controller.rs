//! The agent loop controller.
//!
//! Wraps one conversation's runs: links the caller's cancellation token
//! with one it owns, keeps the progress notifier in step with the
//! transcript, and tears both down however the run ends.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vaultpilot_core::cancel::LinkedToken;
use vaultpilot_core::error::Result;
use vaultpilot_core::event::DomainEvent;
use vaultpilot_core::message::Message;

use crate::generator::{ResponseGenerator, RunReport, RunScope};
use crate::progress::ProgressNotifier;

pub struct AgentLoopController {
    generator: Arc<ResponseGenerator>,
    progress: ProgressNotifier,
    owned: Mutex<Option<CancellationToken>>,
}

impl AgentLoopController {
    pub fn new(generator: Arc<ResponseGenerator>) -> Self {
        Self {
            generator,
            progress: ProgressNotifier::new(),
            owned: Mutex::new(None),
        }
    }

    pub fn progress(&self) -> &ProgressNotifier {
        &self.progress
    }

    /// Cancel the run in progress, if any.
    pub fn stop(&self) -> bool {
        let owned = self.owned.lock().unwrap_or_else(PoisonError::into_inner);
        match owned.as_ref() {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    pub async fn run(
        &self,
        scope: &RunScope<'_>,
        transcript: &mut Vec<Message>,
        external: &CancellationToken,
    ) -> Result<RunReport> {
        let id = scope.conversation_id;
        let (linked, owned) = LinkedToken::with_owned(external);
        *self.owned.lock().unwrap_or_else(PoisonError::into_inner) = Some(owned);

        let guard = self.progress.start();
        let tracker = self.progress.clone();
        let subscription = self
            .generator
            .hub()
            .subscribe(id, move |snapshot| tracker.observe(snapshot), false);

        let result = self
            .generator
            .run(scope, transcript, linked.token(), &self.progress)
            .await;

        subscription.unsubscribe();
        self.owned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.progress.observe(transcript);

        match &result {
            Ok(report) => {
                guard.finish(report.reason);
                self.generator.events().publish(DomainEvent::RunFinished {
                    conversation_id: id.to_string(),
                    reason: report.reason,
                    iterations: report.iterations,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                warn!(conversation_id = %id, error = %e, "Run failed");
                drop(guard);
            }
        }
        if linked.is_cancelled() {
            info!(conversation_id = %id, "Run was cancelled");
        }
        result
    }
}
