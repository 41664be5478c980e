//! Transcript publication.
//!
//! The orchestrator publishes an immutable snapshot of a conversation's
//! transcript after every change. Subscribers are plain callbacks keyed by
//! conversation; dropping the returned [`Subscription`] unsubscribes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use vaultpilot_core::message::{ConversationId, Message};

/// An immutable transcript snapshot.
pub type Transcript = Arc<Vec<Message>>;

type Callback = Arc<dyn Fn(&Transcript) + Send + Sync>;

#[derive(Default)]
struct Channel {
    latest: Option<Transcript>,
    subscribers: Vec<(u64, Callback)>,
}

#[derive(Default)]
struct HubInner {
    channels: Mutex<HashMap<ConversationId, Channel>>,
    next_id: AtomicU64,
}

impl HubInner {
    fn channels(&self) -> MutexGuard<'_, HashMap<ConversationId, Channel>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, conversation_id: &ConversationId, id: u64) {
        if let Some(channel) = self.channels().get_mut(conversation_id) {
            channel.subscribers.retain(|(sub, _)| *sub != id);
        }
    }
}

#[derive(Clone, Default)]
pub struct TranscriptHub {
    inner: Arc<HubInner>,
}

impl TranscriptHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for one conversation.
    ///
    /// With `emit_current`, the latest snapshot (if any) is delivered
    /// before this returns.
    pub fn subscribe<F>(
        &self,
        conversation_id: &ConversationId,
        callback: F,
        emit_current: bool,
    ) -> Subscription
    where
        F: Fn(&Transcript) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let callback: Callback = Arc::new(callback);
        let current = {
            let mut channels = self.inner.channels();
            let channel = channels.entry(conversation_id.clone()).or_default();
            channel.subscribers.push((id, Arc::clone(&callback)));
            channel.latest.clone()
        };
        if emit_current && let Some(snapshot) = current {
            callback(&snapshot);
        }
        Subscription {
            hub: Arc::downgrade(&self.inner),
            conversation_id: conversation_id.clone(),
            id,
            active: true,
        }
    }

    /// Store a new snapshot and deliver it to every subscriber.
    pub fn publish(&self, conversation_id: &ConversationId, transcript: Transcript) {
        let callbacks: Vec<Callback> = {
            let mut channels = self.inner.channels();
            let channel = channels.entry(conversation_id.clone()).or_default();
            channel.latest = Some(Arc::clone(&transcript));
            channel.subscribers.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        // Callbacks run outside the lock so they may subscribe or unsubscribe.
        for callback in callbacks {
            callback(&transcript);
        }
    }

    pub fn latest(&self, conversation_id: &ConversationId) -> Option<Transcript> {
        self.inner
            .channels()
            .get(conversation_id)
            .and_then(|c| c.latest.clone())
    }

    pub fn subscriber_count(&self, conversation_id: &ConversationId) -> usize {
        self.inner
            .channels()
            .get(conversation_id)
            .map_or(0, |c| c.subscribers.len())
    }
}

/// Handle for one subscription. Unsubscribes on drop.
pub struct Subscription {
    hub: Weak<HubInner>,
    conversation_id: ConversationId,
    id: u64,
    active: bool,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(&self.conversation_id, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}
