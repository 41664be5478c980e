//! Stream aggregation: folding response fragments into one assistant message.
//!
//! Text and reasoning are appended in arrival order. Tool-call fragments are
//! merged by their positional index: the first fragment seeds a record,
//! later ones fill in `id`/`type`/`name` only when still missing and append
//! to the argument text. Citations are de-duplicated by URL.

use std::collections::{BTreeMap, HashSet};
use vaultpilot_core::message::{AssistantMessage, ToolCallRequest};
use vaultpilot_core::provider::{ProviderResponse, StreamChunk, ToolCallDelta};
use vaultpilot_core::tool::ToolArguments;

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    kind: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl PartialCall {
    fn merge(&mut self, delta: ToolCallDelta) {
        if self.id.is_none() {
            self.id = delta.id.filter(|s| !s.is_empty());
        }
        if self.kind.is_none() {
            self.kind = delta.kind;
        }
        if self.name.is_none() {
            self.name = delta.name.filter(|s| !s.is_empty());
        }
        if let Some(fragment) = delta.arguments {
            self.arguments.push_str(&fragment);
        }
    }
}

/// Builds one assistant message from a sequence of [`StreamChunk`]s.
#[derive(Debug)]
pub struct StreamAggregator {
    message: AssistantMessage,
    calls: BTreeMap<u32, PartialCall>,
    seen_urls: HashSet<String>,
    chunks: usize,
}

impl StreamAggregator {
    pub fn new() -> Self {
        Self {
            message: AssistantMessage::streaming(),
            calls: BTreeMap::new(),
            seen_urls: HashSet::new(),
            chunks: 0,
        }
    }

    /// Aggregate a complete, non-streamed reply the same way.
    pub fn from_response(response: ProviderResponse) -> Self {
        let mut aggregator = Self::new();
        aggregator.apply(StreamChunk::from(response));
        aggregator
    }

    pub fn apply(&mut self, chunk: StreamChunk) {
        self.chunks += 1;

        if let Some(text) = chunk.content {
            self.message.content.push_str(&text);
        }
        if let Some(reasoning) = chunk.reasoning {
            self.message
                .reasoning
                .get_or_insert_with(String::new)
                .push_str(&reasoning);
        }
        for delta in chunk.tool_calls {
            self.calls.entry(delta.index).or_default().merge(delta);
        }
        for citation in chunk.citations {
            if self.seen_urls.insert(citation.url.clone()) {
                self.message.citations.push(citation);
            }
        }
        if chunk.usage.is_some() {
            self.message.usage = chunk.usage;
        }
    }

    /// Number of fragments applied so far.
    pub fn chunks(&self) -> usize {
        self.chunks
    }

    /// The message as it stands; tool calls are only attached by [`finish`](Self::finish).
    pub fn snapshot(&self) -> &AssistantMessage {
        &self.message
    }

    /// Finalize tool calls in index order. Records that never got a name are
    /// dropped; missing or repeated ids are replaced so every call id is unique.
    pub fn finish(self) -> AssistantMessage {
        let mut message = self.message;
        let mut ids = HashSet::new();
        message.tool_calls = self
            .calls
            .into_iter()
            .filter_map(|(index, call)| {
                let name = call.name?;
                let id = match call.id {
                    Some(id) if !ids.contains(&id) => id,
                    _ => format!("call_{index}_{}", uuid::Uuid::new_v4().simple()),
                };
                ids.insert(id.clone());
                Some(ToolCallRequest {
                    id,
                    name,
                    arguments: ToolArguments::Text(call.arguments),
                })
            })
            .collect();
        message
    }
}

impl Default for StreamAggregator {
    fn default() -> Self {
        Self::new()
    }
}
