//! OpenAI-compatible provider implementation.
//!
//! Works with OpenAI, OpenRouter, Ollama, vLLM and any other endpoint that
//! exposes `/v1/chat/completions`.
//!
//! The streaming path forwards every SSE event as one raw [`StreamChunk`]:
//! text, reasoning, tool-call deltas (by index, arguments unparsed),
//! citations and usage. Nothing is accumulated here.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace, warn};
use vaultpilot_config::ProviderConfig;
use vaultpilot_core::error::ProviderError;
use vaultpilot_core::message::{Citation, ToolCallRequest};
use vaultpilot_core::provider::*;
use vaultpilot_core::tool::{ToolArguments, ToolDescriptor};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        Self::new(
            &config.name,
            &config.api_url,
            config.api_key.clone().unwrap_or_default(),
        )
    }

    /// Create an Ollama provider (no key needed).
    pub fn ollama(base_url: Option<&str>) -> Result<Self, ProviderError> {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama",
        )
    }

    fn to_api_messages(messages: &[PromptMessage]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                    Role::Tool => "tool".into(),
                },
                content: Some(m.content.clone()),
                reasoning_content: None,
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.as_text(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
                annotations: Vec::new(),
            })
            .collect()
    }

    fn to_api_tools(tools: &[ToolDescriptor]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.input_schema.clone(),
                },
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });
        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }
        if !request.stop.is_empty() {
            body["stop"] = serde_json::json!(request.stop);
        }
        body
    }

    async fn post(
        &self,
        body: &serde_json::Value,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder.json(body).send().await.map_err(network_error)?;
        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }
        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }
        if status == 404 {
            let model = body["model"].as_str().unwrap_or_default().to_string();
            return Err(ProviderError::ModelNotFound(model));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }
        Ok(response)
    }
}

fn network_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        debug!(provider = %self.name, model = %request.model, "Sending completion request");
        let response = self.post(&Self::request_body(&request, false), false).await?;

        let api_response: ApiResponse = response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: 200,
            message: format!("Failed to parse response: {e}"),
        })?;
        into_response(api_response)
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        debug!(provider = %self.name, model = %request.model, "Sending streaming request");
        let response = self.post(&Self::request_body(&request, true), true).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Dropping the receiver ends this task, which drops the response and
        // closes the connection.
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut decoder = SseDecoder::default();

            while let Some(bytes) = byte_stream.next().await {
                let bytes = match bytes {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(ProviderError::StreamInterrupted(e.to_string()))).await;
                        return;
                    }
                };

                for data in decoder.push(&bytes) {
                    match parse_event(&data) {
                        Ok(SseEvent::Done) => return,
                        Ok(SseEvent::Chunk(chunk)) => {
                            if tx.send(Ok(chunk)).await.is_err() {
                                return;
                            }
                        }
                        Ok(SseEvent::Empty) => {}
                        Err(e) => {
                            trace!(provider = %provider_name, data = %data, "Unparseable SSE event");
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }

            if !decoder.finished {
                let _ = tx
                    .send(Err(ProviderError::StreamInterrupted(
                        "unexpected end of stream".into(),
                    )))
                    .await;
            }
        });

        Ok(rx)
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(network_error)?;

        if !response.status().is_success() {
            return Ok(Vec::new());
        }

        let body: serde_json::Value = response.json().await.map_err(network_error)?;
        let models = body["data"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m["id"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        Ok(models)
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(network_error)?;

        Ok(response.status().is_success())
    }
}

fn into_response(api_response: ApiResponse) -> Result<ProviderResponse, ProviderError> {
    let mut citations = Vec::new();
    push_urls(&mut citations, api_response.citations);

    let choice = api_response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::ApiError {
            status_code: 200,
            message: "No choices in response".into(),
        })?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolCallRequest {
            id: tc.id,
            name: tc.function.name,
            arguments: ToolArguments::Text(tc.function.arguments),
        })
        .collect();

    citations.extend(choice.message.annotations.into_iter().filter_map(Annotation::into_citation));

    Ok(ProviderResponse {
        content: choice.message.content.unwrap_or_default(),
        reasoning: choice.message.reasoning_content.filter(|r| !r.is_empty()),
        citations,
        tool_calls,
        usage: api_response.usage.map(Usage::from),
        model: api_response.model,
    })
}

fn push_urls(citations: &mut Vec<Citation>, urls: Vec<String>) {
    citations.extend(urls.into_iter().map(|url| Citation { url, title: None }));
}

/// Splits an SSE byte stream into `data:` payloads.
///
/// Bytes are buffered until a full line arrives, so a multi-byte character
/// split across network chunks is decoded intact.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    finished: bool,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(line_end) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\r', '\n']);

            // blank separators and `:` comments
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if data == "[DONE]" {
                    self.finished = true;
                }
                events.push(data.to_string());
            }
        }
        events
    }
}

enum SseEvent {
    Chunk(StreamChunk),
    Empty,
    Done,
}

fn parse_event(data: &str) -> Result<SseEvent, ProviderError> {
    if data == "[DONE]" {
        return Ok(SseEvent::Done);
    }

    let event: StreamResponse = serde_json::from_str(data)
        .map_err(|e| ProviderError::StreamInterrupted(format!("malformed stream envelope: {e}")))?;

    if let Some(error) = event.error {
        return Err(ProviderError::ApiError {
            status_code: 200,
            message: error.message,
        });
    }

    let mut chunk = StreamChunk {
        usage: event.usage.map(Usage::from),
        ..StreamChunk::default()
    };
    push_urls(&mut chunk.citations, event.citations);

    if let Some(choice) = event.choices.into_iter().next() {
        let delta = choice.delta;
        chunk.content = delta.content.filter(|c| !c.is_empty());
        chunk.reasoning = delta
            .reasoning_content
            .or(delta.reasoning)
            .filter(|r| !r.is_empty());
        chunk.tool_calls = delta
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                let (name, arguments) = match tc.function {
                    Some(f) => (f.name, f.arguments),
                    None => (None, None),
                };
                ToolCallDelta {
                    index: tc.index,
                    id: tc.id,
                    kind: tc.r#type,
                    name,
                    arguments,
                }
            })
            .collect();
        chunk
            .citations
            .extend(delta.annotations.into_iter().filter_map(Annotation::into_citation));
    }

    if chunk == StreamChunk::default() {
        Ok(SseEvent::Empty)
    } else {
        Ok(SseEvent::Chunk(chunk))
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing)]
    reasoning_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing)]
    annotations: Vec<Annotation>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
    #[serde(default)]
    citations: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

/// `{"type":"url_citation","url_citation":{"url":..,"title":..}}`
#[derive(Debug, Deserialize)]
struct Annotation {
    #[serde(default)]
    url_citation: Option<UrlCitation>,
}

#[derive(Debug, Deserialize)]
struct UrlCitation {
    url: String,
    #[serde(default)]
    title: Option<String>,
}

impl Annotation {
    fn into_citation(self) -> Option<Citation> {
        self.url_citation.map(|c| Citation {
            url: c.url,
            title: c.title,
        })
    }
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` event from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    #[serde(default)]
    citations: Vec<String>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
    #[serde(default)]
    annotations: Vec<Annotation>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    r#type: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(data: &str) -> StreamChunk {
        match parse_event(data).unwrap() {
            SseEvent::Chunk(chunk) => chunk,
            _ => panic!("expected a chunk for {data}"),
        }
    }

    #[test]
    fn ollama_constructor() {
        let provider = OpenAiCompatProvider::ollama(None).unwrap();
        assert_eq!(provider.name(), "ollama");
        assert!(provider.base_url.contains("localhost:11434"));
    }

    #[test]
    fn from_config_trims_trailing_slash() {
        let config = ProviderConfig {
            api_url: "https://example.test/v1/".into(),
            ..ProviderConfig::default()
        };
        let provider = OpenAiCompatProvider::from_config(&config).unwrap();
        assert_eq!(provider.base_url, "https://example.test/v1");
    }

    #[test]
    fn prompt_messages_convert_with_tool_calls() {
        let messages = vec![
            PromptMessage::system("You are helpful"),
            PromptMessage::assistant(
                "",
                vec![ToolCallRequest {
                    id: "call_1".into(),
                    name: "fs_list".into(),
                    arguments: ToolArguments::Structured(serde_json::json!({"path": "notes/"})),
                }],
            ),
            PromptMessage::tool_result("call_1", "[]"),
        ];
        let api = OpenAiCompatProvider::to_api_messages(&messages);
        assert_eq!(api[0].role, "system");
        let calls = api[1].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.arguments, r#"{"path":"notes/"}"#);
        assert_eq!(api[2].role, "tool");
        assert_eq!(api[2].tool_call_id.as_deref(), Some("call_1"));

        let json = serde_json::to_value(&api[0]).unwrap();
        assert!(json.get("annotations").is_none());
    }

    #[test]
    fn tool_descriptors_convert() {
        let tools = vec![ToolDescriptor {
            name: "fs_read".into(),
            description: "Read a note".into(),
            input_schema: serde_json::json!({"type": "object"}),
        }];
        let api = OpenAiCompatProvider::to_api_tools(&tools);
        assert_eq!(api[0].function.name, "fs_read");
        assert_eq!(api[0].r#type, "function");
    }

    #[test]
    fn stream_body_requests_usage() {
        let request = ProviderRequest {
            model: "m".into(),
            messages: vec![PromptMessage::user("hi")],
            temperature: 0.2,
            max_tokens: Some(64),
            tools: vec![],
            stream: true,
            stop: vec![],
        };
        let body = OpenAiCompatProvider::request_body(&request, true);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["max_tokens"], 64);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn content_and_reasoning_deltas() {
        let c = chunk(r#"{"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#);
        assert_eq!(c.content.as_deref(), Some("Hel"));

        let r = chunk(r#"{"choices":[{"delta":{"reasoning_content":"think"}}]}"#);
        assert_eq!(r.reasoning.as_deref(), Some("think"));
        assert!(r.content.is_none());
    }

    #[test]
    fn tool_call_deltas_pass_through_unmerged() {
        let first = chunk(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","type":"function","function":{"name":"fs_list","arguments":"{\"pa"}}]}}]}"#,
        );
        assert_eq!(first.tool_calls[0].id.as_deref(), Some("call_a"));
        assert_eq!(first.tool_calls[0].kind.as_deref(), Some("function"));
        assert_eq!(first.tool_calls[0].arguments.as_deref(), Some("{\"pa"));

        let second = chunk(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"th\":1}"}}]}}]}"#,
        );
        assert!(second.tool_calls[0].id.is_none());
        assert!(second.tool_calls[0].name.is_none());
        assert_eq!(second.tool_calls[0].arguments.as_deref(), Some("th\":1}"));
    }

    #[test]
    fn citations_from_annotations_and_top_level() {
        let c = chunk(
            r#"{"citations":["https://a"],"choices":[{"delta":{"annotations":[{"type":"url_citation","url_citation":{"url":"https://b","title":"B"}}]}}]}"#,
        );
        assert_eq!(c.citations.len(), 2);
        assert_eq!(c.citations[0].url, "https://a");
        assert_eq!(c.citations[1].title.as_deref(), Some("B"));
    }

    #[test]
    fn usage_only_event() {
        let c = chunk(r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#);
        assert_eq!(c.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn empty_delta_is_skipped() {
        assert!(matches!(
            parse_event(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#).unwrap(),
            SseEvent::Empty
        ));
        assert!(matches!(parse_event("[DONE]").unwrap(), SseEvent::Done));
    }

    #[test]
    fn malformed_envelope_is_transient() {
        let Err(err) = parse_event("{not json") else {
            panic!("expected an error");
        };
        assert!(err.is_transient());
    }

    #[test]
    fn in_band_error_is_not_transient() {
        let Err(err) = parse_event(r#"{"error":{"message":"context length exceeded"}}"#) else {
            panic!("expected an error");
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn decoder_handles_split_lines_and_comments() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b": keep-alive\n\ndata: {\"a\"").is_empty());
        let events = decoder.push(b":1}\r\n\ndata: [DONE]\n");
        assert_eq!(events, vec![r#"{"a":1}"#.to_string(), "[DONE]".to_string()]);
        assert!(decoder.finished);
    }

    #[test]
    fn decoder_keeps_characters_split_across_chunks() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"caf\u{e9}\"}}]}\n".as_bytes();
        let split = line.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut decoder = SseDecoder::default();
        assert!(decoder.push(&line[..split]).is_empty());
        let events = decoder.push(&line[split..]);
        assert_eq!(events.len(), 1);
        assert!(events[0].contains("caf\u{e9}"));
        assert!(!events[0].contains('\u{fffd}'));
    }

    #[test]
    fn non_streaming_response_conversion() {
        let api: ApiResponse = serde_json::from_str(
            r#"{
                "model": "gpt-test",
                "choices": [{"message": {
                    "role": "assistant",
                    "content": "Done",
                    "reasoning_content": "short",
                    "tool_calls": [{"id":"call_1","type":"function","function":{"name":"fs_read","arguments":"{\"path\":\"a.md\"}"}}],
                    "annotations": [{"type":"url_citation","url_citation":{"url":"https://x"}}]
                }}],
                "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
            }"#,
        )
        .unwrap();
        let response = into_response(api).unwrap();
        assert_eq!(response.content, "Done");
        assert_eq!(response.reasoning.as_deref(), Some("short"));
        assert_eq!(response.tool_calls[0].name, "fs_read");
        assert_eq!(response.citations[0].url, "https://x");
        assert_eq!(response.usage.unwrap().total_tokens, 5);
    }
}
