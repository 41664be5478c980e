//! External tool server client over stdio.
//!
//! Speaks JSON-RPC 2.0, one message per line. A background task owns the
//! read half and routes each response to the request waiting on its id, so
//! any number of calls can be in flight at once.

mod protocol;
mod transport;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::Child;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vaultpilot_config::ToolServerConfig;
use vaultpilot_core::error::ToolError;
use vaultpilot_core::tool::{ToolDescriptor, ToolServer};

use protocol::{
    ClientInfo, InitializeParams, InitializeResult, JSONRPC_VERSION, PROTOCOL_VERSION, RpcIncoming,
    RpcNotification, RpcRequest, ToolCallResult, ToolsListResult,
};
use transport::LineWriter;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

type Reply = Result<Value, ToolError>;
type PendingMap = Mutex<HashMap<i64, oneshot::Sender<Reply>>>;

fn lock(pending: &PendingMap) -> MutexGuard<'_, HashMap<i64, oneshot::Sender<Reply>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Connection to one external tool server.
pub struct StdioToolServer {
    name: String,
    writer: LineWriter,
    pending: Arc<PendingMap>,
    closed: Arc<AtomicBool>,
    next_id: AtomicI64,
    request_timeout: Duration,
    shutdown: CancellationToken,
    _child: Option<Child>,
}

impl StdioToolServer {
    /// Spawn the configured command and complete the initialize handshake.
    pub async fn connect(config: &ToolServerConfig, working_dir: &Path) -> Result<Self, ToolError> {
        let (child, stdout, stdin) = transport::spawn(
            &config.name,
            &config.command,
            &config.args,
            &config.env,
            working_dir,
        )?;
        let mut server = Self::from_io(&config.name, stdout, stdin);
        server._child = Some(child);
        server.initialize().await?;
        Ok(server)
    }

    /// Wrap an already-open byte stream pair. Must be called inside a tokio runtime.
    pub fn from_io<R, W>(name: &str, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: Arc<PendingMap> = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let shutdown = CancellationToken::new();

        tokio::spawn(receive_loop(
            name.to_string(),
            reader,
            Arc::clone(&pending),
            Arc::clone(&closed),
            shutdown.clone(),
        ));

        Self {
            name: name.to_string(),
            writer: LineWriter::new(writer),
            pending,
            closed,
            next_id: AtomicI64::new(1),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            shutdown,
            _child: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn initialize(&self) -> Result<(), ToolError> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION,
            capabilities: serde_json::json!({}),
            client_info: ClientInfo {
                name: "vaultpilot",
                version: env!("CARGO_PKG_VERSION"),
            },
        };
        let value = self
            .request("initialize", Some(self.to_value(params)?), None, "initialize")
            .await?;
        let result: InitializeResult = self.decode(value)?;
        info!(server = %self.name, protocol = %result.protocol_version, "Tool server initialized");

        self.notify("notifications/initialized", None).await
    }

    fn unavailable(&self, reason: impl Into<String>) -> ToolError {
        ToolError::ServerUnavailable {
            server: self.name.clone(),
            reason: reason.into(),
        }
    }

    fn to_value(&self, value: impl serde::Serialize) -> Result<Value, ToolError> {
        serde_json::to_value(value).map_err(|e| self.unavailable(format!("encode failed: {e}")))
    }

    fn decode<T: serde::de::DeserializeOwned>(&self, value: Value) -> Result<T, ToolError> {
        serde_json::from_value(value).map_err(|e| self.unavailable(format!("unexpected reply: {e}")))
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: Option<&CancellationToken>,
        label: &str,
    ) -> Result<Value, ToolError> {
        if self.is_closed() {
            return Err(self.unavailable("connection closed"));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let json = serde_json::to_string(&RpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        })
        .map_err(|e| self.unavailable(format!("encode failed: {e}")))?;

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);
        // The receive loop marks closed before draining, so one of the two sees this entry.
        if self.is_closed() {
            lock(&self.pending).remove(&id);
            return Err(self.unavailable("connection closed"));
        }

        debug!(server = %self.name, id, method, "Tool server request");
        if let Err(e) = self.writer.send(&json).await {
            lock(&self.pending).remove(&id);
            return Err(self.unavailable(format!("write failed: {e}")));
        }

        let cancelled = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => {
                lock(&self.pending).remove(&id);
                let params = serde_json::json!({ "requestId": id, "reason": "cancelled by client" });
                if let Err(e) = self.notify("notifications/cancelled", Some(params)).await {
                    warn!(server = %self.name, id, "Failed to send cancellation: {}", e);
                }
                Err(ToolError::Aborted)
            }
            reply = tokio::time::timeout(self.request_timeout, rx) => match reply {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(self.unavailable("connection closed")),
                Err(_) => {
                    lock(&self.pending).remove(&id);
                    Err(ToolError::Timeout {
                        tool_name: label.to_string(),
                        timeout_secs: self.request_timeout.as_secs(),
                    })
                }
            },
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ToolError> {
        let json = serde_json::to_string(&RpcNotification {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        })
        .map_err(|e| self.unavailable(format!("encode failed: {e}")))?;
        debug!(server = %self.name, method, "Tool server notify");
        self.writer
            .send(&json)
            .await
            .map_err(|e| self.unavailable(format!("write failed: {e}")))
    }
}

impl Drop for StdioToolServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl ToolServer for StdioToolServer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
            let value = self.request("tools/list", params, None, "tools/list").await?;
            let page: ToolsListResult = self.decode(value)?;
            tools.extend(page.tools.into_iter().map(|t| ToolDescriptor {
                name: t.name,
                description: t.description.unwrap_or_default(),
                input_schema: t.input_schema,
            }));
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        debug!(server = %self.name, count = tools.len(), "Listed remote tools");
        Ok(tools)
    }

    async fn call_tool(
        &self,
        tool: &str,
        arguments: Value,
        cancel: CancellationToken,
    ) -> Result<String, ToolError> {
        if cancel.is_cancelled() {
            return Err(ToolError::Aborted);
        }
        let params = serde_json::json!({ "name": tool, "arguments": arguments });
        let value = self.request("tools/call", Some(params), Some(&cancel), tool).await?;
        let result: ToolCallResult = self.decode(value)?;
        if result.is_error {
            return Err(ToolError::ExecutionFailed {
                tool_name: tool.to_string(),
                reason: result.text(),
            });
        }
        Ok(result.text())
    }
}

async fn receive_loop<R>(
    name: String,
    reader: R,
    pending: Arc<PendingMap>,
    closed: Arc<AtomicBool>,
    shutdown: CancellationToken,
) where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    let reason = loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break "client shut down".to_string(),
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => route(&name, line.trim(), &pending),
            Ok(None) => break "server closed the connection".to_string(),
            Err(e) => break format!("read failed: {e}"),
        }
    };

    debug!(server = %name, "Receive loop ended: {}", reason);
    closed.store(true, Ordering::SeqCst);
    let waiting: Vec<_> = lock(&pending).drain().collect();
    for (_, tx) in waiting {
        let _ = tx.send(Err(ToolError::ServerUnavailable {
            server: name.clone(),
            reason: reason.clone(),
        }));
    }
}

fn route(name: &str, line: &str, pending: &PendingMap) {
    // Servers may print logs on stdout; only JSON objects are protocol traffic.
    if !line.starts_with('{') {
        if !line.is_empty() {
            debug!(server = %name, "Skipping non-JSON line: {}", line);
        }
        return;
    }

    let message: RpcIncoming = match serde_json::from_str(line) {
        Ok(m) => m,
        Err(e) => {
            warn!(server = %name, "Malformed message: {}", e);
            return;
        }
    };

    let Some(id) = message.id.as_ref().and_then(Value::as_i64) else {
        if let Some(method) = message.method {
            debug!(server = %name, method = %method, "Server notification");
        }
        return;
    };

    let Some(tx) = lock(pending).remove(&id) else {
        debug!(server = %name, id, "Reply for unknown or abandoned request");
        return;
    };

    let reply = match message.error {
        Some(error) => Err(ToolError::ExecutionFailed {
            tool_name: name.to_string(),
            reason: format!("remote error {}: {}", error.code, error.message),
        }),
        None => Ok(message.result.unwrap_or(Value::Null)),
    };
    let _ = tx.send(reply);
}
