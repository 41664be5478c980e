//! Tool gateway: one entry point over the local backend and external servers.
//!
//! External tools are exposed as `<server>__<tool>`; local tools keep their
//! plain names. Descriptor listings are cached per "include built-in" mode
//! and the cache is dropped synchronously by every configuration mutator.
//! A generation counter keeps a listing computed across an invalidation from
//! being stored.

use futures::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vaultpilot_config::{BuiltinToolsConfig, ToolServerConfig, ToolsConfig};
use vaultpilot_core::error::{Error, ToolError};
use vaultpilot_core::tool::{
    NAMESPACE_SEPARATOR, Tool, ToolArguments, ToolContext, ToolDescriptor, ToolOutcome,
    ToolRegistry, ToolServer,
};
use vaultpilot_security::ToolPolicy;

use crate::stdio::StdioToolServer;

struct ServerEntry {
    config: ToolServerConfig,
    backend: Arc<dyn ToolServer>,
}

struct GatewayState {
    builtin: BuiltinToolsConfig,
    servers: Vec<ServerEntry>,
    generation: u64,
}

impl GatewayState {
    fn server(&self, name: &str) -> Option<&ServerEntry> {
        self.servers.iter().find(|s| s.config.name == name)
    }

    fn server_mut(&mut self, name: &str) -> Result<&mut ServerEntry, Error> {
        self.servers
            .iter_mut()
            .find(|s| s.config.name == name)
            .ok_or_else(|| config_error(format!("unknown tool server '{name}'")))
    }

    fn builtin_enabled(&self, tool: &str) -> bool {
        self.builtin.enabled && !self.builtin.disabled.iter().any(|d| d == tool)
    }
}

enum Target {
    Local(Arc<dyn Tool>),
    Remote {
        backend: Arc<dyn ToolServer>,
        tool: String,
    },
}

type InFlightMap = HashMap<String, (u64, CancellationToken)>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn config_error(message: String) -> Error {
    Error::Config { message }
}

/// Split `server__tool` into its parts.
pub fn split_namespaced(name: &str) -> Option<(&str, &str)> {
    name.split_once(NAMESPACE_SEPARATOR)
}

pub struct ToolGateway {
    local: ToolRegistry,
    state: RwLock<GatewayState>,
    cache: Mutex<HashMap<bool, (u64, Vec<ToolDescriptor>)>>,
    in_flight: Mutex<InFlightMap>,
    next_seq: AtomicU64,
}

/// Removes a call's in-flight entry on every exit path, unless a newer call took the id.
struct InFlightGuard<'a> {
    map: &'a Mutex<InFlightMap>,
    call_id: &'a str,
    seq: u64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut map = lock(self.map);
        if map.get(self.call_id).is_some_and(|(seq, _)| *seq == self.seq) {
            map.remove(self.call_id);
        }
    }
}

impl ToolGateway {
    pub fn new(local: ToolRegistry, builtin: BuiltinToolsConfig) -> Self {
        Self {
            local,
            state: RwLock::new(GatewayState {
                builtin,
                servers: Vec::new(),
                generation: 0,
            }),
            cache: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(1),
        }
    }

    /// Build a gateway and connect every enabled external server.
    ///
    /// A server that fails to start is logged and left out.
    pub async fn from_config(
        local: ToolRegistry,
        config: &ToolsConfig,
        working_dir: &Path,
    ) -> Self {
        let gateway = Self::new(local, config.builtin.clone());
        for server in &config.servers {
            if !server.enabled {
                info!(server = %server.name, "Tool server disabled, not starting");
                continue;
            }
            let backend = match StdioToolServer::connect(server, working_dir).await {
                Ok(backend) => backend,
                Err(e) => {
                    warn!(server = %server.name, "Tool server failed to start: {}", e);
                    continue;
                }
            };
            if let Err(e) = gateway.add_server(server.clone(), Arc::new(backend)) {
                warn!(server = %server.name, "Tool server rejected: {}", e);
            }
        }
        gateway
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, GatewayState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a configuration change and drop every cached listing.
    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut GatewayState) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let value = change(&mut state)?;
        state.generation += 1;
        lock(&self.cache).clear();
        debug!(generation = state.generation, "Tool descriptor cache invalidated");
        Ok(value)
    }

    pub fn add_server(
        &self,
        config: ToolServerConfig,
        backend: Arc<dyn ToolServer>,
    ) -> Result<(), Error> {
        self.mutate(|state| {
            let name = config.name.trim();
            if name.is_empty() || name.contains(NAMESPACE_SEPARATOR) {
                return Err(config_error(format!(
                    "tool server name '{}' must be non-empty and must not contain '{NAMESPACE_SEPARATOR}'",
                    config.name
                )));
            }
            if state.server(&config.name).is_some() {
                return Err(config_error(format!(
                    "tool server '{}' is already registered",
                    config.name
                )));
            }
            info!(server = %config.name, "Tool server added");
            state.servers.push(ServerEntry { config, backend });
            Ok(())
        })
    }

    pub fn remove_server(&self, name: &str) -> Result<(), Error> {
        self.mutate(|state| {
            let before = state.servers.len();
            state.servers.retain(|s| s.config.name != name);
            if state.servers.len() == before {
                return Err(config_error(format!("unknown tool server '{name}'")));
            }
            info!(server = %name, "Tool server removed");
            Ok(())
        })
    }

    pub fn set_server_enabled(&self, name: &str, enabled: bool) -> Result<(), Error> {
        self.mutate(|state| {
            state.server_mut(name)?.config.enabled = enabled;
            Ok(())
        })
    }

    /// Enable or disable one tool of an external server, by its un-namespaced name.
    pub fn set_tool_enabled(&self, server: &str, tool: &str, enabled: bool) -> Result<(), Error> {
        self.mutate(|state| {
            let entry = state.server_mut(server)?;
            entry.config.tools.entry(tool.to_string()).or_default().enabled = enabled;
            Ok(())
        })
    }

    pub fn set_tool_auto_execute(
        &self,
        server: &str,
        tool: &str,
        auto_execute: bool,
    ) -> Result<(), Error> {
        self.mutate(|state| {
            let entry = state.server_mut(server)?;
            entry.config.tools.entry(tool.to_string()).or_default().auto_execute = auto_execute;
            Ok(())
        })
    }

    pub fn set_builtin_tool_enabled(&self, tool: &str, enabled: bool) -> Result<(), Error> {
        if self.local.get(tool).is_none() {
            return Err(config_error(format!("unknown built-in tool '{tool}'")));
        }
        self.mutate(|state| {
            let disabled = &mut state.builtin.disabled;
            disabled.retain(|d| d != tool);
            if !enabled {
                disabled.push(tool.to_string());
            }
            Ok(())
        })
    }

    pub fn set_builtin_enabled(&self, enabled: bool) -> Result<(), Error> {
        self.mutate(|state| {
            state.builtin.enabled = enabled;
            Ok(())
        })
    }

    /// Every tool the model may be offered.
    ///
    /// A server whose listing fails is skipped (and the result is not cached).
    pub async fn list_tools(&self, include_builtin: bool) -> Vec<ToolDescriptor> {
        let (generation, mut tools, servers) = {
            let state = self.read_state();
            if let Some((cached_gen, tools)) = lock(&self.cache).get(&include_builtin)
                && *cached_gen == state.generation
            {
                return tools.clone();
            }

            let local: Vec<ToolDescriptor> = if include_builtin {
                self.local
                    .descriptors()
                    .into_iter()
                    .filter(|d| state.builtin_enabled(&d.name))
                    .collect()
            } else {
                Vec::new()
            };
            let servers: Vec<(ToolServerConfig, Arc<dyn ToolServer>)> = state
                .servers
                .iter()
                .filter(|s| s.config.enabled)
                .map(|s| (s.config.clone(), Arc::clone(&s.backend)))
                .collect();
            (state.generation, local, servers)
        };

        let listings = join_all(servers.iter().map(|(_, backend)| backend.list_tools())).await;
        let mut complete = true;
        for ((config, _), listing) in servers.iter().zip(listings) {
            match listing {
                Ok(remote) => tools.extend(
                    remote
                        .into_iter()
                        .filter(|d| config.tool_enabled(&d.name))
                        .map(|d| ToolDescriptor {
                            name: format!("{}{NAMESPACE_SEPARATOR}{}", config.name, d.name),
                            ..d
                        }),
                ),
                Err(e) => {
                    complete = false;
                    warn!(server = %config.name, "Listing tools failed: {}", e);
                }
            }
        }

        if complete && self.read_state().generation == generation {
            lock(&self.cache).insert(include_builtin, (generation, tools.clone()));
        }
        debug!(count = tools.len(), include_builtin, "Tools listed");
        tools
    }

    fn resolve(&self, name: &str) -> Result<Target, ToolError> {
        let state = self.read_state();
        let Some((server, tool)) = split_namespaced(name) else {
            if !state.builtin_enabled(name) && self.local.get(name).is_some() {
                return Err(ToolError::PermissionDenied {
                    tool_name: name.to_string(),
                    reason: "built-in tool is disabled".into(),
                });
            }
            return self
                .local
                .get(name)
                .map(Target::Local)
                .ok_or_else(|| ToolError::NotFound(name.to_string()));
        };

        let entry = state
            .server(server)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        if !entry.config.enabled {
            return Err(ToolError::ServerUnavailable {
                server: server.to_string(),
                reason: "server is disabled".into(),
            });
        }
        if !entry.config.tool_enabled(tool) {
            return Err(ToolError::PermissionDenied {
                tool_name: name.to_string(),
                reason: "tool is disabled".into(),
            });
        }
        Ok(Target::Remote {
            backend: Arc::clone(&entry.backend),
            tool: tool.to_string(),
        })
    }

    /// Execute a tool call. Never fails: every problem is folded into the outcome.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: &ToolArguments,
        call_id: &str,
        cancel: &CancellationToken,
    ) -> ToolOutcome {
        let started = Instant::now();
        let outcome =
            ToolOutcome::from(self.execute(name, arguments, call_id, cancel, false).await);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            ToolOutcome::Success(_) => debug!(tool = %name, call_id, elapsed_ms, "Tool call succeeded"),
            ToolOutcome::Error(reason) => {
                warn!(tool = %name, call_id, elapsed_ms, "Tool call failed: {}", reason)
            }
            ToolOutcome::Aborted => info!(tool = %name, call_id, elapsed_ms, "Tool call aborted"),
        }
        outcome
    }

    /// Validate a mutating local call and describe its effect without applying it.
    pub async fn preview(
        &self,
        name: &str,
        arguments: &ToolArguments,
        call_id: &str,
    ) -> Result<String, ToolError> {
        self.execute(name, arguments, call_id, &CancellationToken::new(), true)
            .await
    }

    /// Cancel the in-flight call with this id. Returns `false` if none is running.
    pub fn abort_tool_call(&self, call_id: &str) -> bool {
        match lock(&self.in_flight).get(call_id) {
            Some((_, token)) => {
                token.cancel();
                info!(call_id, "Tool call abort requested");
                true
            }
            None => false,
        }
    }

    async fn execute(
        &self,
        name: &str,
        arguments: &ToolArguments,
        call_id: &str,
        cancel: &CancellationToken,
        dry_run: bool,
    ) -> Result<String, ToolError> {
        let arguments = arguments.parse()?;

        let token = cancel.child_token();
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let replaced = lock(&self.in_flight).insert(call_id.to_string(), (seq, token.clone()));
        if let Some((_, previous)) = replaced {
            debug!(call_id, "Call id reused, cancelling the previous call");
            previous.cancel();
        }
        let _guard = InFlightGuard {
            map: &self.in_flight,
            call_id,
            seq,
        };

        if token.is_cancelled() {
            return Err(ToolError::Aborted);
        }

        let result = match self.resolve(name)? {
            Target::Local(tool) => {
                if dry_run && !tool.supports_dry_run() {
                    return Err(ToolError::InvalidArguments(format!(
                        "{name} does not support dry run"
                    )));
                }
                let mut ctx = ToolContext::new(call_id, token.clone());
                if dry_run {
                    ctx = ctx.dry_run();
                }
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(ToolError::Aborted),
                    result = tool.execute(arguments, &ctx) => result,
                }
            }
            Target::Remote { backend, tool } => {
                if dry_run {
                    return Err(ToolError::InvalidArguments(format!(
                        "{name} does not support dry run"
                    )));
                }
                backend.call_tool(&tool, Value::Object(arguments), token.clone()).await
            }
        };

        match result {
            Err(_) if token.is_cancelled() => Err(ToolError::Aborted),
            other => other,
        }
    }
}

impl ToolPolicy for ToolGateway {
    fn auto_executes(&self, tool_name: &str) -> bool {
        let Some((server, tool)) = split_namespaced(tool_name) else {
            return false;
        };
        self.read_state()
            .server(server)
            .is_some_and(|s| s.config.enabled && s.config.tool_auto_executes(tool))
    }
}
