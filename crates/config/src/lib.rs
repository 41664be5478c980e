//! Configuration loading, validation, and management for vaultpilot.
//!
//! Loads configuration from `~/.vaultpilot/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use vaultpilot_core::LoopConfig;
use vaultpilot_core::tool::NAMESPACE_SEPARATOR;

/// The root configuration structure.
///
/// Maps directly to `~/.vaultpilot/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// LLM provider connection
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Agent loop behaviour
    #[serde(default)]
    pub agent: AgentConfig,

    /// The note vault the local tools operate on
    #[serde(default)]
    pub vault: VaultConfig,

    /// Built-in tool toggles and external tool servers
    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub skills: SkillsConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider")]
    pub name: String,

    /// Base URL of an OpenAI-compatible endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider(),
            api_url: default_api_url(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Prefer the streaming transport
    #[serde(default = "default_true")]
    pub stream: bool,

    /// How long to wait for the first streamed fragment before falling back
    #[serde(default = "default_first_chunk_timeout_ms")]
    pub first_chunk_timeout_ms: u64,

    #[serde(default = "default_max_auto_iterations")]
    pub max_auto_iterations: u32,

    #[serde(default = "default_true")]
    pub enable_tools: bool,

    #[serde(default = "default_true")]
    pub include_builtin_tools: bool,

    #[serde(default = "default_context_window_tokens")]
    pub context_window_tokens: usize,

    /// Replaces the built-in system prompt when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_true() -> bool {
    true
}
fn default_first_chunk_timeout_ms() -> u64 {
    15_000
}
fn default_max_auto_iterations() -> u32 {
    10
}
fn default_context_window_tokens() -> usize {
    32_000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            stream: true,
            first_chunk_timeout_ms: default_first_chunk_timeout_ms(),
            max_auto_iterations: default_max_auto_iterations(),
            enable_tools: true,
            include_builtin_tools: true,
            context_window_tokens: default_context_window_tokens(),
            system_prompt: None,
        }
    }
}

impl AgentConfig {
    /// The per-run loop configuration derived from these settings.
    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            enable_tools: self.enable_tools,
            max_auto_iterations: self.max_auto_iterations,
            include_builtin_tools: self.include_builtin_tools,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    #[serde(default = "default_vault_root")]
    pub root: PathBuf,

    /// Hard ceiling on any single file read or written by a tool
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Vault-relative prefixes no tool may touch
    #[serde(default = "default_forbidden_paths")]
    pub forbidden_paths: Vec<String>,
}

fn default_vault_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_max_file_bytes() -> u64 {
    5 * 1024 * 1024
}
fn default_forbidden_paths() -> Vec<String> {
    vec![".obsidian".into(), ".git".into(), ".trash".into()]
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            root: default_vault_root(),
            max_file_bytes: default_max_file_bytes(),
            forbidden_paths: default_forbidden_paths(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub builtin: BuiltinToolsConfig,

    #[serde(default)]
    pub servers: Vec<ToolServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinToolsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Built-in tool names switched off individually
    #[serde(default)]
    pub disabled: Vec<String>,
}

impl Default for BuiltinToolsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            disabled: Vec::new(),
        }
    }
}

/// One external, process-based tool server.
#[derive(Clone, Serialize, Deserialize)]
pub struct ToolServerConfig {
    pub name: String,

    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Per-tool overrides keyed by the server's own tool name
    #[serde(default)]
    pub tools: HashMap<String, ToolToggle>,
}

impl ToolServerConfig {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            enabled: true,
            tools: HashMap::new(),
        }
    }

    pub fn tool_enabled(&self, tool: &str) -> bool {
        self.tools.get(tool).is_none_or(|t| t.enabled)
    }

    pub fn tool_auto_executes(&self, tool: &str) -> bool {
        self.tools.get(tool).is_some_and(|t| t.auto_execute)
    }
}

impl std::fmt::Debug for ToolServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // env commonly carries tokens; show keys only
        let mut env_keys: Vec<&String> = self.env.keys().collect();
        env_keys.sort();
        f.debug_struct("ToolServerConfig")
            .field("name", &self.name)
            .field("command", &self.command)
            .field("args", &self.args)
            .field("env", &env_keys)
            .field("enabled", &self.enabled)
            .field("tools", &self.tools)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolToggle {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Run without asking for approval
    #[serde(default)]
    pub auto_execute: bool,
}

impl Default for ToolToggle {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_execute: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillsConfig {
    /// Directory holding `<id>/SKILL.md` documents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.vaultpilot/config.toml).
    ///
    /// Also checks environment variables:
    /// - `VAULTPILOT_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `VAULTPILOT_MODEL`
    /// - `VAULTPILOT_VAULT`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        // Environment variable overrides (highest priority)
        if config.provider.api_key.is_none() {
            config.provider.api_key = std::env::var("VAULTPILOT_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("VAULTPILOT_MODEL") {
            config.provider.model = model;
        }

        if let Ok(vault) = std::env::var("VAULTPILOT_VAULT") {
            config.vault.root = PathBuf::from(vault);
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".vaultpilot")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_auto_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_auto_iterations must be at least 1".into(),
            ));
        }

        if self.agent.first_chunk_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "agent.first_chunk_timeout_ms must be > 0".into(),
            ));
        }

        let mut seen = HashSet::new();
        for server in &self.tools.servers {
            if server.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "tool server name must not be empty".into(),
                ));
            }
            if server.name.contains(NAMESPACE_SEPARATOR) {
                return Err(ConfigError::ValidationError(format!(
                    "tool server name '{}' must not contain '{NAMESPACE_SEPARATOR}'",
                    server.name
                )));
            }
            if !seen.insert(server.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate tool server name '{}'",
                    server.name
                )));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.provider.api_key.is_some()
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
