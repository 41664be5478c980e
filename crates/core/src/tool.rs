//! Tool traits: the abstraction over agent capabilities.
//!
//! Tools come from two kinds of backend: the in-process local backend
//! (vault file tools, skills) and external process-based servers. Both
//! describe themselves with a [`ToolDescriptor`] and report back a
//! [`ToolOutcome`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::ToolError;

/// Separator between an external server name and its tool name.
pub const NAMESPACE_SEPARATOR: &str = "__";

/// Names and actions of the local (built-in) tools.
pub mod builtin {
    use serde::{Deserialize, Serialize};

    pub const FS_LIST: &str = "fs_list";
    pub const FS_READ: &str = "fs_read";
    pub const FS_SEARCH: &str = "fs_search";
    pub const FS_EDIT: &str = "fs_edit";
    pub const FS_WRITE: &str = "fs_write";
    pub const OPEN_SKILL: &str = "open_skill";

    /// Tools that run without approval: lookups, scoped edits and skill loading.
    pub const AUTO_EXECUTE: &[&str] = &[FS_LIST, FS_READ, FS_SEARCH, FS_EDIT, OPEN_SKILL];

    /// The actions accepted by `fs_write`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum WriteAction {
        WriteFile,
        DeleteFile,
        CreateDir,
        DeleteDir,
        Move,
    }

    impl WriteAction {
        pub fn as_str(&self) -> &'static str {
            match self {
                Self::WriteFile => "write_file",
                Self::DeleteFile => "delete_file",
                Self::CreateDir => "create_dir",
                Self::DeleteDir => "delete_dir",
                Self::Move => "move",
            }
        }

        /// Destructive actions always need approval.
        pub fn is_destructive(&self) -> bool {
            matches!(self, Self::DeleteFile | Self::DeleteDir)
        }

        pub fn parse(s: &str) -> Option<Self> {
            match s {
                "write_file" => Some(Self::WriteFile),
                "delete_file" => Some(Self::DeleteFile),
                "create_dir" => Some(Self::CreateDir),
                "delete_dir" => Some(Self::DeleteDir),
                "move" => Some(Self::Move),
                _ => None,
            }
        }
    }
}

/// A tool definition sent to the LLM so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// The tool name (namespaced for external servers)
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub input_schema: serde_json::Value,
}

/// Tool-call arguments as they arrive from a provider.
///
/// Streaming providers hand over raw JSON text; non-streaming ones may
/// already have decoded it. Either way it is parsed exactly once, at the
/// gateway boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolArguments {
    Text(String),
    Structured(serde_json::Value),
}

impl ToolArguments {
    /// Parse into a JSON object. Empty text is treated as `{}`.
    pub fn parse(&self) -> Result<serde_json::Map<String, serde_json::Value>, ToolError> {
        let value = match self {
            Self::Text(text) if text.trim().is_empty() => {
                return Ok(serde_json::Map::new());
            }
            Self::Text(text) => serde_json::from_str::<serde_json::Value>(text)
                .map_err(|e| ToolError::InvalidArguments(format!("arguments are not valid JSON: {e}")))?,
            Self::Structured(value) => value.clone(),
        };

        match value {
            serde_json::Value::Object(map) => Ok(map),
            serde_json::Value::Null => Ok(serde_json::Map::new()),
            other => Err(ToolError::InvalidArguments(format!(
                "arguments must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// The arguments as JSON text (for echoing back to the provider).
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Structured(value) => value.to_string(),
        }
    }
}

impl Default for ToolArguments {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// The result of executing a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "text", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success(String),
    Error(String),
    Aborted,
}

impl From<Result<String, ToolError>> for ToolOutcome {
    fn from(result: Result<String, ToolError>) -> Self {
        match result {
            Ok(text) => Self::Success(text),
            Err(ToolError::Aborted) => Self::Aborted,
            Err(e) => Self::Error(e.to_string()),
        }
    }
}

/// Per-call execution context handed to local tools.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// The model-assigned call id
    pub call_id: String,

    /// Cooperative cancellation for this call only
    pub cancel: CancellationToken,

    /// Validate and describe, but do not mutate storage
    pub dry_run: bool,
}

impl ToolContext {
    pub fn new(call_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            call_id: call_id.into(),
            cancel,
            dry_run: false,
        }
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Fail with `Aborted` if cancellation has been observed.
    pub fn check_cancelled(&self) -> Result<(), ToolError> {
        if self.cancel.is_cancelled() {
            Err(ToolError::Aborted)
        } else {
            Ok(())
        }
    }
}

/// A tool executed in-process by the local backend.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "fs_read").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with already-parsed arguments.
    async fn execute(
        &self,
        arguments: serde_json::Map<String, serde_json::Value>,
        ctx: &ToolContext,
    ) -> Result<String, ToolError>;

    /// Whether `dry_run` is meaningful for this tool.
    fn supports_dry_run(&self) -> bool {
        false
    }

    fn to_descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.parameters_schema(),
        }
    }
}

/// An external, process-based source of tools.
///
/// Names passed to and returned from a server are the server's own,
/// un-namespaced tool names. `call_tool` must resolve to
/// `Err(ToolError::Aborted)` promptly once `cancel` fires, after telling
/// the remote side to stop.
#[async_trait]
pub trait ToolServer: Send + Sync {
    fn name(&self) -> &str;

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError>;

    async fn call_tool(
        &self,
        tool: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<String, ToolError>;
}

/// A registry of local tools, ordered by name.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|t| t.to_descriptor()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use builtin::WriteAction;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }
        async fn execute(
            &self,
            arguments: serde_json::Map<String, serde_json::Value>,
            _ctx: &ToolContext,
        ) -> Result<String, ToolError> {
            Ok(arguments
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string())
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.descriptors()[0].name, "echo");
    }

    #[test]
    fn text_arguments_parse_once() {
        let args = ToolArguments::Text(r#"{"path":"notes/"}"#.into());
        let map = args.parse().unwrap();
        assert_eq!(map["path"], "notes/");
    }

    #[test]
    fn empty_text_arguments_are_empty_object() {
        assert!(ToolArguments::Text("  ".into()).parse().unwrap().is_empty());
    }

    #[test]
    fn malformed_arguments_are_descriptive() {
        let err = ToolArguments::Text(r#"{"path":"#.into()).parse().unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
        assert!(err.to_string().contains("not valid JSON"));

        let err = ToolArguments::Structured(serde_json::json!([1, 2])).parse().unwrap_err();
        assert!(err.to_string().contains("an array"));
    }

    #[test]
    fn outcome_from_result() {
        assert_eq!(ToolOutcome::from(Ok("ok".to_string())), ToolOutcome::Success("ok".into()));
        assert_eq!(ToolOutcome::from(Err(ToolError::Aborted)), ToolOutcome::Aborted);
        assert!(matches!(
            ToolOutcome::from(Err(ToolError::NotFound("x".into()))),
            ToolOutcome::Error(msg) if msg.contains("not found")
        ));
    }

    #[test]
    fn write_actions_round_trip_names() {
        for action in [
            WriteAction::WriteFile,
            WriteAction::DeleteFile,
            WriteAction::CreateDir,
            WriteAction::DeleteDir,
            WriteAction::Move,
        ] {
            assert_eq!(WriteAction::parse(action.as_str()), Some(action));
        }
        assert!(WriteAction::DeleteFile.is_destructive());
        assert!(!WriteAction::Move.is_destructive());
    }

    #[tokio::test]
    async fn context_reports_cancellation() {
        let cancel = CancellationToken::new();
        let ctx = ToolContext::new("call_1", cancel.clone());
        assert!(ctx.check_cancelled().is_ok());
        cancel.cancel();
        assert!(matches!(ctx.check_cancelled(), Err(ToolError::Aborted)));
    }
}
