//! File read tool: read note contents with vault path validation.

use async_trait::async_trait;
use std::sync::Arc;
use vaultpilot_core::error::ToolError;
use vaultpilot_core::tool::{Tool, ToolContext, builtin};

use crate::args::{Args, optional_usize, required_str};
use crate::vault::Vault;

pub struct FsReadTool {
    vault: Arc<dyn Vault>,
}

impl FsReadTool {
    pub fn new(vault: Arc<dyn Vault>) -> Self {
        Self { vault }
    }
}

#[async_trait]
impl Tool for FsReadTool {
    fn name(&self) -> &str {
        builtin::FS_READ
    }

    fn description(&self) -> &str {
        "Read the contents of a note in the vault, optionally a range of lines."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The note path, relative to the vault root"
                },
                "start_line": {
                    "type": "integer",
                    "description": "First line to return (1-based)"
                },
                "line_count": {
                    "type": "integer",
                    "description": "Number of lines to return"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, arguments: Args, ctx: &ToolContext) -> Result<String, ToolError> {
        let path = self.vault.resolve(required_str(&arguments, "path")?)?;
        ctx.check_cancelled()?;

        let content = self.vault.read(&path).await?;

        let start = optional_usize(&arguments, "start_line");
        let count = optional_usize(&arguments, "line_count");
        if start.is_none() && count.is_none() {
            return Ok(content);
        }

        let skip = start.unwrap_or(1).saturating_sub(1);
        let lines: Vec<&str> = content
            .lines()
            .skip(skip)
            .take(count.unwrap_or(usize::MAX))
            .collect();
        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::test_vault;
    use vaultpilot_core::CancellationToken;

    fn ctx() -> ToolContext {
        ToolContext::new("call_1", CancellationToken::new())
    }

    fn args(value: serde_json::Value) -> Args {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn tool_definition() {
        let (_dir, vault) = test_vault();
        let tool = FsReadTool::new(vault);
        assert_eq!(tool.name(), "fs_read");
        assert_eq!(tool.parameters_schema()["required"], serde_json::json!(["path"]));
    }

    #[tokio::test]
    async fn read_existing_note() {
        let (dir, vault) = test_vault();
        std::fs::write(dir.path().join("hello.md"), "Hello, vault!").unwrap();

        let tool = FsReadTool::new(vault);
        let out = tool
            .execute(args(serde_json::json!({"path": "hello.md"})), &ctx())
            .await
            .unwrap();
        assert_eq!(out, "Hello, vault!");
    }

    #[tokio::test]
    async fn read_line_range() {
        let (dir, vault) = test_vault();
        std::fs::write(dir.path().join("list.md"), "one\ntwo\nthree\nfour").unwrap();

        let tool = FsReadTool::new(vault);
        let out = tool
            .execute(
                args(serde_json::json!({"path": "list.md", "start_line": 2, "line_count": 2})),
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(out, "two\nthree");
    }

    #[tokio::test]
    async fn read_nonexistent_fails() {
        let (_dir, vault) = test_vault();
        let tool = FsReadTool::new(vault);
        let result = tool
            .execute(args(serde_json::json!({"path": "missing.md"})), &ctx())
            .await;
        assert!(matches!(result, Err(ToolError::ExecutionFailed { .. })));
    }

    #[tokio::test]
    async fn missing_path_argument() {
        let (_dir, vault) = test_vault();
        let tool = FsReadTool::new(vault);
        let result = tool.execute(Args::new(), &ctx()).await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn traversal_blocked() {
        let (_dir, vault) = test_vault();
        let tool = FsReadTool::new(vault);
        let result = tool
            .execute(args(serde_json::json!({"path": "../../etc/passwd"})), &ctx())
            .await;
        assert!(matches!(result, Err(ToolError::SandboxViolation(_))));
    }

    #[tokio::test]
    async fn oversized_note_blocked() {
        let (dir, vault) = test_vault();
        std::fs::write(dir.path().join("big.md"), "x".repeat(4096)).unwrap();
        let tool = FsReadTool::new(vault);
        let err = tool
            .execute(args(serde_json::json!({"path": "big.md"})), &ctx())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("limit"));
    }
}
