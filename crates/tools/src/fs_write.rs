//! File write tool: create, overwrite, move and delete vault entries.
//!
//! Every action supports `dry_run`, which performs the same validation and
//! reports what would happen without touching storage. Approval previews
//! rely on this.

use async_trait::async_trait;
use std::sync::Arc;
use vaultpilot_core::error::ToolError;
use vaultpilot_core::tool::builtin::{self, WriteAction};
use vaultpilot_core::tool::{Tool, ToolContext};
use vaultpilot_security::VaultPath;

use crate::args::{self, Args, optional_str, required_str};
use crate::vault::Vault;

pub struct FsWriteTool {
    vault: Arc<dyn Vault>,
}

impl FsWriteTool {
    pub fn new(vault: Arc<dyn Vault>) -> Self {
        Self { vault }
    }

    async fn write_file(
        &self,
        path: &VaultPath,
        content: &str,
        dry_run: bool,
    ) -> Result<String, ToolError> {
        if path.is_root() {
            return Err(ToolError::InvalidArguments("'path' must name a file".into()));
        }
        let existing = self.vault.stat(path).await?;
        if existing.as_ref().is_some_and(|e| e.is_dir) {
            return Err(ToolError::InvalidArguments(format!("'{path}' is a folder")));
        }
        let limit = self.vault.max_file_bytes();
        if content.len() as u64 > limit {
            return Err(ToolError::SandboxViolation(format!(
                "content is {} bytes, over the {limit} byte limit",
                content.len()
            )));
        }
        let verb = if existing.is_some() { "overwrite" } else { "create" };
        if dry_run {
            return Ok(format!("Would {verb} '{path}' ({} bytes)", content.len()));
        }
        self.vault.write(path, content).await?;
        Ok(format!("Successfully wrote {} bytes to '{path}'", content.len()))
    }

    async fn delete_file(&self, path: &VaultPath, dry_run: bool) -> Result<String, ToolError> {
        match self.vault.stat(path).await? {
            Some(entry) if !entry.is_dir => {
                if dry_run {
                    return Ok(format!("Would delete '{path}' ({} bytes)", entry.size));
                }
                self.vault.delete_file(path).await?;
                Ok(format!("Deleted '{path}'"))
            }
            Some(_) => Err(ToolError::InvalidArguments(format!(
                "'{path}' is a folder; use delete_dir"
            ))),
            None => Err(ToolError::InvalidArguments(format!("'{path}' does not exist"))),
        }
    }

    async fn create_dir(&self, path: &VaultPath, dry_run: bool) -> Result<String, ToolError> {
        match self.vault.stat(path).await? {
            Some(entry) if entry.is_dir => Ok(format!("Folder '{path}' already exists")),
            Some(_) => Err(ToolError::InvalidArguments(format!("'{path}' is a file"))),
            None if dry_run => Ok(format!("Would create folder '{path}'")),
            None => {
                self.vault.create_dir(path).await?;
                Ok(format!("Created folder '{path}'"))
            }
        }
    }

    async fn delete_dir(&self, path: &VaultPath, dry_run: bool) -> Result<String, ToolError> {
        if path.is_root() {
            return Err(ToolError::SandboxViolation("refusing to delete the vault root".into()));
        }
        match self.vault.stat(path).await? {
            Some(entry) if entry.is_dir => {
                if dry_run {
                    let children = self.vault.list(path).await?.len();
                    return Ok(format!(
                        "Would delete folder '{path}' and its {children} direct entries"
                    ));
                }
                self.vault.delete_dir(path).await?;
                Ok(format!("Deleted folder '{path}'"))
            }
            Some(_) => Err(ToolError::InvalidArguments(format!(
                "'{path}' is a file; use delete_file"
            ))),
            None => Err(ToolError::InvalidArguments(format!("'{path}' does not exist"))),
        }
    }

    async fn move_entry(
        &self,
        from: &VaultPath,
        to: &VaultPath,
        dry_run: bool,
    ) -> Result<String, ToolError> {
        if from.is_root() || to.is_root() {
            return Err(ToolError::InvalidArguments("cannot move the vault root".into()));
        }
        if self.vault.stat(from).await?.is_none() {
            return Err(ToolError::InvalidArguments(format!("'{from}' does not exist")));
        }
        if self.vault.stat(to).await?.is_some() {
            return Err(ToolError::InvalidArguments(format!("'{to}' already exists")));
        }
        if to.starts_with(from) {
            return Err(ToolError::InvalidArguments(format!(
                "cannot move '{from}' into itself"
            )));
        }
        if dry_run {
            return Ok(format!("Would move '{from}' to '{to}'"));
        }
        self.vault.rename(from, to).await?;
        Ok(format!("Moved '{from}' to '{to}'"))
    }
}

#[async_trait]
impl Tool for FsWriteTool {
    fn name(&self) -> &str {
        builtin::FS_WRITE
    }

    fn description(&self) -> &str {
        "Change the vault: write_file creates or overwrites a note, delete_file and delete_dir remove entries, create_dir makes a folder, move renames. Set dry_run to preview."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["write_file", "delete_file", "create_dir", "delete_dir", "move"]
                },
                "path": {
                    "type": "string",
                    "description": "Target path, relative to the vault root"
                },
                "content": {
                    "type": "string",
                    "description": "Full note content (write_file only)"
                },
                "destination": {
                    "type": "string",
                    "description": "New path (move only)"
                },
                "dry_run": {
                    "type": "boolean",
                    "description": "Validate and describe the change without applying it"
                }
            },
            "required": ["action", "path"]
        })
    }

    fn supports_dry_run(&self) -> bool {
        true
    }

    async fn execute(&self, arguments: Args, ctx: &ToolContext) -> Result<String, ToolError> {
        let action_name = required_str(&arguments, "action")?;
        let action = WriteAction::parse(action_name).ok_or_else(|| {
            ToolError::InvalidArguments(format!(
                "Unknown action '{action_name}'; expected write_file, delete_file, create_dir, delete_dir or move"
            ))
        })?;
        let path = self.vault.resolve(required_str(&arguments, "path")?)?;
        let dry_run = args::dry_run(&arguments, ctx);
        ctx.check_cancelled()?;

        tracing::debug!(action = action.as_str(), path = %path, dry_run, "fs_write");

        match action {
            WriteAction::WriteFile => {
                let content = required_str(&arguments, "content")?;
                self.write_file(&path, content, dry_run).await
            }
            WriteAction::DeleteFile => self.delete_file(&path, dry_run).await,
            WriteAction::CreateDir => self.create_dir(&path, dry_run).await,
            WriteAction::DeleteDir => self.delete_dir(&path, dry_run).await,
            WriteAction::Move => {
                let destination = optional_str(&arguments, "destination").ok_or_else(|| {
                    ToolError::InvalidArguments("Missing 'destination' argument".into())
                })?;
                let destination = self.vault.resolve(destination)?;
                self.move_entry(&path, &destination, dry_run).await
            }
        }
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
        let tool = FsWriteTool::new(vault);
        assert_eq!(tool.name(), "fs_write");
        let schema = tool.parameters_schema();
        assert_eq!(schema["required"], serde_json::json!(["action", "path"]));
        assert!(tool.supports_dry_run());
    }

    #[tokio::test]
    async fn write_creates_parent_dirs() {
        let (dir, vault) = test_vault();
        let tool = FsWriteTool::new(vault);
        let out = tool
            .execute(
                args(serde_json::json!({"action": "write_file", "path": "a/b/c.md", "content": "nested"})),
                &ctx(),
            )
            .await
            .unwrap();
        assert!(out.contains("6 bytes"));
        assert_eq!(std::fs::read_to_string(dir.path().join("a/b/c.md")).unwrap(), "nested");
    }

    #[tokio::test]
    async fn every_action_supports_dry_run() {
        let (dir, vault) = test_vault();
        std::fs::create_dir(dir.path().join("folder")).unwrap();
        std::fs::write(dir.path().join("folder/x.md"), "x").unwrap();
        std::fs::write(dir.path().join("note.md"), "n").unwrap();

        let tool = FsWriteTool::new(vault);
        let cases = [
            (serde_json::json!({"action": "write_file", "path": "note.md", "content": "new"}), "Would overwrite"),
            (serde_json::json!({"action": "delete_file", "path": "note.md"}), "Would delete 'note.md'"),
            (serde_json::json!({"action": "create_dir", "path": "fresh"}), "Would create folder"),
            (serde_json::json!({"action": "delete_dir", "path": "folder"}), "1 direct entries"),
            (serde_json::json!({"action": "move", "path": "note.md", "destination": "moved.md"}), "Would move"),
        ];
        for (input, expected) in cases {
            let mut input = args(input);
            input.insert("dry_run".into(), serde_json::Value::Bool(true));
            let out = tool.execute(input, &ctx()).await.unwrap();
            assert!(out.contains(expected), "{out}");
        }

        assert_eq!(std::fs::read_to_string(dir.path().join("note.md")).unwrap(), "n");
        assert!(dir.path().join("folder/x.md").exists());
        assert!(!dir.path().join("fresh").exists());
        assert!(!dir.path().join("moved.md").exists());
    }

    #[tokio::test]
    async fn context_dry_run_overrides_arguments() {
        let (dir, vault) = test_vault();
        std::fs::write(dir.path().join("note.md"), "n").unwrap();
        let tool = FsWriteTool::new(vault);
        let out = tool
            .execute(
                args(serde_json::json!({"action": "delete_file", "path": "note.md", "dry_run": false})),
                &ctx().dry_run(),
            )
            .await
            .unwrap();
        assert!(out.starts_with("Would delete"));
        assert!(dir.path().join("note.md").exists());
    }

    #[tokio::test]
    async fn delete_and_move() {
        let (dir, vault) = test_vault();
        std::fs::create_dir(dir.path().join("old")).unwrap();
        std::fs::write(dir.path().join("old/a.md"), "a").unwrap();
        let tool = FsWriteTool::new(vault);

        tool.execute(
            args(serde_json::json!({"action": "move", "path": "old/a.md", "destination": "new/a.md"})),
            &ctx(),
        )
        .await
        .unwrap();
        assert!(dir.path().join("new/a.md").exists());

        tool.execute(args(serde_json::json!({"action": "delete_dir", "path": "old"})), &ctx())
            .await
            .unwrap();
        assert!(!dir.path().join("old").exists());

        tool.execute(args(serde_json::json!({"action": "delete_file", "path": "new/a.md"})), &ctx())
            .await
            .unwrap();
        assert!(!dir.path().join("new/a.md").exists());
    }

    #[tokio::test]
    async fn invalid_requests_rejected() {
        let (dir, vault) = test_vault();
        std::fs::write(dir.path().join("a.md"), "a").unwrap();
        let tool = FsWriteTool::new(vault);

        let err = tool
            .execute(args(serde_json::json!({"action": "shred", "path": "a.md"})), &ctx())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unknown action"));

        let err = tool
            .execute(args(serde_json::json!({"action": "delete_dir", "path": ""})), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::SandboxViolation(_)));

        let err = tool
            .execute(args(serde_json::json!({"action": "write_file", "path": ".obsidian/app.json", "content": "{}"})), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::SandboxViolation(_)));

        let err = tool
            .execute(args(serde_json::json!({"action": "move", "path": "a.md"})), &ctx())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("destination"));
    }
}
