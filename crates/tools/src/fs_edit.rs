//! Scoped text edit: replace a passage inside one note.
//!
//! The passage is located with [`crate::matching`]: exact first, then the
//! loose pass. Ambiguous matches are refused unless `replace_all` is set.

use async_trait::async_trait;
use std::sync::Arc;
use vaultpilot_core::error::ToolError;
use vaultpilot_core::tool::{Tool, ToolContext, builtin};

use crate::args::{self, Args, flag, required_str};
use crate::matching::{self, MatchKind};
use crate::vault::Vault;

pub struct FsEditTool {
    vault: Arc<dyn Vault>,
}

impl FsEditTool {
    pub fn new(vault: Arc<dyn Vault>) -> Self {
        Self { vault }
    }
}

#[async_trait]
impl Tool for FsEditTool {
    fn name(&self) -> &str {
        builtin::FS_EDIT
    }

    fn description(&self) -> &str {
        "Replace a passage of text inside an existing note. `old_text` must identify the passage uniquely unless `replace_all` is true."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "The note path, relative to the vault root" },
                "old_text": { "type": "string", "description": "The passage to replace" },
                "new_text": { "type": "string", "description": "The replacement text" },
                "replace_all": { "type": "boolean", "description": "Replace every occurrence" },
                "dry_run": { "type": "boolean", "description": "Describe the edit without saving it" }
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    fn supports_dry_run(&self) -> bool {
        true
    }

    async fn execute(&self, arguments: Args, ctx: &ToolContext) -> Result<String, ToolError> {
        let path = self.vault.resolve(required_str(&arguments, "path")?)?;
        let old_text = required_str(&arguments, "old_text")?;
        let new_text = required_str(&arguments, "new_text")?;
        let replace_all = flag(&arguments, "replace_all");
        let dry_run = args::dry_run(&arguments, ctx);

        if old_text.is_empty() {
            return Err(ToolError::InvalidArguments("'old_text' must not be empty".into()));
        }

        let content = self.vault.read(&path).await?;
        let Some(found) = matching::find_matches(&content, old_text) else {
            return Err(ToolError::InvalidArguments(format!(
                "The text to replace was not found in '{path}'"
            )));
        };

        if found.count() > 1 && !replace_all {
            return Err(ToolError::InvalidArguments(format!(
                "The text to replace matches {} places in '{path}' ({} match); include more surrounding text or set replace_all",
                found.count(),
                found.kind.as_str()
            )));
        }

        let ranges = if replace_all { &found.ranges[..] } else { &found.ranges[..1] };
        let updated = matching::apply(&content, ranges, new_text);

        let noun = if ranges.len() == 1 { "occurrence" } else { "occurrences" };
        let how = match found.kind {
            MatchKind::Exact => "exact match",
            MatchKind::Loose => "loose match, ignoring line endings and trailing whitespace",
        };

        if dry_run {
            return Ok(format!(
                "Would replace {} {noun} in '{path}' ({how}); note would be {} bytes",
                ranges.len(),
                updated.len()
            ));
        }

        ctx.check_cancelled()?;
        self.vault.write(&path, &updated).await?;
        Ok(format!("Replaced {} {noun} in '{path}' ({how})", ranges.len()))
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

    #[tokio::test]
    async fn exact_edit_applied() {
        let (dir, vault) = test_vault();
        std::fs::write(dir.path().join("todo.md"), "- [ ] milk\n- [ ] eggs\n").unwrap();

        let tool = FsEditTool::new(vault);
        let out = tool
            .execute(
                args(serde_json::json!({"path": "todo.md", "old_text": "- [ ] milk", "new_text": "- [x] milk"})),
                &ctx(),
            )
            .await
            .unwrap();
        assert!(out.contains("exact match"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("todo.md")).unwrap(),
            "- [x] milk\n- [ ] eggs\n"
        );
    }

    #[tokio::test]
    async fn loose_edit_reported_separately() {
        let (dir, vault) = test_vault();
        std::fs::write(dir.path().join("crlf.md"), "Title  \r\nbody\r\n").unwrap();

        let tool = FsEditTool::new(vault);
        let out = tool
            .execute(
                args(serde_json::json!({"path": "crlf.md", "old_text": "Title\nbody", "new_text": "# New"})),
                &ctx(),
            )
            .await
            .unwrap();
        assert!(out.contains("loose match"));
        assert_eq!(std::fs::read_to_string(dir.path().join("crlf.md")).unwrap(), "# New\r\n");
    }

    #[tokio::test]
    async fn ambiguous_edit_refused() {
        let (dir, vault) = test_vault();
        std::fs::write(dir.path().join("dup.md"), "x\nx\n").unwrap();

        let tool = FsEditTool::new(vault);
        let err = tool
            .execute(
                args(serde_json::json!({"path": "dup.md", "old_text": "x", "new_text": "y"})),
                &ctx(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("matches 2 places"));

        let out = tool
            .execute(
                args(serde_json::json!({"path": "dup.md", "old_text": "x", "new_text": "y", "replace_all": true})),
                &ctx(),
            )
            .await
            .unwrap();
        assert!(out.contains("2 occurrences"));
        assert_eq!(std::fs::read_to_string(dir.path().join("dup.md")).unwrap(), "y\ny\n");
    }

    #[tokio::test]
    async fn dry_run_leaves_note_untouched() {
        let (dir, vault) = test_vault();
        std::fs::write(dir.path().join("a.md"), "hello").unwrap();

        let tool = FsEditTool::new(vault);
        let out = tool
            .execute(
                args(serde_json::json!({"path": "a.md", "old_text": "hello", "new_text": "bye"})),
                &ctx().dry_run(),
            )
            .await
            .unwrap();
        assert!(out.starts_with("Would replace 1 occurrence"));
        assert_eq!(std::fs::read_to_string(dir.path().join("a.md")).unwrap(), "hello");
    }

    #[tokio::test]
    async fn missing_text_is_an_error() {
        let (dir, vault) = test_vault();
        std::fs::write(dir.path().join("a.md"), "hello").unwrap();
        let tool = FsEditTool::new(vault);
        let err = tool
            .execute(
                args(serde_json::json!({"path": "a.md", "old_text": "absent", "new_text": "x"})),
                &ctx(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
