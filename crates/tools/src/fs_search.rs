//! Full-text search over vault notes.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use vaultpilot_core::error::ToolError;
use vaultpilot_core::tool::{Tool, ToolContext, builtin};

use crate::args::{Args, flag, optional_str, optional_usize, required_str};
use crate::vault::Vault;

const DEFAULT_MAX_RESULTS: usize = 50;
const MAX_LINE_CHARS: usize = 200;

/// File extensions searched for text.
const TEXT_EXTENSIONS: &[&str] = &["md", "txt", "canvas", "csv", "json"];

pub struct FsSearchTool {
    vault: Arc<dyn Vault>,
}

impl FsSearchTool {
    pub fn new(vault: Arc<dyn Vault>) -> Self {
        Self { vault }
    }
}

fn is_text_file(path: &str) -> bool {
    path.rsplit_once('.')
        .is_some_and(|(_, ext)| TEXT_EXTENSIONS.iter().any(|t| t.eq_ignore_ascii_case(ext)))
}

fn snippet(line: &str) -> String {
    let trimmed = line.trim();
    if trimmed.chars().count() <= MAX_LINE_CHARS {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(MAX_LINE_CHARS).collect();
        format!("{cut}…")
    }
}

#[async_trait]
impl Tool for FsSearchTool {
    fn name(&self) -> &str {
        builtin::FS_SEARCH
    }

    fn description(&self) -> &str {
        "Search note names and contents in the vault for a piece of text."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Text to look for" },
                "path": { "type": "string", "description": "Folder to search in (default: whole vault)" },
                "case_sensitive": { "type": "boolean" },
                "max_results": { "type": "integer", "description": "Default 50" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: Args, ctx: &ToolContext) -> Result<String, ToolError> {
        let query = required_str(&arguments, "query")?.trim();
        if query.is_empty() {
            return Err(ToolError::InvalidArguments("'query' must not be empty".into()));
        }
        let root = self.vault.resolve(optional_str(&arguments, "path").unwrap_or(""))?;
        let case_sensitive = flag(&arguments, "case_sensitive");
        let max_results = optional_usize(&arguments, "max_results").unwrap_or(DEFAULT_MAX_RESULTS);

        let needle = if case_sensitive { query.to_string() } else { query.to_lowercase() };
        let normalize = |s: &str| if case_sensitive { s.to_string() } else { s.to_lowercase() };

        let mut matches = Vec::new();
        let mut truncated = false;
        let mut queue = VecDeque::from([root.clone()]);

        'walk: while let Some(dir) = queue.pop_front() {
            ctx.check_cancelled()?;
            for entry in self.vault.list(&dir).await? {
                if entry.is_dir {
                    queue.push_back(entry.path);
                    continue;
                }
                let path = entry.path.as_str();
                if normalize(entry.path.file_name().unwrap_or(path)).contains(&needle) {
                    if matches.len() >= max_results {
                        truncated = true;
                        break 'walk;
                    }
                    matches.push(serde_json::json!({ "path": path, "line": 0, "text": "(file name)" }));
                }
                if !is_text_file(path) || entry.size > self.vault.max_file_bytes() {
                    continue;
                }
                let Ok(content) = self.vault.read(&entry.path).await else {
                    continue;
                };
                for (idx, line) in content.lines().enumerate() {
                    if normalize(line).contains(&needle) {
                        if matches.len() >= max_results {
                            truncated = true;
                            break 'walk;
                        }
                        matches.push(serde_json::json!({
                            "path": path,
                            "line": idx + 1,
                            "text": snippet(line),
                        }));
                    }
                }
            }
        }

        Ok(serde_json::json!({
            "query": query,
            "matches": matches,
            "truncated": truncated,
        })
        .to_string())
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
    async fn finds_lines_case_insensitively() {
        let (dir, vault) = test_vault();
        std::fs::create_dir_all(dir.path().join("notes")).unwrap();
        std::fs::write(dir.path().join("notes/a.md"), "intro\nBuy Milk\n").unwrap();
        std::fs::write(dir.path().join("notes/b.md"), "nothing here").unwrap();
        std::fs::write(dir.path().join("image.png"), "milk").unwrap();

        let tool = FsSearchTool::new(vault);
        let out = tool
            .execute(args(serde_json::json!({"query": "milk"})), &ctx())
            .await
            .unwrap();
        let result: serde_json::Value = serde_json::from_str(&out).unwrap();
        let matches = result["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0]["path"], "notes/a.md");
        assert_eq!(matches[0]["line"], 2);
        assert_eq!(matches[0]["text"], "Buy Milk");
    }

    #[tokio::test]
    async fn matches_file_names_and_truncates() {
        let (dir, vault) = test_vault();
        std::fs::write(dir.path().join("project-alpha.md"), "project\nproject\n").unwrap();

        let tool = FsSearchTool::new(vault);
        let out = tool
            .execute(args(serde_json::json!({"query": "project", "max_results": 2})), &ctx())
            .await
            .unwrap();
        let result: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(result["matches"][0]["text"], "(file name)");
        assert_eq!(result["matches"].as_array().unwrap().len(), 2);
        assert_eq!(result["truncated"], true);
    }

    #[tokio::test]
    async fn empty_query_rejected() {
        let (_dir, vault) = test_vault();
        let tool = FsSearchTool::new(vault);
        let result = tool.execute(args(serde_json::json!({"query": "  "})), &ctx()).await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }
}
