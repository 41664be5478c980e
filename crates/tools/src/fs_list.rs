//! Folder listing tool.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use vaultpilot_core::error::ToolError;
use vaultpilot_core::tool::{Tool, ToolContext, builtin};

use crate::args::{Args, flag, optional_str, optional_usize};
use crate::vault::{Vault, VaultEntry};

const DEFAULT_MAX_ENTRIES: usize = 500;

pub struct FsListTool {
    vault: Arc<dyn Vault>,
}

impl FsListTool {
    pub fn new(vault: Arc<dyn Vault>) -> Self {
        Self { vault }
    }
}

fn entry_json(entry: &VaultEntry) -> serde_json::Value {
    if entry.is_dir {
        serde_json::json!({ "path": entry.path.as_str(), "type": "folder" })
    } else {
        serde_json::json!({ "path": entry.path.as_str(), "type": "file", "size": entry.size })
    }
}

#[async_trait]
impl Tool for FsListTool {
    fn name(&self) -> &str {
        builtin::FS_LIST
    }

    fn description(&self) -> &str {
        "List files and folders in the vault. Paths are relative to the vault root."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Folder to list, relative to the vault root (empty for the root)"
                },
                "recursive": {
                    "type": "boolean",
                    "description": "Include everything below the folder"
                },
                "max_entries": {
                    "type": "integer",
                    "description": "Maximum number of entries to return (default 500)"
                }
            }
        })
    }

    async fn execute(&self, arguments: Args, ctx: &ToolContext) -> Result<String, ToolError> {
        let dir = self.vault.resolve(optional_str(&arguments, "path").unwrap_or(""))?;
        let recursive = flag(&arguments, "recursive");
        let max_entries = optional_usize(&arguments, "max_entries").unwrap_or(DEFAULT_MAX_ENTRIES);

        match self.vault.stat(&dir).await? {
            Some(entry) if entry.is_dir => {}
            Some(_) => {
                return Err(ToolError::InvalidArguments(format!("'{dir}' is a file, not a folder")));
            }
            None => return Err(ToolError::InvalidArguments(format!("Folder '{dir}' does not exist"))),
        }

        let mut entries = Vec::new();
        let mut truncated = false;
        let mut queue = VecDeque::from([dir.clone()]);

        'walk: while let Some(current) = queue.pop_front() {
            ctx.check_cancelled()?;
            for entry in self.vault.list(&current).await? {
                if entries.len() >= max_entries {
                    truncated = true;
                    break 'walk;
                }
                if recursive && entry.is_dir {
                    queue.push_back(entry.path.clone());
                }
                entries.push(entry_json(&entry));
            }
        }

        let listing = serde_json::json!({
            "path": dir.to_string(),
            "entries": entries,
            "truncated": truncated,
        });
        Ok(listing.to_string())
    }
}
