//! Tool backends for vaultpilot.
//!
//! The local backend works against a [`Vault`]: listing, reading,
//! searching, scoped edits and writes, plus loading skill documents.
//! External tools come from process-based servers speaking JSON-RPC over
//! stdio. [`ToolGateway`] puts both behind one listing and one call path.

mod args;
pub mod fs_edit;
pub mod fs_list;
pub mod fs_read;
pub mod fs_search;
pub mod fs_write;
pub mod gateway;
pub mod matching;
pub mod open_skill;
pub mod skills;
pub mod stdio;
pub mod vault;

use std::sync::Arc;
use vaultpilot_core::tool::ToolRegistry;

pub use gateway::{ToolGateway, split_namespaced};
pub use skills::{DirectorySkillStore, Skill, SkillStore, StaticSkillStore};
pub use stdio::StdioToolServer;
pub use vault::{FsVault, Vault, VaultEntry};

/// The local backend: every built-in tool, bound to one vault and skill store.
pub fn local_registry(vault: Arc<dyn Vault>, skills: Arc<dyn SkillStore>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(fs_list::FsListTool::new(Arc::clone(&vault))));
    registry.register(Arc::new(fs_read::FsReadTool::new(Arc::clone(&vault))));
    registry.register(Arc::new(fs_search::FsSearchTool::new(Arc::clone(&vault))));
    registry.register(Arc::new(fs_edit::FsEditTool::new(Arc::clone(&vault))));
    registry.register(Arc::new(fs_write::FsWriteTool::new(vault)));
    registry.register(Arc::new(open_skill::OpenSkillTool::new(skills)));
    registry
}
