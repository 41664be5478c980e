pub mod chat;
pub mod config_cmd;
pub mod tools;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use vaultpilot_config::AppConfig;
use vaultpilot_tools::{
    DirectorySkillStore, FsVault, SkillStore, StaticSkillStore, ToolGateway, local_registry,
};

/// Load the config file, applying a command-line vault override.
pub fn load_config(vault: Option<PathBuf>) -> anyhow::Result<AppConfig> {
    let mut config = AppConfig::load().context("failed to load config")?;
    if let Some(root) = vault {
        config.vault.root = root;
    }
    if !config.vault.root.is_dir() {
        anyhow::bail!("vault root '{}' is not a directory", config.vault.root.display());
    }
    Ok(config)
}

pub fn skill_store(config: &AppConfig) -> Arc<dyn SkillStore> {
    match &config.skills.dir {
        Some(dir) => Arc::new(DirectorySkillStore::new(dir)),
        None => Arc::new(StaticSkillStore::default()),
    }
}

/// Vault tools plus every configured external server.
pub async fn build_gateway(config: &AppConfig) -> Arc<ToolGateway> {
    let vault = Arc::new(FsVault::new(
        &config.vault.root,
        config.vault.forbidden_paths.clone(),
        config.vault.max_file_bytes,
    ));
    let local = local_registry(vault, skill_store(config));
    Arc::new(ToolGateway::from_config(local, &config.tools, &config.vault.root).await)
}
