//! `vaultpilot config`: configuration management commands.

use anyhow::Context;
use vaultpilot_config::AppConfig;

pub fn init(force: bool) -> anyhow::Result<()> {
    let dir = AppConfig::config_dir();
    let path = dir.join("config.toml");
    if path.exists() && !force {
        println!("Config already exists at {} (use --force to overwrite)", path.display());
        return Ok(());
    }

    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    std::fs::write(&path, AppConfig::default_toml())
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    println!("Set vault.root and provider.api_key (or VAULTPILOT_API_KEY) before chatting.");
    Ok(())
}

pub fn show() -> anyhow::Result<()> {
    let mut config = AppConfig::load().context("failed to load config")?;
    if config.provider.api_key.is_some() {
        config.provider.api_key = Some("***".into());
    }
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn validate() -> anyhow::Result<()> {
    let config = AppConfig::load().context("config is invalid")?;

    let mut warnings = Vec::new();
    if !config.has_api_key() {
        warnings.push("No API key set (provider.api_key or VAULTPILOT_API_KEY)".to_string());
    }
    if !config.vault.root.is_dir() {
        warnings.push(format!("Vault root {} does not exist", config.vault.root.display()));
    }
    if let Some(dir) = &config.skills.dir
        && !dir.is_dir()
    {
        warnings.push(format!("Skills directory {} does not exist", dir.display()));
    }

    if warnings.is_empty() {
        println!("Config OK");
    } else {
        for warning in &warnings {
            println!("warning: {warning}");
        }
    }
    println!("Provider:  {} ({})", config.provider.name, config.provider.model);
    println!("Vault:     {}", config.vault.root.display());
    println!("Servers:   {}", config.tools.servers.len());
    Ok(())
}

pub fn path() {
    println!("{}", AppConfig::config_dir().join("config.toml").display());
}
