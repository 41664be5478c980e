//! `vaultpilot tools` and `vaultpilot skills`: inspect what the model can use.

use std::path::PathBuf;

use vaultpilot_core::tool::ToolDescriptor;

use super::{build_gateway, load_config, skill_store};

pub async fn list(vault: Option<PathBuf>, include_builtin: bool) -> anyhow::Result<()> {
    let config = load_config(vault)?;
    let gateway = build_gateway(&config).await;
    let tools = gateway.list_tools(include_builtin).await;

    if tools.is_empty() {
        println!("No tools available.");
        return Ok(());
    }
    for tool in &tools {
        println!("{}", describe(tool));
    }
    Ok(())
}

pub async fn skills(vault: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(vault)?;
    let skills = skill_store(&config).list().await;

    if skills.is_empty() {
        match &config.skills.dir {
            Some(dir) => println!("No skills found in {}", dir.display()),
            None => println!("No skills directory configured (set skills.dir)."),
        }
        return Ok(());
    }
    for skill in &skills {
        println!("{:<24} {}", skill.id, skill.name);
        if !skill.description.is_empty() {
            println!("{:<24} {}", "", skill.description);
        }
    }
    Ok(())
}

/// One line per tool: name, then the first line of its description.
fn describe(tool: &ToolDescriptor) -> String {
    let summary = tool.description.lines().next().unwrap_or_default();
    format!("{:<28} {summary}", tool.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_keeps_the_first_line() {
        let tool = ToolDescriptor {
            name: "search__query".into(),
            description: "Search the web.\nReturns ranked results.".into(),
            input_schema: serde_json::json!({"type": "object"}),
        };
        let line = describe(&tool);
        assert!(line.starts_with("search__query"));
        assert!(line.ends_with("Search the web."));
    }
}
