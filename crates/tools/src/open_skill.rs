//! Skill loading tool.
//!
//! Which skills a run may open is decided before the call gets here; this
//! tool only resolves and renders the document.

use async_trait::async_trait;
use std::sync::Arc;
use vaultpilot_core::error::ToolError;
use vaultpilot_core::tool::{Tool, ToolContext, builtin};

use crate::args::{Args, optional_str};
use crate::skills::SkillStore;

pub struct OpenSkillTool {
    store: Arc<dyn SkillStore>,
}

impl OpenSkillTool {
    pub fn new(store: Arc<dyn SkillStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for OpenSkillTool {
    fn name(&self) -> &str {
        builtin::OPEN_SKILL
    }

    fn description(&self) -> &str {
        "Load the full instructions of an enabled skill by id or name."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "Skill id" },
                "name": { "type": "string", "description": "Skill name (alternative to id)" }
            }
        })
    }

    async fn execute(&self, arguments: Args, _ctx: &ToolContext) -> Result<String, ToolError> {
        let key = optional_str(&arguments, "id")
            .or_else(|| optional_str(&arguments, "name"))
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'id' or 'name' argument".into()))?;

        let skill = self
            .store
            .resolve(key)
            .await
            .ok_or_else(|| ToolError::NotFound(format!("skill '{key}'")))?;

        let mut out = format!("# Skill: {}\n", skill.name);
        if !skill.description.is_empty() {
            out.push_str(&format!("\n{}\n", skill.description));
        }
        out.push_str(&format!("\n{}", skill.content));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::{Skill, StaticSkillStore};
    use vaultpilot_core::CancellationToken;

    fn tool() -> OpenSkillTool {
        let store = StaticSkillStore::new(vec![Skill::parse(
            "weekly-review",
            "---\nname: Weekly Review\ndescription: Close the week\n---\nStep one.",
        )]);
        OpenSkillTool::new(Arc::new(store))
    }

    fn ctx() -> ToolContext {
        ToolContext::new("call_1", CancellationToken::new())
    }

    #[tokio::test]
    async fn renders_skill_document() {
        let args = serde_json::json!({"name": "weekly review"}).as_object().cloned().unwrap();
        let out = tool().execute(args, &ctx()).await.unwrap();
        assert_eq!(out, "# Skill: Weekly Review\n\nClose the week\n\nStep one.");
    }

    #[tokio::test]
    async fn unknown_skill_not_found() {
        let args = serde_json::json!({"id": "nope"}).as_object().cloned().unwrap();
        let err = tool().execute(args, &ctx()).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }
}
