//! Skill documents: reusable instructions the model can load on demand.
//!
//! Skills live as `<dir>/<id>/SKILL.md`, optionally starting with a
//! `---`-delimited front-matter block carrying `name:` and `description:`.
//! Lookups match either the folder id or the display name, ignoring case.

use async_trait::async_trait;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skill {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Document body without the front-matter
    pub content: String,
}

impl Skill {
    /// Parse a SKILL.md document. Missing front-matter fields fall back to the id.
    pub fn parse(id: &str, document: &str) -> Self {
        let mut name = None;
        let mut description = None;
        let mut body = document;

        let trimmed = document.trim_start();
        if let Some(rest) = trimmed.strip_prefix("---")
            && let Some(end) = rest.find("\n---")
        {
            for line in rest[..end].lines() {
                if let Some((key, value)) = line.split_once(':') {
                    let value = value.trim().trim_matches('"').trim_matches('\'').to_string();
                    match key.trim() {
                        "name" if !value.is_empty() => name = Some(value),
                        "description" => description = Some(value),
                        _ => {}
                    }
                }
            }
            let after = &rest[end + "\n---".len()..];
            body = after.strip_prefix('\n').unwrap_or(after);
        }

        Self {
            id: id.to_string(),
            name: name.unwrap_or_else(|| id.to_string()),
            description: description.unwrap_or_default(),
            content: body.trim().to_string(),
        }
    }

    /// Whether `key` names this skill by id or name (case-insensitive).
    pub fn matches(&self, key: &str) -> bool {
        let key = key.trim();
        self.id.eq_ignore_ascii_case(key) || self.name.eq_ignore_ascii_case(key)
    }
}

#[async_trait]
pub trait SkillStore: Send + Sync {
    async fn list(&self) -> Vec<Skill>;

    async fn resolve(&self, key: &str) -> Option<Skill> {
        self.list().await.into_iter().find(|s| s.matches(key))
    }
}

/// Skills read from a directory on every lookup, so edits show up immediately.
pub struct DirectorySkillStore {
    dir: PathBuf,
}

impl DirectorySkillStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SkillStore for DirectorySkillStore {
    async fn list(&self) -> Vec<Skill> {
        let mut skills = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return skills;
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            if !entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                continue;
            }
            let path = entry.path();
            let Some(id) = path.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
                continue;
            };
            let skill_file = path.join("SKILL.md");
            match tokio::fs::read_to_string(&skill_file).await {
                Ok(document) => skills.push(Skill::parse(&id, &document)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!("Failed to load skill from {}: {}", skill_file.display(), e);
                }
            }
        }

        skills.sort_by(|a, b| a.id.cmp(&b.id));
        skills
    }
}

/// A fixed set of skills.
#[derive(Default)]
pub struct StaticSkillStore {
    skills: Vec<Skill>,
}

impl StaticSkillStore {
    pub fn new(skills: Vec<Skill>) -> Self {
        Self { skills }
    }
}

#[async_trait]
impl SkillStore for StaticSkillStore {
    async fn list(&self) -> Vec<Skill> {
        self.skills.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "---\nname: Weekly Review\ndescription: \"Close out the week\"\n---\n\n1. Collect loose notes\n";

    #[test]
    fn parses_front_matter() {
        let skill = Skill::parse("weekly-review", DOC);
        assert_eq!(skill.name, "Weekly Review");
        assert_eq!(skill.description, "Close out the week");
        assert_eq!(skill.content, "1. Collect loose notes");
    }

    #[test]
    fn missing_front_matter_uses_id() {
        let skill = Skill::parse("inbox", "Just do it.");
        assert_eq!(skill.name, "inbox");
        assert!(skill.description.is_empty());
        assert_eq!(skill.content, "Just do it.");
    }

    #[test]
    fn matches_id_or_name_case_insensitively() {
        let skill = Skill::parse("weekly-review", DOC);
        assert!(skill.matches("WEEKLY-REVIEW"));
        assert!(skill.matches("weekly review"));
        assert!(!skill.matches("daily"));
    }

    #[tokio::test]
    async fn directory_store_loads_skill_folders() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("weekly-review")).unwrap();
        std::fs::write(dir.path().join("weekly-review/SKILL.md"), DOC).unwrap();
        std::fs::create_dir(dir.path().join("empty")).unwrap();
        std::fs::write(dir.path().join("stray.md"), "not a skill").unwrap();

        let store = DirectorySkillStore::new(dir.path());
        let skills = store.list().await;
        assert_eq!(skills.len(), 1);
        assert_eq!(store.resolve("Weekly Review").await.unwrap().id, "weekly-review");
        assert!(store.resolve("empty").await.is_none());
    }

    #[tokio::test]
    async fn missing_directory_is_empty() {
        let store = DirectorySkillStore::new("/nonexistent/skills");
        assert!(store.list().await.is_empty());
    }
}
