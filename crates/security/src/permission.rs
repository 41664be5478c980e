//! Tool-call permissions.
//!
//! Decides, per requested call, whether it may run right away, must wait
//! for a human, or is refused outright. Approvals granted during a
//! conversation live in an [`AllowanceSet`] owned by whoever owns the
//! conversation; nothing here is process-global.

use std::collections::HashSet;

use serde_json::{Map, Value};
use tracing::debug;
use vaultpilot_core::ToolCallRequest;
use vaultpilot_core::tool::NAMESPACE_SEPARATOR;
use vaultpilot_core::tool::builtin::{self, WriteAction};

/// Per-conversation set of pre-approved allowance keys.
#[derive(Debug, Clone, Default)]
pub struct AllowanceSet {
    keys: HashSet<String>,
}

impl AllowanceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the key was newly granted.
    pub fn grant(&mut self, key: impl Into<String>) -> bool {
        self.keys.insert(key.into())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// The allowance key for a request.
///
/// The tool name, except for `fs_write`, whose key also names the action
/// (`fs_write:delete_file`), so approving one write action never approves
/// another.
pub fn allowance_key(request: &ToolCallRequest) -> String {
    if request.name == builtin::FS_WRITE
        && let Some(action) = write_action(request)
    {
        return format!("{}:{}", builtin::FS_WRITE, action.as_str());
    }
    request.name.clone()
}

fn parsed_args(request: &ToolCallRequest) -> Option<Map<String, Value>> {
    request.arguments.parse().ok()
}

fn write_action(request: &ToolCallRequest) -> Option<WriteAction> {
    parsed_args(request)?
        .get("action")
        .and_then(Value::as_str)
        .and_then(WriteAction::parse)
}

/// What the tool backends say about a tool, independent of any conversation.
pub trait ToolPolicy: Send + Sync {
    /// External tools only: whether configuration opts the tool into auto-execution.
    fn auto_executes(&self, tool_name: &str) -> bool;
}

/// Outcome of a permission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Seed the call as `running` and execute it now
    Execute,
    /// Seed the call as `pending_approval`
    RequireApproval,
    /// Resolve the call locally as `error` with this reason
    Deny(String),
}

/// Stateless permission policy; all state is passed in per check.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionResolver;

impl PermissionResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn decide(
        &self,
        request: &ToolCallRequest,
        allowances: &AllowanceSet,
        allowed_skills: &[String],
        policy: &dyn ToolPolicy,
    ) -> Decision {
        let name = request.name.as_str();

        if name == builtin::OPEN_SKILL {
            return self.check_skill(request, allowed_skills);
        }

        let decision = if builtin::AUTO_EXECUTE.contains(&name) {
            Decision::Execute
        } else if name == builtin::FS_WRITE {
            match write_action(request) {
                Some(action) if action.is_destructive() => {
                    if allowances.contains(&allowance_key(request)) {
                        Decision::Execute
                    } else {
                        Decision::RequireApproval
                    }
                }
                // Unknown or missing actions fail validation in the tool without mutating.
                _ => Decision::Execute,
            }
        } else if name.contains(NAMESPACE_SEPARATOR) {
            if policy.auto_executes(name) || allowances.contains(name) {
                Decision::Execute
            } else {
                Decision::RequireApproval
            }
        } else if allowances.contains(name) {
            Decision::Execute
        } else {
            Decision::RequireApproval
        };

        debug!(tool = %name, call_id = %request.id, ?decision, "Permission decision");
        decision
    }

    fn check_skill(&self, request: &ToolCallRequest, allowed_skills: &[String]) -> Decision {
        if allowed_skills.is_empty() {
            return Decision::Deny("No skills are enabled for this conversation.".into());
        }

        let requested = parsed_args(request).and_then(|args| {
            ["id", "name"]
                .iter()
                .find_map(|k| args.get(*k).and_then(Value::as_str).map(|s| s.trim().to_string()))
                .filter(|s| !s.is_empty())
        });

        let Some(requested) = requested else {
            return Decision::Deny("open_skill requires an 'id' or 'name' argument.".into());
        };

        if allowed_skills
            .iter()
            .any(|allowed| allowed.trim().eq_ignore_ascii_case(&requested))
        {
            Decision::Execute
        } else {
            Decision::Deny(format!(
                "Skill '{requested}' is not enabled for this conversation. Enabled skills: {}",
                allowed_skills.join(", ")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultpilot_core::ToolArguments;

    struct Policy(&'static [&'static str]);

    impl ToolPolicy for Policy {
        fn auto_executes(&self, tool_name: &str) -> bool {
            self.0.contains(&tool_name)
        }
    }

    fn call(name: &str, args: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: "call_1".into(),
            name: name.into(),
            arguments: ToolArguments::Text(args.into()),
        }
    }

    fn decide(request: &ToolCallRequest, allowances: &AllowanceSet) -> Decision {
        PermissionResolver::new().decide(request, allowances, &[], &Policy(&[]))
    }

    #[test]
    fn lookup_and_edit_tools_auto_execute() {
        let none = AllowanceSet::new();
        for name in builtin::AUTO_EXECUTE.iter().filter(|n| **n != builtin::OPEN_SKILL) {
            assert_eq!(decide(&call(name, "{}"), &none), Decision::Execute, "{name}");
        }
    }

    #[test]
    fn non_destructive_writes_auto_execute() {
        let none = AllowanceSet::new();
        for action in ["write_file", "create_dir", "move"] {
            let req = call("fs_write", &format!(r#"{{"action":"{action}","path":"a.md"}}"#));
            assert_eq!(decide(&req, &none), Decision::Execute);
        }
    }

    #[test]
    fn delete_needs_delete_specific_allowance() {
        let req = call("fs_write", r#"{"action":"delete_file","path":"a.md"}"#);
        assert_eq!(allowance_key(&req), "fs_write:delete_file");

        let mut allowances = AllowanceSet::new();
        allowances.grant("fs_write");
        allowances.grant("fs_write:write_file");
        assert_eq!(decide(&req, &allowances), Decision::RequireApproval);

        allowances.grant("fs_write:delete_dir");
        assert_eq!(decide(&req, &allowances), Decision::RequireApproval);

        allowances.grant("fs_write:delete_file");
        assert_eq!(decide(&req, &allowances), Decision::Execute);
    }

    #[test]
    fn external_tools_need_opt_in_or_allowance() {
        let req = call("search__query", r#"{"q":"x"}"#);
        let none = AllowanceSet::new();
        let resolver = PermissionResolver::new();

        assert_eq!(resolver.decide(&req, &none, &[], &Policy(&[])), Decision::RequireApproval);
        assert_eq!(
            resolver.decide(&req, &none, &[], &Policy(&["search__query"])),
            Decision::Execute
        );

        let mut allowances = AllowanceSet::new();
        assert!(allowances.grant(allowance_key(&req)));
        assert!(!allowances.grant("search__query"));
        assert_eq!(resolver.decide(&req, &allowances, &[], &Policy(&[])), Decision::Execute);
    }

    #[test]
    fn skill_gate() {
        let resolver = PermissionResolver::new();
        let none = AllowanceSet::new();
        let req = call("open_skill", r#"{"id":"Weekly-Review"}"#);

        assert!(matches!(
            resolver.decide(&req, &none, &[], &Policy(&[])),
            Decision::Deny(reason) if reason.contains("No skills")
        ));

        let allowed = vec!["weekly-review".to_string()];
        assert_eq!(resolver.decide(&req, &none, &allowed, &Policy(&[])), Decision::Execute);

        let other = call("open_skill", r#"{"name":"tax-prep"}"#);
        assert!(matches!(
            resolver.decide(&other, &none, &allowed, &Policy(&[])),
            Decision::Deny(reason) if reason.contains("tax-prep")
        ));

        let missing = call("open_skill", "{}");
        assert!(matches!(
            resolver.decide(&missing, &none, &allowed, &Policy(&[])),
            Decision::Deny(_)
        ));
    }

    #[test]
    fn malformed_write_arguments_execute_and_fail_in_the_tool() {
        let req = call("fs_write", r#"{"action":"#);
        assert_eq!(allowance_key(&req), "fs_write");
        assert_eq!(decide(&req, &AllowanceSet::new()), Decision::Execute);
    }
}
