//! Security module for vaultpilot: path sandboxing and tool-call permissions.
//!
//! Provides:
//! - **Path validation**: vault-relative paths only, no traversal, forbidden prefixes, size cap
//! - **Permissions**: auto-execute vs. approval decisions and per-conversation allowances

pub mod path;
pub mod permission;

pub use path::{PathValidationError, VaultPath, check_size, validate_vault_path};
pub use permission::{AllowanceSet, Decision, PermissionResolver, ToolPolicy, allowance_key};
