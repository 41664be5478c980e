//! Path validation: sandboxing local tools to the vault.
//!
//! Every path a local tool touches is relative to the vault root. Absolute
//! paths, `..` segments and forbidden prefixes (e.g. `.obsidian`, `.git`)
//! are rejected before any storage call is made.

use std::path::{Path, PathBuf};

/// Error returned when path validation fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathValidationError {
    #[error("Path '{path}' must be relative to the vault root")]
    Absolute { path: String },

    #[error("Path '{path}' matches forbidden pattern '{pattern}'")]
    ForbiddenPath { path: String, pattern: String },

    #[error("Path traversal detected in '{path}'")]
    PathTraversal { path: String },

    #[error("Path '{path}' contains invalid characters")]
    InvalidCharacters { path: String },

    #[error("'{path}' is {size} bytes, over the {limit} byte limit")]
    TooLarge { path: String, size: u64, limit: u64 },
}

/// A normalized, vault-relative path.
///
/// Segments are separated by `/`, with no empty, `.` or `..` segments. The
/// empty path is the vault root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VaultPath(String);

impl VaultPath {
    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.0.rsplit('/').next().filter(|s| !s.is_empty())
    }

    pub fn parent(&self) -> Option<VaultPath> {
        if self.is_root() {
            return None;
        }
        Some(match self.0.rfind('/') {
            Some(idx) => Self(self.0[..idx].to_string()),
            None => Self::root(),
        })
    }

    /// Append an already-validated single segment.
    pub fn child(&self, name: &str) -> VaultPath {
        if self.is_root() {
            Self(name.to_string())
        } else {
            Self(format!("{}/{name}", self.0))
        }
    }

    /// Resolve against the vault root on the host filesystem.
    pub fn to_host_path(&self, vault_root: &Path) -> PathBuf {
        self.0
            .split('/')
            .filter(|s| !s.is_empty())
            .fold(vault_root.to_path_buf(), |acc, seg| acc.join(seg))
    }

    /// Whether `self` is `other` or lies beneath it.
    pub fn starts_with(&self, other: &VaultPath) -> bool {
        other.is_root()
            || self.0 == other.0
            || (self.0.starts_with(&other.0) && self.0[other.0.len()..].starts_with('/'))
    }
}

impl std::fmt::Display for VaultPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_root() {
            f.write_str("/")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// Validate and normalize a vault-relative path.
///
/// Checks:
/// 1. Not absolute (no leading `/`, `\` or drive letter)
/// 2. No `..` segments
/// 3. No control characters
/// 4. Not under any forbidden prefix (case-insensitive, segment-aligned)
///
/// `""`, `"."` and `"./"` all name the vault root.
pub fn validate_vault_path(
    path: &str,
    forbidden_paths: &[String],
) -> Result<VaultPath, PathValidationError> {
    let raw = path.trim();
    let unified = raw.replace('\\', "/");

    if unified.starts_with('/') || has_drive_prefix(&unified) {
        return Err(PathValidationError::Absolute { path: path.into() });
    }

    if unified.chars().any(|c| c.is_control()) {
        return Err(PathValidationError::InvalidCharacters { path: path.into() });
    }

    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(PathValidationError::PathTraversal { path: path.into() }),
            s => segments.push(s),
        }
    }
    let normalized = VaultPath(segments.join("/"));

    let lowered = normalized.0.to_lowercase();
    for forbidden in forbidden_paths {
        let pattern = forbidden.trim().trim_matches('/').replace('\\', "/").to_lowercase();
        if pattern.is_empty() {
            continue;
        }
        if lowered == pattern || lowered.starts_with(&format!("{pattern}/")) {
            return Err(PathValidationError::ForbiddenPath {
                path: path.into(),
                pattern: forbidden.clone(),
            });
        }
    }

    Ok(normalized)
}

/// Enforce the per-file size ceiling.
pub fn check_size(path: &VaultPath, size: u64, limit: u64) -> Result<(), PathValidationError> {
    if size > limit {
        return Err(PathValidationError::TooLarge {
            path: path.to_string(),
            size,
            limit,
        });
    }
    Ok(())
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
