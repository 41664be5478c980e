//! Vault storage: the narrow file API local tools run against.
//!
//! Every method takes an already-validated [`VaultPath`]. [`FsVault`] maps
//! those onto a directory on disk with `tokio::fs`, refusing anything that
//! resolves outside the vault root (e.g. through a symlink).

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use vaultpilot_core::error::ToolError;
use vaultpilot_security::{VaultPath, check_size, validate_vault_path};

/// One file or folder in the vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultEntry {
    pub path: VaultPath,
    pub is_dir: bool,
    pub size: u64,
}

#[async_trait]
pub trait Vault: Send + Sync {
    /// Vault-relative prefixes no tool may touch.
    fn forbidden_paths(&self) -> &[String];

    /// Hard per-file size ceiling in bytes.
    fn max_file_bytes(&self) -> u64;

    /// Validate a raw, model-supplied path.
    fn resolve(&self, raw: &str) -> Result<VaultPath, ToolError> {
        validate_vault_path(raw, self.forbidden_paths())
            .map_err(|e| ToolError::SandboxViolation(e.to_string()))
    }

    async fn stat(&self, path: &VaultPath) -> Result<Option<VaultEntry>, ToolError>;

    /// Immediate children of a folder, sorted by path. Forbidden entries are omitted.
    async fn list(&self, dir: &VaultPath) -> Result<Vec<VaultEntry>, ToolError>;

    async fn read(&self, path: &VaultPath) -> Result<String, ToolError>;

    /// Create or overwrite a file, creating parent folders as needed.
    async fn write(&self, path: &VaultPath, content: &str) -> Result<(), ToolError>;

    async fn delete_file(&self, path: &VaultPath) -> Result<(), ToolError>;

    async fn create_dir(&self, path: &VaultPath) -> Result<(), ToolError>;

    /// Remove a folder and everything in it.
    async fn delete_dir(&self, path: &VaultPath) -> Result<(), ToolError>;

    async fn rename(&self, from: &VaultPath, to: &VaultPath) -> Result<(), ToolError>;
}

/// A vault backed by a directory on the local filesystem.
pub struct FsVault {
    root: PathBuf,
    forbidden_paths: Vec<String>,
    max_file_bytes: u64,
}

impl FsVault {
    pub fn new(
        root: impl Into<PathBuf>,
        forbidden_paths: Vec<String>,
        max_file_bytes: u64,
    ) -> Self {
        Self {
            root: root.into(),
            forbidden_paths,
            max_file_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map to a host path, rejecting symlinks that lead out of the vault.
    async fn host_path(&self, path: &VaultPath) -> Result<PathBuf, ToolError> {
        let host = path.to_host_path(&self.root);
        let root = tokio::fs::canonicalize(&self.root)
            .await
            .map_err(|e| io_error("open vault", &VaultPath::root(), e))?;

        // Canonicalize the deepest existing ancestor; the rest does not exist yet.
        let mut probe = host.clone();
        loop {
            match tokio::fs::canonicalize(&probe).await {
                Ok(resolved) => {
                    if !resolved.starts_with(&root) {
                        return Err(ToolError::SandboxViolation(format!(
                            "'{path}' resolves outside the vault"
                        )));
                    }
                    return Ok(host);
                }
                Err(_) => match probe.parent() {
                    Some(parent) if parent.starts_with(&self.root) => probe = parent.to_path_buf(),
                    _ => return Ok(host),
                },
            }
        }
    }
}

fn io_error(op: &str, path: &VaultPath, e: std::io::Error) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: "vault".into(),
        reason: format!("failed to {op} '{path}': {e}"),
    }
}

#[async_trait]
impl Vault for FsVault {
    fn forbidden_paths(&self) -> &[String] {
        &self.forbidden_paths
    }

    fn max_file_bytes(&self) -> u64 {
        self.max_file_bytes
    }

    async fn stat(&self, path: &VaultPath) -> Result<Option<VaultEntry>, ToolError> {
        let host = self.host_path(path).await?;
        match tokio::fs::metadata(&host).await {
            Ok(meta) => Ok(Some(VaultEntry {
                path: path.clone(),
                is_dir: meta.is_dir(),
                size: meta.len(),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error("stat", path, e)),
        }
    }

    async fn list(&self, dir: &VaultPath) -> Result<Vec<VaultEntry>, ToolError> {
        let host = self.host_path(dir).await?;
        let mut reader = tokio::fs::read_dir(&host)
            .await
            .map_err(|e| io_error("list", dir, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| io_error("list", dir, e))?
        {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let child = dir.child(&name);
            if validate_vault_path(child.as_str(), &self.forbidden_paths).is_err() {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            entries.push(VaultEntry {
                path: child,
                is_dir: meta.is_dir(),
                size: meta.len(),
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn read(&self, path: &VaultPath) -> Result<String, ToolError> {
        let host = self.host_path(path).await?;
        let meta = tokio::fs::metadata(&host)
            .await
            .map_err(|e| io_error("read", path, e))?;
        if meta.is_dir() {
            return Err(ToolError::InvalidArguments(format!("'{path}' is a folder, not a file")));
        }
        check_size(path, meta.len(), self.max_file_bytes)
            .map_err(|e| ToolError::SandboxViolation(e.to_string()))?;
        tokio::fs::read_to_string(&host)
            .await
            .map_err(|e| io_error("read", path, e))
    }

    async fn write(&self, path: &VaultPath, content: &str) -> Result<(), ToolError> {
        check_size(path, content.len() as u64, self.max_file_bytes)
            .map_err(|e| ToolError::SandboxViolation(e.to_string()))?;
        let host = self.host_path(path).await?;
        if let Some(parent) = host.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("create parent folders for", path, e))?;
        }
        tokio::fs::write(&host, content)
            .await
            .map_err(|e| io_error("write", path, e))
    }

    async fn delete_file(&self, path: &VaultPath) -> Result<(), ToolError> {
        let host = self.host_path(path).await?;
        tokio::fs::remove_file(&host)
            .await
            .map_err(|e| io_error("delete", path, e))
    }

    async fn create_dir(&self, path: &VaultPath) -> Result<(), ToolError> {
        let host = self.host_path(path).await?;
        tokio::fs::create_dir_all(&host)
            .await
            .map_err(|e| io_error("create folder", path, e))
    }

    async fn delete_dir(&self, path: &VaultPath) -> Result<(), ToolError> {
        if path.is_root() {
            return Err(ToolError::SandboxViolation("refusing to delete the vault root".into()));
        }
        let host = self.host_path(path).await?;
        tokio::fs::remove_dir_all(&host)
            .await
            .map_err(|e| io_error("delete folder", path, e))
    }

    async fn rename(&self, from: &VaultPath, to: &VaultPath) -> Result<(), ToolError> {
        let src = self.host_path(from).await?;
        let dst = self.host_path(to).await?;
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("create parent folders for", to, e))?;
        }
        tokio::fs::rename(&src, &dst)
            .await
            .map_err(|e| io_error("move", from, e))
    }
}

/// An [`FsVault`] rooted in a fresh temporary directory, for tests.
#[cfg(test)]
pub(crate) fn test_vault() -> (tempfile::TempDir, std::sync::Arc<FsVault>) {
    let dir = tempfile::tempdir().unwrap();
    let vault = FsVault::new(
        dir.path(),
        vec![".obsidian".into(), ".git".into(), ".trash".into()],
        1024,
    );
    (dir, std::sync::Arc::new(vault))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_read_and_list() {
        let (_dir, vault) = test_vault();
        let path = vault.resolve("notes/daily/today.md").unwrap();
        vault.write(&path, "# Today").await.unwrap();
        assert_eq!(vault.read(&path).await.unwrap(), "# Today");

        let notes = vault.resolve("notes").unwrap();
        let entries = vault.list(&notes).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path.as_str(), "notes/daily");
        assert!(entries[0].is_dir);
    }

    #[tokio::test]
    async fn listing_hides_forbidden_entries() {
        let (dir, vault) = test_vault();
        std::fs::create_dir(dir.path().join(".obsidian")).unwrap();
        std::fs::write(dir.path().join("a.md"), "a").unwrap();

        let entries = vault.list(&VaultPath::root()).await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(names, vec!["a.md"]);
    }

    #[tokio::test]
    async fn oversized_content_rejected() {
        let (_dir, vault) = test_vault();
        let path = vault.resolve("big.md").unwrap();
        let err = vault.write(&path, &"x".repeat(2048)).await.unwrap_err();
        assert!(matches!(err, ToolError::SandboxViolation(_)));
        assert!(vault.stat(&path).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resolve_rejects_escapes() {
        let (_dir, vault) = test_vault();
        assert!(vault.resolve("../outside.md").is_err());
        assert!(vault.resolve("/etc/passwd").is_err());
        assert!(vault.resolve(".git/config").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_out_of_vault_rejected() {
        let (dir, vault) = test_vault();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.md"), "s").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        let path = vault.resolve("link/secret.md").unwrap();
        assert!(matches!(
            vault.read(&path).await,
            Err(ToolError::SandboxViolation(_))
        ));
    }

    #[tokio::test]
    async fn rename_moves_into_new_folder() {
        let (_dir, vault) = test_vault();
        let from = vault.resolve("a.md").unwrap();
        let to = vault.resolve("archive/a.md").unwrap();
        vault.write(&from, "a").await.unwrap();
        vault.rename(&from, &to).await.unwrap();
        assert!(vault.stat(&from).await.unwrap().is_none());
        assert_eq!(vault.read(&to).await.unwrap(), "a");
    }
}
