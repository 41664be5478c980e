//! Newline-delimited JSON over a child process's stdio.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use vaultpilot_core::error::ToolError;

/// Serialized writes of one JSON message per line.
pub(crate) struct LineWriter {
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl LineWriter {
    pub(crate) fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
        }
    }

    pub(crate) async fn send(&self, message: &str) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(message.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        tracing::trace!("Sent: {}", message);
        Ok(())
    }
}

/// Mask values of secret-looking variables for logging.
pub(crate) fn mask_env_value(key: &str, value: &str) -> String {
    let upper = key.to_ascii_uppercase();
    let secret = ["KEY", "TOKEN", "SECRET", "PASSWORD"]
        .iter()
        .any(|s| upper.contains(s));
    if !secret {
        return value.to_string();
    }
    let head: String = value.chars().take(4).collect();
    format!("{head}***")
}

/// Spawn a server process with piped stdio. The process dies with the handle.
pub(crate) fn spawn(
    server: &str,
    command: &str,
    args: &[String],
    env: &HashMap<String, String>,
    working_dir: &Path,
) -> Result<(Child, ChildStdout, ChildStdin), ToolError> {
    tracing::info!(server, "Spawning tool server: {} {:?}", command, args);
    for (k, v) in env {
        tracing::info!(server, "  env {}={}", k, mask_env_value(k, v));
    }

    let mut cmd = Command::new(command);
    cmd.args(args)
        .envs(env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .current_dir(working_dir)
        .kill_on_drop(true);

    let unavailable = |reason: String| ToolError::ServerUnavailable {
        server: server.to_string(),
        reason,
    };

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            unavailable(format!("command not found: {command}"))
        } else {
            unavailable(format!("failed to spawn {command}: {e}"))
        }
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| unavailable("no stdout".into()))?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| unavailable("no stdin".into()))?;

    Ok((child, stdout, stdin))
}
