//! Command sandbox rooted at the agent's workspace.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

use crate::{BackendServer, SANDBOX};

/// Per-stream output cap.
pub const MAX_OUTPUT_BYTES: usize = 32768;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandOutcome {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

pub struct Sandbox {
    workspace_root: PathBuf,
}

impl Sandbox {
    pub fn new(workspace_root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&workspace_root)
            .with_context(|| format!("cannot create {}", workspace_root.display()))?;
        Ok(Self { workspace_root })
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Run `command` with `sh -c` inside the workspace.  Each call gets a
    /// fresh shell; `cd` does not persist between calls.
    pub async fn execute(&self, command: &str, timeout: Duration) -> Result<CommandOutcome> {
        debug!(command, timeout_secs = timeout.as_secs(), "sandbox exec");
        let output = tokio::time::timeout(
            timeout,
            tokio::process::Command::new("sh")
                .arg("-c")
                .arg(command)
                .current_dir(&self.workspace_root)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| anyhow::anyhow!("command timed out after {}s", timeout.as_secs()))??;

        Ok(CommandOutcome {
            exit_code: output.status.code(),
            stdout: truncate_output(&String::from_utf8_lossy(&output.stdout)),
            stderr: truncate_output(&String::from_utf8_lossy(&output.stderr)),
        })
    }
}

impl BackendServer for Sandbox {
    fn name(&self) -> &'static str {
        SANDBOX
    }
}

fn truncate_output(text: &str) -> String {
    if text.len() <= MAX_OUTPUT_BYTES {
        return text.to_string();
    }
    let end = truncate_byte_boundary(text, MAX_OUTPUT_BYTES);
    format!("{}…[truncated at {MAX_OUTPUT_BYTES} bytes]", &text[..end])
}

/// Largest byte offset ≤ `max` on a UTF-8 character boundary.
fn truncate_byte_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn runs_in_workspace() {
        let dir = TempDir::new().unwrap();
        let sandbox = Sandbox::new(dir.path().join("workspace")).unwrap();
        fs::write(sandbox.workspace_root().join("notes.txt"), "hi").unwrap();

        let out = sandbox.execute("ls && echo oops >&2", Duration::from_secs(5)).await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "notes.txt");
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn reports_exit_code() {
        let dir = TempDir::new().unwrap();
        let sandbox = Sandbox::new(dir.path().to_path_buf()).unwrap();
        let out = sandbox.execute("exit 3", Duration::from_secs(5)).await.unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert!(!out.success());
    }

    #[tokio::test]
    async fn times_out() {
        let dir = TempDir::new().unwrap();
        let sandbox = Sandbox::new(dir.path().to_path_buf()).unwrap();
        let err = sandbox.execute("sleep 5", Duration::from_millis(100)).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn truncates_on_char_boundary() {
        assert_eq!(truncate_byte_boundary("café", 4), 3);
        assert_eq!(truncate_byte_boundary("hi🎉", 3), 2);
        assert_eq!(truncate_byte_boundary("abc", 100), 3);

        let long = "é".repeat(MAX_OUTPUT_BYTES);
        let out = truncate_output(&long);
        assert!(out.ends_with("bytes]"));
        assert!(out.len() < long.len());
    }
}
