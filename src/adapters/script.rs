//! Subprocess runner for shell and interpreter scripts.
//!
//! Scripts run with a cleared environment that contains only the assignment
//! list built for the event plus the host `PATH`. Stdout and stderr are
//! captured into one file so the payload keeps the order the script wrote it.

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::debug;

/// Output from a script execution
#[derive(Debug, Clone)]
pub struct ScriptOutput {
    /// Interleaved stdout and stderr
    pub output: String,
    /// Exit code (None if terminated by signal)
    pub exit_code: Option<i32>,
    /// Whether the script exited with code 0
    pub success: bool,
}

/// Runs interpreter processes
#[derive(Debug, Clone, Default)]
pub struct ScriptRunner;

impl ScriptRunner {
    pub fn new() -> Self {
        Self
    }

    /// Run `program args...` with exactly `env` (plus `PATH`) as environment.
    ///
    /// An `Err` means the process could not be started; a nonzero exit is
    /// reported through [`ScriptOutput::success`].
    pub async fn run(
        &self,
        program: &str,
        args: &[&Path],
        env: &[(String, String)],
    ) -> Result<ScriptOutput> {
        let mut capture = tempfile::tempfile().context("Failed to create output capture file")?;
        let stderr_handle = capture
            .try_clone()
            .context("Failed to share output capture file")?;
        let stdout_handle = capture
            .try_clone()
            .context("Failed to share output capture file")?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .env_clear()
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_handle))
            .stderr(Stdio::from(stderr_handle));

        if let Ok(path) = std::env::var("PATH") {
            cmd.env("PATH", path);
        }

        debug!(program, ?args, env_count = env.len(), "Spawning script");

        let status = cmd
            .status()
            .await
            .with_context(|| format!("Failed to spawn {} process", program))?;

        let mut bytes = Vec::new();
        capture
            .seek(SeekFrom::Start(0))
            .context("Failed to rewind output capture file")?;
        capture
            .read_to_end(&mut bytes)
            .context("Failed to read script output")?;

        Ok(ScriptOutput {
            output: String::from_utf8_lossy(&bytes).into_owned(),
            exit_code: status.code(),
            success: status.success(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_runs_with_given_environment_only() {
        let temp = TempDir::new().unwrap();
        let script = temp.path().join("env.sh");
        std::fs::write(&script, "echo \"project=$PROJECT home=${HOME:-unset}\"\n").unwrap();

        let runner = ScriptRunner::new();
        let out = runner
            .run(
                "bash",
                &[script.as_path()],
                &[("PROJECT".to_string(), "sockshop".to_string())],
            )
            .await
            .unwrap();

        assert!(out.success);
        assert_eq!(out.exit_code, Some(0));
        assert_eq!(out.output.trim(), "project=sockshop home=unset");
    }

    #[tokio::test]
    async fn test_captures_stderr_and_exit_code() {
        let temp = TempDir::new().unwrap();
        let script = temp.path().join("fail.sh");
        std::fs::write(&script, "echo out\necho err >&2\nexit 3\n").unwrap();

        let out = ScriptRunner::new()
            .run("bash", &[script.as_path()], &[])
            .await
            .unwrap();

        assert!(!out.success);
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.output, "out\nerr\n");
    }

    #[tokio::test]
    async fn test_spawn_failure_is_error() {
        let result = ScriptRunner::new()
            .run("definitely-not-an-interpreter-xyz", &[], &[])
            .await;
        assert!(result.is_err());
    }
}
