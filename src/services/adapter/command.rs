//! External command execution for adapters.
//!
//! Publishing tools are opaque: they run to completion under a
//! descriptor-declared timeout and are only killed when that timeout
//! expires. Output is captured whole so adapters can parse the tool's
//! structured output and fall back to exit-code semantics otherwise.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::AdapterError;
use crate::tools::get_tool_path;

/// Captured result of one external command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status_code == Some(0)
    }

    /// One-line failure description for transaction diagnostics.
    pub fn failure_summary(&self) -> String {
        if self.timed_out {
            return "timed out".to_string();
        }
        let stderr_tail = self
            .stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("")
            .trim();
        match self.status_code {
            Some(code) if stderr_tail.is_empty() => format!("exit code {}", code),
            Some(code) => format!("exit code {}: {}", code, stderr_tail),
            None => "killed by signal".to_string(),
        }
    }

    /// Case-insensitive search across both output streams.
    pub fn output_contains(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.stdout.to_lowercase().contains(&needle)
            || self.stderr.to_lowercase().contains(&needle)
    }
}

/// Runs adapter commands with a default timeout
#[derive(Clone)]
pub struct CommandRunner {
    default_timeout: Duration,
}

impl CommandRunner {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    /// Run a command under the default timeout.
    pub async fn run(
        &self,
        argv: &[String],
        cwd: Option<&Path>,
        envs: &[(String, String)],
    ) -> Result<CommandOutput, AdapterError> {
        self.run_with_timeout(argv, cwd, envs, self.default_timeout)
            .await
    }

    /// Run a command, feeding `input` on stdin (e.g. `docker login
    /// --password-stdin`), under the default timeout.
    pub async fn run_with_stdin(
        &self,
        argv: &[String],
        cwd: Option<&Path>,
        envs: &[(String, String)],
        input: &str,
    ) -> Result<CommandOutput, AdapterError> {
        self.execute(argv, cwd, envs, Some(input), self.default_timeout)
            .await
    }

    /// Run a command under an explicit timeout.
    pub async fn run_with_timeout(
        &self,
        argv: &[String],
        cwd: Option<&Path>,
        envs: &[(String, String)],
        timeout: Duration,
    ) -> Result<CommandOutput, AdapterError> {
        self.execute(argv, cwd, envs, None, timeout).await
    }

    async fn execute(
        &self,
        argv: &[String],
        cwd: Option<&Path>,
        envs: &[(String, String)],
        stdin: Option<&str>,
        timeout: Duration,
    ) -> Result<CommandOutput, AdapterError> {
        let program = argv.first().ok_or_else(|| AdapterError::SpawnFailed {
            command: String::new(),
            message: "empty command".to_string(),
        })?;
        let resolved = get_tool_path(program);

        let mut cmd = Command::new(&resolved);
        cmd.args(&argv[1..])
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in envs {
            cmd.env(key, value);
        }

        tracing::debug!(command = %argv.join(" "), "Running external command");

        let mut child = cmd.spawn().map_err(|e| AdapterError::SpawnFailed {
            command: argv.join(" "),
            message: e.to_string(),
        })?;

        if let Some(input) = stdin {
            if let Some(mut handle) = child.stdin.take() {
                let bytes = input.as_bytes().to_vec();
                // Closing the handle after the write signals EOF.
                let _ = handle.write_all(&bytes).await;
            }
        }

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(CommandOutput {
                status_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                timed_out: false,
            }),
            Ok(Err(e)) => Err(AdapterError::SpawnFailed {
                command: argv.join(" "),
                message: e.to_string(),
            }),
            // kill_on_drop reaps the child once the future is dropped
            Err(_) => Ok(CommandOutput {
                status_code: None,
                stdout: String::new(),
                stderr: String::new(),
                timed_out: true,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_successful_command_captures_stdout() {
        let runner = CommandRunner::new(Duration::from_secs(5));
        let output = runner
            .run(&argv(&["echo", "hello"]), None, &[])
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_nonzero_exit_reported() {
        let runner = CommandRunner::new(Duration::from_secs(5));
        let output = runner
            .run(&argv(&["sh", "-c", "echo oops >&2; exit 3"]), None, &[])
            .await
            .unwrap();
        assert!(!output.success());
        assert_eq!(output.status_code, Some(3));
        assert!(output.failure_summary().contains("oops"));
    }

    #[tokio::test]
    async fn test_timeout_reported_not_errored() {
        let runner = CommandRunner::new(Duration::from_millis(100));
        let output = runner
            .run(&argv(&["sleep", "5"]), None, &[])
            .await
            .unwrap();
        assert!(output.timed_out);
        assert!(!output.success());
        assert_eq!(output.failure_summary(), "timed out");
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_failure() {
        let runner = CommandRunner::new(Duration::from_secs(5));
        let result = runner
            .run(&argv(&["definitely-not-a-real-binary-xyz"]), None, &[])
            .await;
        assert!(matches!(result, Err(AdapterError::SpawnFailed { .. })));
    }

    #[tokio::test]
    async fn test_env_passed_through() {
        let runner = CommandRunner::new(Duration::from_secs(5));
        let output = runner
            .run(
                &argv(&["sh", "-c", "echo $ARMADA_TEST_VAR"]),
                None,
                &[("ARMADA_TEST_VAR".to_string(), "present".to_string())],
            )
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "present");
    }

    #[tokio::test]
    async fn test_output_contains_is_case_insensitive() {
        let output = CommandOutput {
            status_code: Some(1),
            stdout: String::new(),
            stderr: "ERROR: File Already Exists".to_string(),
            timed_out: false,
        };
        assert!(output.output_contains("already exists"));
    }
}
