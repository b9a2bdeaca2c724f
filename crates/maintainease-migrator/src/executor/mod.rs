//! External command execution.
//!
//! Every subprocess goes through [`CommandRunner`], which bounds the wait with
//! a timeout and a [`CancellationToken`]. The child is spawned with
//! `kill_on_drop`, so abandoning the wait (timeout or cancel) kills it.
//!
//! Secrets are passed through [`CommandSpec::env`] only. The display form of a
//! command never contains them.

mod ef;
pub mod parse;

pub use ef::{EfCommand, EfVerb, CONNECTION_ENV_VAR};

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{MigrateError, Result};

/// Lines of output kept in failure messages.
pub const OUTPUT_TAIL_LINES: usize = 20;

/// A fully described subprocess invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    env: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an environment variable. Values are never displayed.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env_keys(&self) -> impl Iterator<Item = &str> {
        self.env.iter().map(|(k, _)| k.as_str())
    }

    /// Shell-like rendering for logs and error messages.
    pub fn display(&self) -> String {
        let program = self
            .program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string());
        let mut rendered = program;
        for arg in &self.args {
            rendered.push(' ');
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                rendered.push_str(&format!("\"{}\"", arg));
            } else {
                rendered.push_str(arg);
            }
        }
        rendered
    }
}

/// Captured result of a finished subprocess.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last `n` non-empty lines of stderr followed by stdout.
    pub fn tail(&self, n: usize) -> String {
        let lines: Vec<&str> = self
            .stderr
            .lines()
            .chain(self.stdout.lines())
            .filter(|l| !l.trim().is_empty())
            .collect();
        let start = lines.len().saturating_sub(n);
        lines[start..].join("\n")
    }
}

/// Runs commands with a timeout and cancellation.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
    cancel: CancellationToken,
}

impl CommandRunner {
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self { timeout, cancel }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run to completion and capture output. Any exit code is returned as-is.
    pub async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        if self.cancel.is_cancelled() {
            return Err(MigrateError::Cancelled);
        }

        let shown = spec.display();
        info!("Running: {}", shown);

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &spec.env {
            command.env(key, value);
        }
        if let Some(ref dir) = spec.current_dir {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|e| spawn_error(&spec.program, e))?;
        let started = Instant::now();

        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            _ = tokio::time::sleep(self.timeout) => {
                return Err(MigrateError::Timeout {
                    command: shown,
                    seconds: self.timeout.as_secs(),
                });
            }
            _ = self.cancel.cancelled() => {
                return Err(MigrateError::Cancelled);
            }
        };

        let result = CommandOutput {
            // Killed by a signal: report -1
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: started.elapsed(),
        };
        debug!(
            "`{}` exited with {} in {:.2}s",
            shown,
            result.exit_code,
            result.duration.as_secs_f64()
        );
        Ok(result)
    }

    /// Run and fail on a non-zero exit code, carrying the output tail.
    pub async fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let output = self.run(spec).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(MigrateError::command_failed(
                spec.display(),
                output.exit_code,
                output.tail(OUTPUT_TAIL_LINES),
            ))
        }
    }
}

fn spawn_error(program: &Path, e: std::io::Error) -> MigrateError {
    if e.kind() == std::io::ErrorKind::NotFound {
        MigrateError::ToolNotFound(program.display().to_string())
    } else {
        MigrateError::Io(e)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn runner(timeout_ms: u64) -> CommandRunner {
        CommandRunner::new(Duration::from_millis(timeout_ms), CancellationToken::new())
    }

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("/bin/sh").arg("-c").arg(script)
    }

    #[tokio::test]
    async fn test_captures_output_and_exit_code() {
        let output = runner(5_000)
            .run(&sh("echo out; echo err >&2; exit 3"))
            .await
            .unwrap();
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_env_is_passed_but_not_displayed() {
        let spec = sh("printf %s \"$SECRET_VALUE\"").env("SECRET_VALUE", "hunter2");
        assert!(!spec.display().contains("hunter2"));
        let output = runner(5_000).run(&spec).await.unwrap();
        assert_eq!(output.stdout, "hunter2");
    }

    #[tokio::test]
    async fn test_run_checked_reports_tail() {
        let err = runner(5_000)
            .run_checked(&sh("echo build failed >&2; exit 1"))
            .await
            .unwrap_err();
        match err {
            MigrateError::CommandFailed { code, output, .. } => {
                assert_eq!(code, 1);
                assert!(output.contains("build failed"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_command() {
        let err = runner(200).run(&sh("sleep 10")).await.unwrap_err();
        assert!(matches!(err, MigrateError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_cancellation() {
        let token = CancellationToken::new();
        let runner = CommandRunner::new(Duration::from_secs(30), token.clone());
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
        let err = runner.run(&sh("sleep 10")).await.unwrap_err();
        assert!(matches!(err, MigrateError::Cancelled));
    }

    #[tokio::test]
    async fn test_missing_program_is_tool_not_found() {
        let err = runner(1_000)
            .run(&CommandSpec::new("/definitely/not/here/dotnet"))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::ToolNotFound(_)));
    }

    #[test]
    fn test_tail_keeps_last_lines() {
        let output = CommandOutput {
            exit_code: 1,
            stdout: (1..=30).map(|i| format!("line {i}\n")).collect(),
            stderr: String::new(),
            duration: Duration::ZERO,
        };
        let tail = output.tail(3);
        assert_eq!(tail, "line 28\nline 29\nline 30");
    }
}
