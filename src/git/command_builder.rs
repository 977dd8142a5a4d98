//! Builder for git invocations with consistent logging, timeouts and error mapping.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::core::UpgradeError;

/// Name of the git executable.
pub const GIT_COMMAND: &str = if cfg!(windows) { "git.exe" } else { "git" };

/// Fluent builder for a single git command.
///
/// ```rust,ignore
/// use botup::git::command_builder::GitCommand;
///
/// # async fn example() -> anyhow::Result<()> {
/// GitCommand::clone("https://example.com/bot.git", "update")
///     .branch("v3.2.0")
///     .shallow()
///     .with_context("Downloading v3.2.0")
///     .execute_success()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct GitCommand {
    /// Arguments after `git` (and after `-C <dir>` when a directory is set)
    args: Vec<String>,

    /// Directory passed through `-C`
    current_dir: Option<PathBuf>,

    /// Maximum duration to wait for the command (None = no timeout)
    timeout_duration: Option<Duration>,

    /// Label prefixed to log lines
    context: Option<String>,
}

impl Default for GitCommand {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            current_dir: None,
            // Default timeout of 5 minutes for most git operations
            timeout_duration: Some(Duration::from_secs(300)),
            context: None,
        }
    }
}

impl GitCommand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
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

    pub const fn timeout(mut self, duration: Option<Duration>) -> Self {
        self.timeout_duration = duration;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Full argument list, including `-C <dir>`.
    #[must_use]
    pub fn full_args(&self) -> Vec<String> {
        let mut full_args = Vec::new();
        if let Some(dir) = &self.current_dir {
            full_args.push("-C".to_string());
            full_args.push(dir.display().to_string());
        }
        full_args.extend(self.args.iter().cloned());
        full_args
    }

    /// The git operation name (first argument after `-C <dir>`).
    fn operation(&self) -> String {
        self.args.first().cloned().unwrap_or_else(|| "unknown".to_string())
    }

    /// Run the command and return its output.
    pub async fn execute(self) -> Result<GitCommandOutput> {
        let start = std::time::Instant::now();
        let full_args = self.full_args();
        let label = self.context.as_deref().map(|ctx| format!("({ctx}) ")).unwrap_or_default();

        tracing::debug!(target: "git", "{label}Executing command: {GIT_COMMAND} {}", full_args.join(" "));

        let mut cmd = Command::new(GIT_COMMAND);
        cmd.args(&full_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);

        let output_future = cmd.output();
        let result = match self.timeout_duration {
            Some(duration) => match timeout(duration, output_future).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(
                        target: "git",
                        "{label}Command timed out after {} seconds: git {}",
                        duration.as_secs(),
                        full_args.join(" ")
                    );
                    return Err(UpgradeError::GitCommandError {
                        operation: self.operation(),
                        stderr: format!(
                            "Git command timed out after {} seconds. Check network connectivity \
                             and that no credential prompt is waiting for input.",
                            duration.as_secs()
                        ),
                    }
                    .into());
                }
            },
            None => output_future.await,
        };

        let output = match result {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(UpgradeError::GitNotFound.into());
            }
            Err(e) => {
                return Err(e).context(format!("Failed to execute git {}", full_args.join(" ")));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            tracing::debug!(
                target: "git",
                "{label}Command failed with exit code: {:?}",
                output.status.code()
            );
            if !stderr.is_empty() {
                tracing::debug!(target: "git", "{label}Error: {}", stderr.trim());
            }
            return Err(UpgradeError::GitCommandError {
                operation: self.operation(),
                stderr: if stderr.trim().is_empty() { stdout } else { stderr },
            }
            .into());
        }

        if !stderr.trim().is_empty() {
            tracing::debug!(target: "git", "{label}{}", stderr.trim());
        }

        let elapsed = start.elapsed();
        if elapsed.as_secs() > 1 {
            tracing::info!(
                target: "git::perf",
                "{label}Git {} took {:.2}s",
                self.operation(),
                elapsed.as_secs_f64()
            );
        }

        Ok(GitCommandOutput {
            stdout,
            stderr,
        })
    }

    /// Run the command and return trimmed stdout.
    pub async fn execute_stdout(self) -> Result<String> {
        let output = self.execute().await?;
        Ok(output.stdout.trim().to_string())
    }

    /// Run the command, discarding its output.
    pub async fn execute_success(self) -> Result<()> {
        self.execute().await?;
        Ok(())
    }
}

/// Output from a git command
pub struct GitCommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl GitCommand {
    /// `git clone URL TARGET`
    pub fn clone(url: &str, target: impl AsRef<Path>) -> Self {
        Self::new().args(["clone".to_string(), url.to_string(), target.as_ref().display().to_string()])
    }

    /// Restrict a clone to one branch or tag.
    ///
    /// Inserts `--branch REF --single-branch` right after `clone`.
    pub fn branch(mut self, reference: &str) -> Self {
        if self.args.first().is_some_and(|a| a == "clone") {
            self.args.splice(
                1..1,
                ["--branch".to_string(), reference.to_string(), "--single-branch".to_string()],
            );
        }
        self
    }

    /// Make a clone shallow (`--depth 1`).
    pub fn shallow(mut self) -> Self {
        if self.args.first().is_some_and(|a| a == "clone") {
            let at = self.args.len().saturating_sub(2).max(1);
            self.args.splice(at..at, ["--depth".to_string(), "1".to_string()]);
        }
        self
    }

    /// `git --version`
    pub fn version() -> Self {
        Self::new().arg("--version").timeout(Some(Duration::from_secs(10)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_clone_args() {
        let cmd = GitCommand::clone("https://example.com/r.git", "dest");
        assert_eq!(cmd.full_args(), vec!["clone", "https://example.com/r.git", "dest"]);
    }

    #[test]
    fn test_branch_and_shallow_clone_args() {
        let cmd = GitCommand::clone("https://example.com/r.git", "update").branch("v2").shallow();
        assert_eq!(
            cmd.full_args(),
            vec![
                "clone",
                "--branch",
                "v2",
                "--single-branch",
                "--depth",
                "1",
                "https://example.com/r.git",
                "update"
            ]
        );
    }

    #[test]
    fn test_current_dir_prefix() {
        let cmd = GitCommand::new().current_dir("/repo").args(["status", "--porcelain"]);
        assert_eq!(cmd.full_args(), vec!["-C", "/repo", "status", "--porcelain"]);
        assert_eq!(cmd.operation(), "status");
    }

    #[test]
    fn test_branch_ignored_for_non_clone() {
        let cmd = GitCommand::new().arg("fetch").branch("main");
        assert_eq!(cmd.full_args(), vec!["fetch"]);
    }
}
