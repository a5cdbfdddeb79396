//! External process execution
//!
//! Every git invocation goes through a [`CommandRunner`]. The production
//! [`ProcessRunner`] spawns the program with `tokio::process`, races it against
//! the caller's cancellation token and an optional timeout, and redacts
//! configured secrets from everything it hands back.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::git::sanitize_url;
use crate::{Error, Result};

/// Replacement for redacted secrets
pub const REDACTION_MARKER: &str = "***";

/// Options for a single command invocation
#[derive(Debug, Clone, Default)]
pub struct CommandOptions {
    /// Working directory (inherits the current one when unset)
    pub cwd: Option<PathBuf>,
    /// Extra environment variables
    pub env: HashMap<String, String>,
    /// Substrings to scrub from output and errors
    pub secrets: Vec<String>,
    /// Cancellation signal; the child is killed when it fires
    pub cancel: Option<CancellationToken>,
    /// Kill the child if it runs longer than this
    pub timeout: Option<Duration>,
}

impl CommandOptions {
    /// Empty options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the working directory
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Add environment variables
    pub fn envs(mut self, vars: &HashMap<String, String>) -> Self {
        self.env
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Add secrets to redact
    pub fn redact(mut self, secrets: &[String]) -> Self {
        self.secrets
            .extend(secrets.iter().filter(|s| !s.is_empty()).cloned());
        self
    }

    /// Observe a cancellation token
    pub fn cancel_on(mut self, token: &CancellationToken) -> Self {
        self.cancel = Some(token.clone());
        self
    }

    /// Apply a timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Captured output of a successful command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output (redacted)
    pub stdout: String,
    /// Standard error (redacted)
    pub stderr: String,
}

/// Something that can run an external program to completion
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`
    ///
    /// Fails with [`Error::CommandFailed`] on a non-zero exit,
    /// [`Error::Cancelled`] if the cancellation token fires first,
    /// [`Error::Timeout`] if the timeout elapses, and
    /// [`Error::ToolUnavailable`] if the program cannot be started.
    async fn run(
        &self,
        program: &str,
        args: &[String],
        options: &CommandOptions,
    ) -> Result<CommandOutput>;
}

/// Replace every occurrence of each secret with [`REDACTION_MARKER`]
pub fn redact(text: &str, secrets: &[String]) -> String {
    let mut secrets: Vec<&String> = secrets.iter().filter(|s| !s.is_empty()).collect();
    // Longest first so a secret that contains another is scrubbed whole
    secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));
    secrets
        .into_iter()
        .fold(text.to_string(), |acc, secret| {
            acc.replace(secret.as_str(), REDACTION_MARKER)
        })
}

/// Render a command line for logs and errors
///
/// URL arguments lose their userinfo before the configured secrets are
/// scrubbed, so neither a username nor a password survives.
pub fn command_line(program: &str, args: &[String], secrets: &[String]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        if arg.contains("://") {
            line.push_str(&sanitize_url(arg));
        } else {
            line.push_str(arg);
        }
    }
    redact(&line, secrets)
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

/// [`CommandRunner`] backed by real child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Create a new process runner
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        options: &CommandOptions,
    ) -> Result<CommandOutput> {
        let label = command_line(program, args, &options.secrets);
        let cancel = options.cancel.clone().unwrap_or_default();

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&options.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref cwd) = options.cwd {
            cmd.current_dir(cwd);
        }

        debug!(command = %label, "Running command");

        let child = cmd.spawn().map_err(|e| match (e.kind(), options.cwd.as_deref()) {
            // A missing working directory fails the spawn with NotFound as well
            (std::io::ErrorKind::NotFound, Some(cwd)) if !cwd.is_dir() => {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("working directory {} does not exist", cwd.display()),
                ))
            }
            (std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied, _) => {
                Error::ToolUnavailable {
                    program: program.to_string(),
                    message: e.to_string(),
                }
            }
            _ => Error::Io(e),
        })?;

        let deadline = async {
            match options.timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };

        // Dropping the wait future drops the child, and kill_on_drop reaps it
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(command = %label, "Command cancelled");
                return Err(Error::Cancelled);
            }
            _ = deadline => {
                return Err(Error::Timeout {
                    command: label,
                    timeout: options.timeout.unwrap_or_default(),
                });
            }
            output = child.wait_with_output() => output.map_err(Error::Io)?,
        };

        let stdout = redact(&String::from_utf8_lossy(&output.stdout), &options.secrets);
        let stderr = redact(&String::from_utf8_lossy(&output.stderr), &options.secrets);

        if !output.status.success() {
            return Err(Error::CommandFailed {
                command: label,
                code: output.status.code(),
                signal: exit_signal(&output.status),
                stdout,
                stderr,
            });
        }

        trace!(command = %label, stdout_len = stdout.len(), "Command finished");
        Ok(CommandOutput { stdout, stderr })
    }
}
