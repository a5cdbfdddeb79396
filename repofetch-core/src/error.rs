//! Error types for repofetch

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::phase::ClonePhase;

/// Result type alias for repofetch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Phrases in git output that indicate the remote refused our credentials
const AUTH_PATTERNS: &[&str] = &[
    "authentication failed",
    "could not read username",
    "could not read password",
    "terminal prompts disabled",
    "permission denied",
    "access denied",
    "invalid credentials",
    "invalid username or password",
    "http basic: access denied",
    "the requested url returned error: 401",
    "the requested url returned error: 403",
];

/// Phrases in git output that indicate the remote (or ref) does not exist
const NOT_FOUND_PATTERNS: &[&str] = &[
    "repository not found",
    "not found",
    "does not exist",
    "does not appear to be a git repository",
    "couldn't find remote ref",
    "the requested url returned error: 404",
];

/// Broad classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network or timeout trouble that is worth retrying
    Transient,
    /// The remote rejected or asked for credentials
    Authentication,
    /// The remote or the requested ref does not exist
    NotFound,
    /// The caller cancelled the operation
    Cancelled,
    /// The git executable could not be invoked
    ToolUnavailable,
    /// Anything else
    Unclassified,
}

/// Error type for repofetch operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The repository URL could not be understood
    #[error("Invalid repository URL: {0}")]
    InvalidUrl(String),

    /// An external command exited unsuccessfully
    #[error("{command} failed ({}): {}", status_label(.code, .signal), .stderr.trim())]
    CommandFailed {
        /// Command line with secrets redacted
        command: String,
        /// Exit code, if the process exited normally
        code: Option<i32>,
        /// Terminating signal, if the process was killed
        signal: Option<i32>,
        /// Captured stdout (redacted)
        stdout: String,
        /// Captured stderr (redacted)
        stderr: String,
    },

    /// An external command did not finish in time
    #[error("{command} timed out after {}s", .timeout.as_secs())]
    Timeout {
        /// Command line with secrets redacted
        command: String,
        /// The limit that was exceeded
        timeout: Duration,
    },

    /// The operation was cancelled by the caller or by shutdown
    #[error("Operation cancelled")]
    Cancelled,

    /// The git executable could not be started
    #[error("'{program}' could not be executed: {message}. Is git installed and on PATH?")]
    ToolUnavailable {
        /// Program that failed to spawn
        program: String,
        /// Underlying spawn error
        message: String,
    },

    /// The remote requires credentials we do not have
    #[error("Authentication failed for {url}: {message}")]
    Authentication {
        /// Sanitized repository URL
        url: String,
        /// Reason reported by git
        message: String,
    },

    /// Remote or ref does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Sparse checkout could not be configured
    #[error("Sparse checkout failed: {0}")]
    SparseCheckout(String),

    /// libgit2 error
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    /// A failure annotated with where in the clone pipeline it happened
    #[error("{phase} failed for {url}: {source}")]
    Phase {
        /// Phase that was running
        phase: ClonePhase,
        /// Sanitized repository URL
        url: String,
        /// Scratch directory in use, if one had been allocated
        path: Option<PathBuf>,
        /// Whether `path` was kept on disk for inspection
        retained: bool,
        /// Non-fatal issues noticed while handling the failure
        warnings: Vec<String>,
        /// Original error
        #[source]
        source: Box<Error>,
    },

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

fn status_label(code: &Option<i32>, signal: &Option<i32>) -> String {
    match (code, signal) {
        (Some(code), _) => format!("exit code {}", code),
        (None, Some(signal)) => format!("killed by signal {}", signal),
        (None, None) => "unknown status".to_string(),
    }
}

fn matches_any(text: &str, patterns: &[&str]) -> bool {
    let lower = text.to_lowercase();
    patterns.iter().any(|p| lower.contains(p))
}

/// Classify free-form git output
pub fn classify_message(message: &str) -> ErrorKind {
    if matches_any(message, AUTH_PATTERNS) {
        ErrorKind::Authentication
    } else if matches_any(message, NOT_FOUND_PATTERNS) {
        ErrorKind::NotFound
    } else if crate::config::DEFAULT_RETRYABLE_ERRORS
        .iter()
        .any(|p| message.to_lowercase().contains(p))
    {
        ErrorKind::Transient
    } else {
        ErrorKind::Unclassified
    }
}

impl Error {
    /// Wrap this error with clone pipeline context
    ///
    /// Already-wrapped errors keep their original (innermost) phase.
    pub fn in_phase(self, phase: ClonePhase, url: impl Into<String>, path: Option<PathBuf>) -> Self {
        if matches!(self, Error::Phase { .. }) {
            return self;
        }
        Error::Phase {
            phase,
            url: url.into(),
            path,
            retained: false,
            warnings: Vec::new(),
            source: Box::new(self),
        }
    }

    /// Mark the scratch directory as kept and record why
    ///
    /// No-op for errors without phase context.
    pub fn retained_with_warning(mut self, warning: impl Into<String>) -> Self {
        if let Error::Phase {
            retained, warnings, ..
        } = &mut self
        {
            *retained = true;
            warnings.push(warning.into());
        }
        self
    }

    /// Record a non-fatal issue on a phase-annotated error
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        if let Error::Phase { warnings, .. } = &mut self {
            warnings.push(warning.into());
        }
        self
    }

    /// Warnings attached while handling this failure
    pub fn warnings(&self) -> &[String] {
        match self {
            Error::Phase { warnings, .. } => warnings,
            _ => &[],
        }
    }

    /// Scratch directory that was kept on disk after this failure
    pub fn retained_path(&self) -> Option<&std::path::Path> {
        match self {
            Error::Phase {
                path: Some(path),
                retained: true,
                ..
            } => Some(path),
            _ => None,
        }
    }

    /// The innermost error, looking through phase context
    pub fn root(&self) -> &Error {
        match self {
            Error::Phase { source, .. } => source.root(),
            other => other,
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Error::Cancelled => ErrorKind::Cancelled,
            Error::ToolUnavailable { .. } => ErrorKind::ToolUnavailable,
            Error::Authentication { .. } => ErrorKind::Authentication,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Timeout { .. } => ErrorKind::Transient,
            Error::CommandFailed { stderr, .. } => classify_message(stderr),
            _ => ErrorKind::Unclassified,
        }
    }

    /// Whether this error represents a cancellation
    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }

    /// Whether the remote asked for credentials we could not provide
    pub fn requires_authentication(&self) -> bool {
        self.kind() == ErrorKind::Authentication
    }

    /// The phase this error was raised in, if known
    pub fn phase(&self) -> Option<ClonePhase> {
        match self {
            Error::Phase { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stderr: &str) -> Error {
        Error::CommandFailed {
            command: "git clone".to_string(),
            code: Some(128),
            signal: None,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_classify_auth() {
        let err = failed("fatal: Authentication failed for 'https://example.com/repo.git/'");
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert!(err.requires_authentication());
    }

    #[test]
    fn test_classify_not_found() {
        let err = failed("remote: Repository not found.");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_classify_transient() {
        let err = failed("error: RPC failed; curl 56 Recv failure: Connection reset by peer");
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[test]
    fn test_phase_wrapping_preserves_kind_and_message() {
        let err = Error::Cancelled.in_phase(ClonePhase::Cloning, "https://example.com/r.git", None);
        assert!(err.is_cancelled());
        assert_eq!(err.phase(), Some(ClonePhase::Cloning));
        assert!(err.to_string().contains("Operation cancelled"));
        assert!(err.to_string().contains("cloning"));
    }

    #[test]
    fn test_double_wrap_keeps_inner_phase() {
        let err = failed("boom")
            .in_phase(ClonePhase::CheckingOut, "u", None)
            .in_phase(ClonePhase::Failed, "u", None);
        assert_eq!(err.phase(), Some(ClonePhase::CheckingOut));
    }

    #[test]
    fn test_retained_path_and_warnings() {
        let path = PathBuf::from("/tmp/repofetch-r-1");
        let err = failed("boom").in_phase(ClonePhase::Cloning, "u", Some(path.clone()));
        assert!(err.retained_path().is_none());

        let err = err.retained_with_warning("kept for inspection");
        assert_eq!(err.retained_path(), Some(path.as_path()));
        assert_eq!(err.warnings(), ["kept for inspection".to_string()]);

        // Unwrapped errors carry nothing
        let bare = Error::Cancelled.with_warning("ignored");
        assert!(bare.warnings().is_empty());
    }

    #[test]
    fn test_command_failed_display() {
        let err = failed("fatal: nope\n");
        assert_eq!(err.to_string(), "git clone failed (exit code 128): fatal: nope");
    }
}
