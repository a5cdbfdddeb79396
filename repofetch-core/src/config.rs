//! Configuration management for repofetch
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. CLI flags / per-request options
//! 2. Environment variables (REPOFETCH_*)
//! 3. Config file (~/.config/repofetch/config.toml)
//! 4. Default values

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Substrings (lowercase) that mark a git failure as worth retrying
pub const DEFAULT_RETRYABLE_ERRORS: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "connection timed out",
    "network is unreachable",
    "temporary failure",
    "could not resolve host",
    "early eof",
    "rpc failed",
    "the remote end hung up unexpectedly",
    "ssl_error_syscall",
];

/// Defaults applied to every clone request
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CloneConfig {
    /// Upper bound for each git invocation
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Maximum clone attempts
    pub max_retries: u32,

    /// Sparse-checkout patterns used when a request names none
    pub sparse_patterns: Vec<String>,

    /// Prefer `--filter=blob:none` clones
    pub partial_clone: bool,

    /// Keep scratch directories after a failed clone
    pub keep_directory: bool,

    /// History depth (None = full history)
    pub depth: Option<u32>,
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            max_retries: 3,
            sparse_patterns: Vec::new(),
            partial_clone: false,
            keep_directory: false,
            depth: None,
        }
    }
}

/// Backoff parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay after the first failed attempt
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    /// Growth factor per attempt
    pub multiplier: f64,

    /// Ceiling for any single delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Case-insensitive substrings that make an error retryable
    pub retryable_errors: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            retryable_errors: DEFAULT_RETRYABLE_ERRORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Git executable settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GitConfig {
    /// Path to the git executable
    pub program: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            program: "git".to_string(),
        }
    }
}

/// Scratch directory settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScratchConfig {
    /// Directory under which scratch directories are created (None = system temp dir)
    pub root: Option<PathBuf>,

    /// Name prefix for scratch directories
    pub prefix: String,
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            root: None,
            prefix: "repofetch-".to_string(),
        }
    }
}

impl ScratchConfig {
    /// Effective scratch root
    pub fn root_dir(&self) -> PathBuf {
        self.root.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Clone defaults
    pub clone: CloneConfig,
    /// Retry/backoff settings
    pub retry: RetryConfig,
    /// Git executable settings
    pub git: GitConfig,
    /// Scratch directory settings
    pub scratch: ScratchConfig,
}

impl Config {
    /// Load configuration from the default config file location
    ///
    /// Returns default config if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Get the default config file path
    ///
    /// Returns `~/.config/repofetch/config.toml` on Unix
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("repofetch").join("config.toml"))
    }

    /// Apply environment variable overrides
    ///
    /// Supported variables:
    /// - REPOFETCH_GIT_PATH: Path to git executable
    /// - REPOFETCH_TIMEOUT: Per-command timeout (humantime, e.g. "90s")
    /// - REPOFETCH_MAX_RETRIES: Maximum clone attempts
    /// - REPOFETCH_KEEP_DIRS: Keep scratch directories on failure ("1"/"true")
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(program) = lookup("REPOFETCH_GIT_PATH") {
            self.git.program = program;
        }

        if let Some(timeout) = lookup("REPOFETCH_TIMEOUT") {
            self.clone.timeout = humantime_serde::re::humantime::parse_duration(&timeout)
                .map_err(|e| Error::Config(format!("Invalid REPOFETCH_TIMEOUT '{}': {}", timeout, e)))?;
        }

        if let Some(retries) = lookup("REPOFETCH_MAX_RETRIES") {
            self.clone.max_retries = retries.trim().parse().map_err(|e| {
                Error::Config(format!("Invalid REPOFETCH_MAX_RETRIES '{}': {}", retries, e))
            })?;
        }

        if let Some(keep) = lookup("REPOFETCH_KEEP_DIRS") {
            self.clone.keep_directory = matches!(keep.trim(), "1" | "true" | "yes");
        }

        Ok(self)
    }

    /// Apply CLI flag overrides
    pub fn with_cli_overrides(mut self, git_path: Option<String>) -> Self {
        if let Some(path) = git_path {
            self.git.program = path;
        }
        self
    }

    /// Load configuration with all overrides applied
    ///
    /// Priority: CLI > env > config file > defaults
    pub fn load_with_overrides(git_path: Option<String>) -> Result<Self> {
        Ok(Self::load()?.with_env_overrides()?.with_cli_overrides(git_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.git.program, "git");
        assert_eq!(config.clone.max_retries, 3);
        assert_eq!(config.clone.timeout, Duration::from_secs(300));
        assert!(!config.clone.partial_clone);
        assert!(config
            .retry
            .retryable_errors
            .iter()
            .any(|e| e == "connection reset"));
    }

    #[test]
    fn test_cli_overrides() {
        let config = Config::default().with_cli_overrides(Some("/opt/git/bin/git".to_string()));
        assert_eq!(config.git.program, "/opt/git/bin/git");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("REPOFETCH_TIMEOUT", "90s"),
            ("REPOFETCH_MAX_RETRIES", "5"),
            ("REPOFETCH_KEEP_DIRS", "true"),
        ]
        .into_iter()
        .collect();

        let config = Config::default()
            .with_overrides_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.clone.timeout, Duration::from_secs(90));
        assert_eq!(config.clone.max_retries, 5);
        assert!(config.clone.keep_directory);
        assert_eq!(config.git.program, "git");
    }

    #[test]
    fn test_invalid_env_override() {
        let result = Config::default().with_overrides_from(|k| {
            (k == "REPOFETCH_MAX_RETRIES").then(|| "lots".to_string())
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
[clone]
timeout = "2m"
max_retries = 4
sparse_patterns = ["src", "docs"]
partial_clone = true
depth = 1

[retry]
base_delay = "250ms"
multiplier = 3.0
max_delay = "10s"
retryable_errors = ["flaky"]

[git]
program = "/usr/local/bin/git"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.clone.timeout, Duration::from_secs(120));
        assert_eq!(config.clone.sparse_patterns, vec!["src", "docs"]);
        assert!(config.clone.partial_clone);
        assert_eq!(config.clone.depth, Some(1));
        assert_eq!(config.retry.base_delay, Duration::from_millis(250));
        assert_eq!(config.retry.retryable_errors, vec!["flaky"]);
        assert_eq!(config.git.program, "/usr/local/bin/git");
    }

    #[test]
    fn test_partial_toml() {
        let toml = r#"
[clone]
keep_directory = true
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.clone.keep_directory);
        assert_eq!(config.clone.max_retries, 3);
        assert_eq!(config.scratch.prefix, "repofetch-");
    }
}
