//! Secrets management for repofetch
//!
//! Secrets are stored separately from configuration to avoid accidental sharing.
//! The secrets file is located at `~/.config/repofetch/secrets.toml` and must have
//! restrictive permissions (0600 on Unix).
//!
//! Loading priority:
//! 1. Environment variables (REPOFETCH_GIT_TOKEN, then GITHUB_TOKEN)
//! 2. Per-host token from the secrets file
//! 3. Default token from the secrets file

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Secrets structure
#[derive(Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Secrets {
    /// Git hosting credentials
    pub git: GitSecrets,
}

/// Git-related secrets
#[derive(Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GitSecrets {
    /// Token used for any HTTPS host without a specific entry
    pub token: Option<String>,

    /// Tokens keyed by host name (e.g. "github.com")
    pub hosts: HashMap<String, String>,

    /// Token taken from the environment, wins over everything in the file
    #[serde(skip)]
    pub env_token: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut hosts: Vec<&String> = self.git.hosts.keys().collect();
        hosts.sort();
        f.debug_struct("Secrets")
            .field("token", &self.git.token.as_ref().map(|_| "***"))
            .field("env_token", &self.git.env_token.as_ref().map(|_| "***"))
            .field("hosts", &hosts)
            .finish()
    }
}

impl Secrets {
    /// Load secrets from the default location
    ///
    /// Returns default (empty) secrets if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = Self::default_secrets_path() {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load secrets from a specific file with permission checking
    pub fn load_from_file(path: &Path) -> Result<Self> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let metadata = std::fs::metadata(path).map_err(Error::Io)?;
            let mode = metadata.permissions().mode();

            if mode & 0o077 != 0 {
                return Err(Error::Config(format!(
                    "Secrets file {} has insecure permissions {:o}. \
                     Please run: chmod 600 {}",
                    path.display(),
                    mode & 0o777,
                    path.display()
                )));
            }

            debug!(path = %path.display(), mode = format!("{:o}", mode & 0o777), "Secrets file permissions OK");
        }

        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        let mut secrets: Secrets = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse secrets: {}", e)))?;

        if let Some(ref mut token) = secrets.git.token {
            *token = token.trim().to_string();
        }
        for token in secrets.git.hosts.values_mut() {
            *token = token.trim().to_string();
        }

        Ok(secrets)
    }

    /// Get the default secrets file path
    ///
    /// Returns `~/.config/repofetch/secrets.toml` on Unix
    pub fn default_secrets_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("repofetch").join("secrets.toml"))
    }

    /// Apply environment variable overrides
    ///
    /// Supported variables (first non-empty wins):
    /// - REPOFETCH_GIT_TOKEN
    /// - GITHUB_TOKEN
    pub fn with_env_overrides(self) -> Self {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        for var in ["REPOFETCH_GIT_TOKEN", "GITHUB_TOKEN"] {
            if let Some(token) = lookup(var) {
                let token = token.trim().to_string();
                if !token.is_empty() {
                    debug!(source = var, "Using git token from environment");
                    self.git.env_token = Some(token);
                    break;
                }
            }
        }
        self
    }

    /// Load secrets with environment overrides applied
    pub fn load_with_overrides() -> Result<Self> {
        Ok(Self::load()?.with_env_overrides())
    }

    /// Get the token to use for `host`
    ///
    /// Priority: environment > per-host entry > default token
    pub fn token_for_host(&self, host: &str) -> Option<String> {
        if let Some(token) = &self.git.env_token {
            return Some(token.clone());
        }

        let host = host.to_lowercase();
        if let Some(token) = self.git.hosts.get(&host).filter(|t| !t.is_empty()) {
            return Some(token.clone());
        }

        self.git.token.clone().filter(|t| !t.is_empty())
    }

    /// Build secrets from a single token, bypassing files and environment
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            git: GitSecrets {
                token: Some(token.into()),
                ..GitSecrets::default()
            },
        }
    }
}
