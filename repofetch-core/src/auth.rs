//! Credential negotiation for git subprocesses
//!
//! Credentials are never placed on the command line. Token authentication is
//! delivered through a short-lived `GIT_ASKPASS` helper for clones, and through
//! an environment-only HTTP header for read-only remote probes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::Engine;
use serde::Serialize;
use tracing::{debug, warn};

use crate::git::url::{RepoUrl, Transport};
use crate::scratch::TempDirManager;
use crate::secrets::Secrets;
use crate::Result;

/// Environment variable the askpass helper reads the token from
pub const ASKPASS_TOKEN_VAR: &str = "REPOFETCH_ASKPASS_TOKEN";

/// Username sent alongside a token
pub const TOKEN_USERNAME: &str = "x-access-token";

/// SSH command that never prompts
pub const BATCH_SSH_COMMAND: &str = "ssh -o BatchMode=yes";

const ASKPASS_SCRIPT: &str = r#"#!/bin/sh
case "$1" in
    Username*|username*) printf '%s\n' 'x-access-token' ;;
    *) printf '%s\n' "$REPOFETCH_ASKPASS_TOKEN" ;;
esac
"#;

/// How a clone authenticates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMethod {
    /// Anonymous
    None,
    /// Access token from configuration or environment
    Token,
    /// Ambient SSH agent or keys
    SshKey,
    /// Username and password embedded in the URL
    Credentials,
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AuthMethod::None => "none",
            AuthMethod::Token => "token",
            AuthMethod::SshKey => "ssh-key",
            AuthMethod::Credentials => "credentials",
        };
        f.write_str(name)
    }
}

/// Result of credential setup for one operation
#[derive(Clone)]
pub struct AuthenticationInfo {
    /// Chosen method
    pub method: AuthMethod,
    /// Whether setup succeeded (a failed setup degrades to anonymous)
    pub success: bool,
    /// Whether any credential will be presented to the remote
    pub credentials_used: bool,
    /// Environment for git subprocesses
    pub env: HashMap<String, String>,
    /// Values that must be redacted from output
    pub secrets: Vec<String>,
    helper_dir: Option<PathBuf>,
}

impl std::fmt::Debug for AuthenticationInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut env_keys: Vec<&String> = self.env.keys().collect();
        env_keys.sort();
        f.debug_struct("AuthenticationInfo")
            .field("method", &self.method)
            .field("success", &self.success)
            .field("credentials_used", &self.credentials_used)
            .field("env_keys", &env_keys)
            .field("secrets", &format!("[{} hidden]", self.secrets.len()))
            .field("helper_dir", &self.helper_dir)
            .finish()
    }
}

impl AuthenticationInfo {
    /// Anonymous access
    pub fn anonymous() -> Self {
        Self {
            method: AuthMethod::None,
            success: true,
            credentials_used: false,
            env: HashMap::new(),
            secrets: Vec::new(),
            helper_dir: None,
        }
    }

    /// Scratch directory holding the askpass helper, if one was written
    pub fn helper_dir(&self) -> Option<&Path> {
        self.helper_dir.as_deref()
    }
}

/// Decides how to authenticate and prepares the subprocess environment
#[derive(Debug, Clone)]
pub struct CredentialNegotiator {
    secrets: Secrets,
    scratch: TempDirManager,
    inherited_ssh_command: Option<String>,
}

impl CredentialNegotiator {
    /// Create a negotiator; helper scripts are written through `scratch`
    pub fn new(secrets: Secrets, scratch: TempDirManager) -> Self {
        Self {
            secrets,
            scratch,
            inherited_ssh_command: std::env::var("GIT_SSH_COMMAND")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        }
    }

    /// Use `command` as the already-configured SSH command (None to clear)
    pub fn with_inherited_ssh_command(mut self, command: Option<String>) -> Self {
        self.inherited_ssh_command = command;
        self
    }

    /// Pick an authentication method for `url`
    ///
    /// SSH transports use ambient keys. HTTP URLs with a password in the
    /// userinfo use it. Otherwise an HTTP URL uses a configured token for its
    /// host when there is one.
    pub fn detect_authentication_method(&self, url: &RepoUrl) -> AuthMethod {
        match url.transport {
            Transport::Ssh => AuthMethod::SshKey,
            Transport::Http if !url.embedded_credentials().is_empty() => AuthMethod::Credentials,
            Transport::Http if self.secrets.token_for_host(&url.host).is_some() => {
                AuthMethod::Token
            }
            _ => AuthMethod::None,
        }
    }

    /// Prepare credentials for a clone of `url`
    ///
    /// Failing to write the token helper is not fatal: the returned info has
    /// `success: false` and the clone proceeds anonymously.
    pub async fn setup_credentials(&self, url: &RepoUrl) -> Result<AuthenticationInfo> {
        let method = self.detect_authentication_method(url);
        debug!(url = %url.sanitized(), method = %method, "Negotiating credentials");

        match method {
            AuthMethod::None => Ok(AuthenticationInfo::anonymous()),
            AuthMethod::SshKey => Ok(self.ssh_info()),
            AuthMethod::Credentials => Ok(Self::embedded_info(url)),
            AuthMethod::Token => {
                let Some(token) = self.secrets.token_for_host(&url.host) else {
                    return Ok(AuthenticationInfo::anonymous());
                };
                match self.write_askpass_helper().await {
                    Ok((dir, script)) => {
                        let mut env = HashMap::new();
                        env.insert("GIT_ASKPASS".to_string(), script.display().to_string());
                        env.insert("GIT_TERMINAL_PROMPT".to_string(), "0".to_string());
                        env.insert(ASKPASS_TOKEN_VAR.to_string(), token.clone());
                        Ok(AuthenticationInfo {
                            method,
                            success: true,
                            credentials_used: true,
                            env,
                            secrets: vec![token],
                            helper_dir: Some(dir),
                        })
                    }
                    Err(e) => {
                        warn!(url = %url.sanitized(), error = %e, "Could not write askpass helper; continuing without token");
                        Ok(AuthenticationInfo {
                            method,
                            success: false,
                            ..AuthenticationInfo::anonymous()
                        })
                    }
                }
            }
        }
    }

    /// Prepare credentials for a read-only remote probe of `url`
    ///
    /// Never touches the filesystem: a token is passed as an HTTP header via
    /// git's `GIT_CONFIG_*` environment variables.
    pub fn probe_credentials(&self, url: &RepoUrl) -> AuthenticationInfo {
        match self.detect_authentication_method(url) {
            AuthMethod::None => AuthenticationInfo::anonymous(),
            AuthMethod::SshKey => self.ssh_info(),
            AuthMethod::Credentials => Self::embedded_info(url),
            AuthMethod::Token => {
                let Some(token) = self.secrets.token_for_host(&url.host) else {
                    return AuthenticationInfo::anonymous();
                };
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", TOKEN_USERNAME, token));
                let mut env = HashMap::new();
                env.insert("GIT_CONFIG_COUNT".to_string(), "1".to_string());
                env.insert("GIT_CONFIG_KEY_0".to_string(), "http.extraHeader".to_string());
                env.insert(
                    "GIT_CONFIG_VALUE_0".to_string(),
                    format!("Authorization: Basic {}", encoded),
                );
                env.insert("GIT_TERMINAL_PROMPT".to_string(), "0".to_string());
                AuthenticationInfo {
                    method: AuthMethod::Token,
                    success: true,
                    credentials_used: true,
                    env,
                    secrets: vec![token, encoded],
                    helper_dir: None,
                }
            }
        }
    }

    /// Remove any helper written for `info`
    pub async fn release(&self, info: &AuthenticationInfo) {
        if let Some(dir) = info.helper_dir() {
            if let Err(e) = self.scratch.cleanup(dir, true).await {
                warn!(path = %dir.display(), error = %e, "Failed to remove askpass helper");
            }
        }
    }

    fn ssh_info(&self) -> AuthenticationInfo {
        let mut env = HashMap::new();
        if self.inherited_ssh_command.is_none() {
            env.insert("GIT_SSH_COMMAND".to_string(), BATCH_SSH_COMMAND.to_string());
        }
        AuthenticationInfo {
            method: AuthMethod::SshKey,
            success: true,
            credentials_used: true,
            env,
            secrets: Vec::new(),
            helper_dir: None,
        }
    }

    fn embedded_info(url: &RepoUrl) -> AuthenticationInfo {
        AuthenticationInfo {
            method: AuthMethod::Credentials,
            success: true,
            credentials_used: true,
            env: HashMap::new(),
            secrets: url.embedded_credentials(),
            helper_dir: None,
        }
    }

    async fn write_askpass_helper(&self) -> Result<(PathBuf, PathBuf)> {
        let dir = self.scratch.create_temp_dir("repofetch-askpass-").await?;
        let script = dir.join("askpass.sh");
        let written = async {
            tokio::fs::write(&script, ASKPASS_SCRIPT).await?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                tokio::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o700))
                    .await?;
            }
            Ok::<(), std::io::Error>(())
        }
        .await;

        if let Err(e) = written {
            let _ = self.scratch.cleanup(&dir, true).await;
            return Err(e.into());
        }
        Ok((dir, script))
    }
}
