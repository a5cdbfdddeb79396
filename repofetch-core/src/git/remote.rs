//! Read-only remote probes built on `git ls-remote`

use serde::Serialize;
use tracing::{debug, info};

use super::url::{is_commit_sha, is_full_sha, RepoUrl};
use super::{args, Git};
use crate::error::ErrorKind;
use crate::process::CommandOptions;
use crate::{Error, Result};

/// One advertised reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteRef {
    /// Full ref name (e.g. `refs/heads/main`, `refs/tags/v1^{}`)
    pub name: String,
    /// Commit or tag object SHA
    pub sha: String,
}

/// Outcome of probing a remote
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepositoryValidation {
    /// Sanitized URL that was probed
    pub url: String,
    /// Whether the probe succeeded
    pub valid: bool,
    /// Whether the remote is known to exist
    pub exists: bool,
    /// Whether the remote could be read with the available credentials
    pub accessible: bool,
    /// Whether the remote asked for credentials we could not provide
    pub requires_authentication: bool,
    /// Branch `HEAD` points at
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
    /// Advertised references
    pub refs: Vec<RemoteRef>,
    /// Failure description when `valid` is false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RepositoryValidation {
    /// Validation failure for a URL that could not even be parsed
    pub fn invalid(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Advertised branch names (without `refs/heads/`)
    pub fn branches(&self) -> impl Iterator<Item = &str> {
        self.refs
            .iter()
            .filter_map(|r| r.name.strip_prefix("refs/heads/"))
    }

    /// Advertised tag names (without `refs/tags/` or peel markers)
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.refs.iter().filter_map(|r| {
            r.name
                .strip_prefix("refs/tags/")
                .filter(|name| !name.ends_with("^{}"))
        })
    }
}

/// Parse `git ls-remote [--symref]` output into refs and the default branch
pub fn parse_ls_remote(output: &str) -> (Vec<RemoteRef>, Option<String>) {
    let mut refs = Vec::new();
    let mut default_branch = None;

    for line in output.lines() {
        let Some((left, name)) = line.split_once('\t') else {
            continue;
        };
        let name = name.trim();
        if let Some(target) = left.strip_prefix("ref: ") {
            if name == "HEAD" {
                default_branch = Some(
                    target
                        .trim()
                        .strip_prefix("refs/heads/")
                        .unwrap_or(target.trim())
                        .to_string(),
                );
            }
            continue;
        }
        let sha = left.trim();
        if sha.is_empty() || name.is_empty() {
            continue;
        }
        refs.push(RemoteRef {
            name: name.to_string(),
            sha: sha.to_string(),
        });
    }
    (refs, default_branch)
}

/// Best match for `target` among advertised refs
fn pick_ref<'a>(refs: &'a [RemoteRef], target: &str) -> Option<&'a RemoteRef> {
    let candidates = [
        target.to_string(),
        format!("refs/heads/{}", target),
        format!("refs/tags/{}^{{}}", target),
        format!("refs/tags/{}", target),
    ];
    candidates
        .iter()
        .find_map(|candidate| refs.iter().find(|r| &r.name == candidate))
}

/// Promote classified probe failures to typed errors
fn remote_error(error: Error, url: &str) -> Error {
    match error.kind() {
        ErrorKind::Authentication => Error::Authentication {
            url: url.to_string(),
            message: error.to_string(),
        },
        ErrorKind::NotFound => Error::NotFound(format!("{}: {}", url, error)),
        _ => error,
    }
}

impl Git {
    /// Probe `url` without cloning it
    ///
    /// Never fails: problems are described in the returned value.
    pub async fn validate_repository(
        &self,
        url: &RepoUrl,
        command: &CommandOptions,
    ) -> RepositoryValidation {
        let sanitized = url.sanitized();
        let probe = self
            .run(
                args(["ls-remote", "--symref", "--", url.clone_url.as_str()]),
                command,
            )
            .await;

        match probe {
            Ok(output) => {
                let (refs, default_branch) = parse_ls_remote(&output.stdout);
                info!(url = %sanitized, refs = refs.len(), default_branch = ?default_branch, "Repository is accessible");
                RepositoryValidation {
                    url: sanitized,
                    valid: true,
                    exists: true,
                    accessible: true,
                    requires_authentication: false,
                    default_branch,
                    refs,
                    error: None,
                }
            }
            Err(e) => {
                let kind = e.kind();
                debug!(url = %sanitized, kind = ?kind, error = %e, "Repository probe failed");
                let error = match kind {
                    ErrorKind::Authentication => format!("authentication required: {}", e),
                    ErrorKind::NotFound => format!("repository does not exist: {}", e),
                    _ => format!("validation failed: {}", e),
                };
                RepositoryValidation {
                    url: sanitized,
                    requires_authentication: kind == ErrorKind::Authentication,
                    error: Some(error),
                    ..RepositoryValidation::default()
                }
            }
        }
    }

    /// Resolve `reference` (or `HEAD`) on the remote to a commit SHA
    pub async fn resolve_ref(
        &self,
        url: &RepoUrl,
        reference: Option<&str>,
        command: &CommandOptions,
    ) -> Result<String> {
        if let Some(sha) = reference.filter(|r| is_full_sha(r)) {
            return Ok(sha.to_lowercase());
        }

        let sanitized = url.sanitized();
        let target = reference.unwrap_or("HEAD");
        let peeled = format!("{}^{{}}", target);
        let output = self
            .run(
                args(["ls-remote", "--", url.clone_url.as_str(), target, peeled.as_str()]),
                command,
            )
            .await
            .map_err(|e| remote_error(e, &sanitized))?;

        let (refs, _) = parse_ls_remote(&output.stdout);
        match pick_ref(&refs, target) {
            Some(found) => {
                debug!(url = %sanitized, reference = target, matched = %found.name, sha = %found.sha, "Resolved reference");
                Ok(found.sha.clone())
            }
            None if is_commit_sha(target) => Err(Error::NotFound(format!(
                "abbreviated commit '{}' cannot be resolved against {}",
                target, sanitized
            ))),
            None => Err(Error::NotFound(format!(
                "reference '{}' not found in {}",
                target, sanitized
            ))),
        }
    }
}
