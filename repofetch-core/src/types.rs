//! Request and result types for clone operations

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::auth::AuthMethod;
use crate::config::Config;
use crate::git::{LastCommit, RepoUrl, SubmoduleInfo};
use crate::progress::ProgressSink;
use crate::Result;

/// What the caller wants cloned
///
/// Unset fields fall back to [`Config`] when the request is resolved.
#[derive(Clone, Default)]
pub struct CloneRequest {
    /// Repository URL or `owner/repo` shorthand
    pub url: String,
    /// Branch, tag, or commit SHA
    pub reference: Option<String>,
    /// Sparse checkout patterns
    pub sparse_checkout: Option<Vec<String>>,
    /// Initialize submodules
    pub include_submodules: bool,
    /// Blobless clone
    pub partial_clone: Option<bool>,
    /// Shallow clone depth
    pub depth: Option<u32>,
    /// Keep the scratch directory on failure and past shutdown
    pub keep_directory: Option<bool>,
    /// Per-command timeout
    pub timeout: Option<Duration>,
    /// Attempt budget for the clone step
    pub max_retries: Option<u32>,
    /// Progress consumer
    pub progress: Option<Arc<dyn ProgressSink>>,
    /// External cancellation
    pub cancellation: Option<CancellationToken>,
}

impl std::fmt::Debug for CloneRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloneRequest")
            .field("url", &crate::git::sanitize_url(&self.url))
            .field("reference", &self.reference)
            .field("sparse_checkout", &self.sparse_checkout)
            .field("include_submodules", &self.include_submodules)
            .field("partial_clone", &self.partial_clone)
            .field("depth", &self.depth)
            .field("keep_directory", &self.keep_directory)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("has_progress", &self.progress.is_some())
            .field("has_cancellation", &self.cancellation.is_some())
            .finish()
    }
}

impl CloneRequest {
    /// Request a clone of `url` with all defaults
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Check out `reference`
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Restrict the working tree to `patterns`
    pub fn with_sparse_checkout<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sparse_checkout = Some(patterns.into_iter().map(Into::into).collect());
        self
    }

    /// Initialize submodules
    pub fn with_submodules(mut self, include: bool) -> Self {
        self.include_submodules = include;
        self
    }

    /// Choose a blobless clone
    pub fn with_partial_clone(mut self, partial: bool) -> Self {
        self.partial_clone = Some(partial);
        self
    }

    /// Limit history depth
    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = Some(depth);
        self
    }

    /// Keep the scratch directory
    pub fn with_keep_directory(mut self, keep: bool) -> Self {
        self.keep_directory = Some(keep);
        self
    }

    /// Per-command timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attempt budget for the clone step
    pub fn with_max_retries(mut self, attempts: u32) -> Self {
        self.max_retries = Some(attempts);
        self
    }

    /// Deliver progress to `sink`
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Observe `token` for cancellation
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// A [`CloneRequest`] with every option decided
#[derive(Debug, Clone)]
pub struct ResolvedCloneRequest {
    /// Parsed URL
    pub url: RepoUrl,
    /// Branch, tag, or commit SHA
    pub reference: Option<String>,
    /// Sparse checkout patterns (empty for a full tree)
    pub sparse_patterns: Vec<String>,
    /// Initialize submodules
    pub include_submodules: bool,
    /// Blobless clone
    pub partial_clone: bool,
    /// Shallow clone depth
    pub depth: Option<u32>,
    /// Keep the scratch directory
    pub keep_directory: bool,
    /// Per-command timeout
    pub timeout: Duration,
    /// Attempt budget
    pub max_retries: u32,
}

impl ResolvedCloneRequest {
    /// Merge `request` over `config`; request values win when present
    pub fn resolve(request: &CloneRequest, config: &Config) -> Result<Self> {
        let url = RepoUrl::parse(&request.url)?;
        let reference = request
            .reference
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);
        let sparse_patterns = request
            .sparse_checkout
            .clone()
            .unwrap_or_else(|| config.clone.sparse_patterns.clone())
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();

        Ok(Self {
            url,
            reference,
            sparse_patterns,
            include_submodules: request.include_submodules,
            partial_clone: request.partial_clone.unwrap_or(config.clone.partial_clone),
            depth: request.depth.or(config.clone.depth).filter(|d| *d > 0),
            keep_directory: request.keep_directory.unwrap_or(config.clone.keep_directory),
            timeout: request.timeout.unwrap_or(config.clone.timeout),
            max_retries: request.max_retries.unwrap_or(config.clone.max_retries),
        })
    }
}

/// Facts about a finished clone
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryMetadata {
    /// Origin URL with credentials removed
    pub url: String,
    /// Resolved commit SHA
    pub commit: String,
    /// Requested reference, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Total bytes in the working tree (excluding `.git`)
    pub size_bytes: u64,
    /// Number of files in the working tree (excluding `.git`)
    pub file_count: u64,
    /// Most recent commit, when it could be read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_commit: Option<LastCommit>,
    /// Initialized submodules
    pub submodules: Vec<SubmoduleInfo>,
}

/// How a clone went
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloneStatistics {
    /// Clone attempts, including the successful one
    pub attempts: u32,
    /// Attempts beyond the first
    pub retries_performed: u32,
    /// Wall-clock time for the whole operation
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Whether a blobless clone was used
    pub partial_clone: bool,
    /// Whether sparse checkout was configured
    pub sparse_checkout: bool,
    /// When the operation started
    pub started_at: DateTime<Utc>,
    /// When the operation finished
    pub finished_at: DateTime<Utc>,
}

/// A successful clone
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloneResult {
    /// Working directory of the clone
    pub local_path: PathBuf,
    /// Repository facts
    pub metadata: RepositoryMetadata,
    /// Timing and attempt counts
    pub statistics: CloneStatistics,
    /// Non-fatal problems
    pub warnings: Vec<String>,
    /// Whether credentials were presented
    pub credentials_used: bool,
    /// How the clone authenticated
    pub auth_method: AuthMethod,
    /// Whether the directory survives shutdown
    pub retained: bool,
}
