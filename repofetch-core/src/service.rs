//! Remote repository service
//!
//! Drives one clone through `authenticating -> cloning -> checking-out ->
//! [submodules] -> complete`, owning the scratch directory for the duration
//! and handing it to the caller only on success.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::auth::{AuthenticationInfo, CredentialNegotiator};
use crate::config::Config;
use crate::git::{
    is_commit_sha, is_full_sha, sanitize_url, CloneOptions, Git, RepoUrl, RepositoryValidation,
    SubmoduleInfo, SubmoduleOutcome,
};
use crate::operation::{ActiveOperations, OperationHandle};
use crate::phase::{ClonePhase, PhaseMachine};
use crate::process::{CommandOptions, CommandRunner, ProcessRunner};
use crate::progress::ProgressTracker;
use crate::report::{ErrorReporter, ReportContext, TracingReporter};
use crate::retry::{Delay, RetryCoordinator, RetryPolicy, TokioDelay};
use crate::scratch::{empty_directory, BeforeCleanup, LifecycleRegistrar, TempDirManager};
use crate::secrets::Secrets;
use crate::types::{
    CloneRequest, CloneResult, CloneStatistics, RepositoryMetadata, ResolvedCloneRequest,
};
use crate::{Error, Result};

/// Shutdown hook that cancels every in-flight clone and waits for it
fn cancel_hook(operations: ActiveOperations) -> BeforeCleanup {
    Arc::new(move || {
        let operations = operations.clone();
        async move { operations.cancel_all().await }.boxed()
    })
}

/// Mutable bookkeeping for one clone
struct CloneRun {
    phases: PhaseMachine,
    auth: Option<AuthenticationInfo>,
    scratch_path: Option<PathBuf>,
    attempts: u32,
    warnings: Vec<String>,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl CloneRun {
    fn new() -> Self {
        Self {
            phases: PhaseMachine::new(),
            auth: None,
            scratch_path: None,
            attempts: 0,
            warnings: Vec::new(),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }
}

/// Clones remote repositories into disposable scratch directories
pub struct RemoteRepositoryService {
    config: Config,
    secrets: Secrets,
    git: Git,
    scratch: TempDirManager,
    negotiator: CredentialNegotiator,
    delay: Arc<dyn Delay>,
    reporter: Arc<dyn ErrorReporter>,
    operations: ActiveOperations,
}

impl std::fmt::Debug for RemoteRepositoryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteRepositoryService")
            .field("config", &self.config)
            .field("git", &self.git)
            .field("scratch", &self.scratch)
            .field("active_operations", &self.operations.len())
            .finish_non_exhaustive()
    }
}

impl RemoteRepositoryService {
    /// Create a service that runs real git processes
    pub fn new(config: Config, secrets: Secrets) -> Self {
        let scratch = TempDirManager::new(config.scratch.root_dir());
        let operations = ActiveOperations::new();
        scratch.set_before_cleanup(Some(cancel_hook(operations.clone())));

        Self {
            git: Git::new(Arc::new(ProcessRunner::new()), config.git.program.clone()),
            negotiator: CredentialNegotiator::new(secrets.clone(), scratch.clone()),
            config,
            secrets,
            scratch,
            delay: Arc::new(TokioDelay),
            reporter: Arc::new(TracingReporter),
            operations,
        }
    }

    /// Run git through `runner` instead of spawning processes directly
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.git = Git::new(runner, self.config.git.program.clone());
        self
    }

    /// Wait between retries with `delay`
    pub fn with_delay(mut self, delay: Arc<dyn Delay>) -> Self {
        self.delay = delay;
        self
    }

    /// Send failures to `reporter`
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Allocate scratch directories through `scratch`
    pub fn with_scratch(mut self, scratch: TempDirManager) -> Self {
        scratch.set_before_cleanup(Some(cancel_hook(self.operations.clone())));
        self.negotiator = CredentialNegotiator::new(self.secrets.clone(), scratch.clone());
        self.scratch = scratch;
        self
    }

    /// Replace the credential negotiator
    pub fn with_negotiator(mut self, negotiator: CredentialNegotiator) -> Self {
        self.negotiator = negotiator;
        self
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Scratch directory manager
    pub fn scratch(&self) -> &TempDirManager {
        &self.scratch
    }

    /// Clones currently in flight
    pub fn active_operations(&self) -> &ActiveOperations {
        &self.operations
    }

    /// Clone a repository into a fresh scratch directory
    ///
    /// On success the caller owns the returned directory and should release
    /// it with [`cleanup`](Self::cleanup). On failure the directory is removed
    /// unless retention was requested.
    pub async fn clone_repository(&self, request: CloneRequest) -> Result<CloneResult> {
        let resolved = match ResolvedCloneRequest::resolve(&request, &self.config) {
            Ok(resolved) => resolved,
            Err(e) => {
                let url = sanitize_url(&request.url);
                let e = e.in_phase(ClonePhase::Authenticating, url.as_str(), None);
                self.reporter
                    .report(&e, &ReportContext::new("clone").with("url", url));
                return Err(e);
            }
        };
        let url = resolved.url.sanitized();

        let token = request
            .cancellation
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_default();
        let handle = Arc::new(OperationHandle::with_token(url.as_str(), token));
        let _guard = self.operations.register(handle.clone());
        let tracker = ProgressTracker::new(request.progress.clone(), handle.token().clone());

        info!(
            url = %url,
            reference = ?resolved.reference,
            partial = resolved.partial_clone,
            sparse = !resolved.sparse_patterns.is_empty(),
            submodules = resolved.include_submodules,
            "Starting clone"
        );

        let mut run = CloneRun::new();
        let outcome = self
            .run_pipeline(&resolved, handle.token(), &tracker, &mut run)
            .await;

        if let Some(auth) = run.auth.take() {
            self.negotiator.release(&auth).await;
        }

        match outcome {
            Ok(result) => {
                handle.complete();
                info!(
                    url = %url,
                    path = %result.local_path.display(),
                    commit = %result.metadata.commit,
                    attempts = result.statistics.attempts,
                    "Clone complete"
                );
                Ok(result)
            }
            Err(e) => {
                let e = self.fail_clone(e, &resolved, &url, &mut run).await;
                handle.fail();
                Err(e)
            }
        }
    }

    async fn run_pipeline(
        &self,
        req: &ResolvedCloneRequest,
        cancel: &CancellationToken,
        tracker: &ProgressTracker,
        run: &mut CloneRun,
    ) -> Result<CloneResult> {
        let sanitized = req.url.sanitized();
        let url = sanitized.as_str();

        tracker.report(
            ClonePhase::Authenticating,
            0,
            format!("Preparing to clone {}", url),
            None,
        )?;
        let auth = self.negotiator.setup_credentials(&req.url).await?;
        if !auth.success {
            run.warnings
                .push("credential setup failed; cloned without credentials".to_string());
        }
        let command = CommandOptions::new()
            .envs(&auth.env)
            .redact(&auth.secrets)
            .cancel_on(cancel)
            .timeout(req.timeout);
        let (auth_method, credentials_used) = (auth.method, auth.credentials_used);
        run.auth = Some(auth);
        tracker.check_cancellation()?;

        let prefix = format!("{}{}-", self.config.scratch.prefix, req.url.cache_name());
        let path = self.scratch.create_temp_dir(&prefix).await?;
        run.scratch_path = Some(path.clone());

        run.phases.transition_to(ClonePhase::Cloning)?;
        tracker.report(ClonePhase::Cloning, 10, format!("Cloning {}", url), None)?;

        let options = CloneOptions {
            reference: req.reference.clone(),
            depth: req.depth,
            partial: req.partial_clone,
        };
        let retry = RetryCoordinator::with_delay(
            RetryPolicy::from_config(&self.config.retry, req.max_retries),
            self.delay.clone(),
        );
        let git = &self.git;
        let (dest, options, command_ref) = (path.as_path(), &options, &command);
        let outcome = retry
            .execute_with_retry("clone", cancel, |attempt| async move {
                if attempt > 1 {
                    empty_directory(dest).await?;
                    tracker.report(
                        ClonePhase::Cloning,
                        10,
                        format!("Retrying clone of {}", url),
                        Some(format!("attempt {}", attempt)),
                    )?;
                }
                if options.partial {
                    git.partial_clone(&req.url.clone_url, dest, options, command_ref)
                        .await
                } else {
                    git.standard_clone(&req.url.clone_url, dest, options, command_ref)
                        .await
                }
            })
            .await?;
        run.attempts = outcome.attempts;

        run.phases.transition_to(ClonePhase::CheckingOut)?;
        tracker.report(
            ClonePhase::CheckingOut,
            55,
            "Resolving reference",
            req.reference.clone(),
        )?;
        let commit = match req.reference.as_deref() {
            Some(sha) if is_commit_sha(sha) => {
                self.git
                    .checkout_commit(&path, sha, req.depth.is_some(), &command)
                    .await?;
                if is_full_sha(sha) {
                    sha.to_lowercase()
                } else {
                    self.git.head_commit(&path, &command).await?
                }
            }
            reference => self.git.resolve_ref(&req.url, reference, &command).await?,
        };

        if !req.sparse_patterns.is_empty() {
            tracker.report(
                ClonePhase::CheckingOut,
                65,
                "Configuring sparse checkout",
                Some(req.sparse_patterns.join(", ")),
            )?;
            self.git
                .setup_sparse_checkout(&path, &req.sparse_patterns, &command)
                .await?;
        }

        let submodules = if req.include_submodules {
            run.phases.transition_to(ClonePhase::Submodules)?;
            tracker.report(ClonePhase::Submodules, 75, "Initializing submodules", None)?;
            match self
                .git
                .initialize_submodules(&path, req.depth, &command)
                .await?
            {
                SubmoduleOutcome::Ready(list) => list,
                SubmoduleOutcome::Degraded { reason } => {
                    let error = Error::Other(reason);
                    self.swallow(
                        &error,
                        "submodules",
                        url,
                        "submodule initialization failed",
                        &mut run.warnings,
                    );
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        tracker.report(run.phases.current(), 90, "Collecting repository metadata", None)?;
        let metadata = self
            .collect_metadata(&path, req, &command, commit, submodules, &mut run.warnings)
            .await?;

        tracker.report(
            ClonePhase::Complete,
            100,
            format!("Cloned {}", url),
            Some(metadata.commit.clone()),
        )?;
        run.phases.transition_to(ClonePhase::Complete)?;

        let retained = req.keep_directory && self.scratch.retain(&path);
        let finished_at = Utc::now();
        Ok(CloneResult {
            local_path: path,
            metadata,
            statistics: CloneStatistics {
                attempts: run.attempts,
                retries_performed: run.attempts.saturating_sub(1),
                duration: run.started.elapsed(),
                partial_clone: req.partial_clone,
                sparse_checkout: !req.sparse_patterns.is_empty(),
                started_at: run.started_at,
                finished_at,
            },
            warnings: std::mem::take(&mut run.warnings),
            credentials_used,
            auth_method,
            retained,
        })
    }

    /// Annotate, report, and clean up after a failed clone
    async fn fail_clone(
        &self,
        error: Error,
        req: &ResolvedCloneRequest,
        url: &str,
        run: &mut CloneRun,
    ) -> Error {
        let phase = run.phases.current();
        if let Err(e) = run.phases.transition_to(ClonePhase::Failed) {
            debug!(url, phase = %phase, error = %e, "Could not mark clone as failed");
        }
        let mut error = error.in_phase(phase, url, run.scratch_path.clone());

        if error.is_cancelled() {
            info!(url, phase = %phase, "Clone cancelled");
        } else {
            self.reporter.report(
                &error,
                &ReportContext::new("clone")
                    .with("url", url)
                    .with("phase", phase.as_str()),
            );
        }

        if let Some(path) = run.scratch_path.as_deref() {
            if req.keep_directory {
                self.scratch.retain(path);
                warn!(url, path = %path.display(), "Clone failed; keeping scratch directory for inspection");
                error = error.retained_with_warning(format!(
                    "scratch directory kept for inspection at {}",
                    path.display()
                ));
            } else if let Err(cleanup_error) = self.scratch.cleanup(path, true).await {
                warn!(url, path = %path.display(), error = %cleanup_error, "Failed to remove scratch directory");
                self.reporter.report(
                    &cleanup_error,
                    &ReportContext::new("cleanup").with("path", path.display().to_string()),
                );
                error = error.with_warning(format!(
                    "failed to remove scratch directory {}: {}",
                    path.display(),
                    cleanup_error
                ));
            }
        }
        error
    }

    async fn collect_metadata(
        &self,
        path: &Path,
        req: &ResolvedCloneRequest,
        command: &CommandOptions,
        commit: String,
        submodules: Vec<SubmoduleInfo>,
        warnings: &mut Vec<String>,
    ) -> Result<RepositoryMetadata> {
        let url = req.url.sanitized();

        let last_commit = match self.git.last_commit(path, command).await {
            Ok(last) => Some(last),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                self.swallow(&e, "metadata", &url, "could not read last commit", warnings);
                None
            }
        };

        let (size_bytes, file_count) = match directory_stats(path.to_path_buf()).await {
            Ok(stats) => stats,
            Err(e) => {
                self.swallow(&e, "metadata", &url, "could not measure working tree", warnings);
                (0, 0)
            }
        };

        Ok(RepositoryMetadata {
            url,
            commit,
            reference: req.reference.clone(),
            size_bytes,
            file_count,
            last_commit,
            submodules,
        })
    }

    /// Record a non-fatal failure
    fn swallow(&self, error: &Error, source: &str, url: &str, what: &str, warnings: &mut Vec<String>) {
        warn!(url, error = %error, "{}", what);
        self.reporter
            .report(error, &ReportContext::new(source).with("url", url));
        warnings.push(format!("{}: {}", what, error));
    }

    /// Probe a remote without cloning it
    pub async fn validate_repository(&self, url: &str) -> RepositoryValidation {
        let repo = match RepoUrl::parse(url) {
            Ok(repo) => repo,
            Err(e) => return RepositoryValidation::invalid(sanitize_url(url), e.to_string()),
        };
        let command = self.probe_options(&repo);
        self.git.validate_repository(&repo, &command).await
    }

    /// Resolve `reference` (or the default branch) on a remote to a commit SHA
    pub async fn resolve_ref(&self, url: &str, reference: Option<&str>) -> Result<String> {
        let repo = RepoUrl::parse(url)?;
        let command = self.probe_options(&repo);
        self.git.resolve_ref(&repo, reference, &command).await
    }

    fn probe_options(&self, repo: &RepoUrl) -> CommandOptions {
        let auth = self.negotiator.probe_credentials(repo);
        CommandOptions::new()
            .envs(&auth.env)
            .redact(&auth.secrets)
            .timeout(self.config.clone.timeout)
    }

    /// Remove a clone returned by [`clone_repository`](Self::clone_repository)
    ///
    /// Only directories this service allocated are removed: tracked paths, or
    /// retained clones sitting directly under the scratch root.
    pub async fn cleanup(&self, local_path: &Path) -> Result<()> {
        if !self
            .scratch
            .is_scratch_path(local_path, &self.config.scratch.prefix)
        {
            return Err(Error::Other(format!(
                "refusing to remove {}: not a scratch directory",
                local_path.display()
            )));
        }
        debug!(path = %local_path.display(), "Cleaning up clone");
        self.scratch.cleanup(local_path, true).await
    }

    /// Cancel in-flight clones and remove every tracked scratch directory
    pub async fn shutdown(&self) {
        self.scratch.run_shutdown_sequence().await;
    }

    /// Run the shutdown sequence on process signals delivered by `registrar`
    pub fn install_shutdown_hooks(&self, registrar: &dyn LifecycleRegistrar) {
        self.scratch
            .setup_process_cleanup(registrar, Some(cancel_hook(self.operations.clone())));
    }
}

/// Total bytes and file count under `root`, skipping `.git`
async fn directory_stats(root: PathBuf) -> Result<(u64, u64)> {
    tokio::task::spawn_blocking(move || {
        let mut size = 0u64;
        let mut files = 0u64;
        let walker = WalkDir::new(&root)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || entry.file_name() != ".git");
        for entry in walker {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            if entry.file_type().is_file() {
                files += 1;
                size += entry.metadata().map_err(|e| Error::Io(e.into()))?.len();
            }
        }
        Ok((size, files))
    })
    .await
    .map_err(|e| Error::Other(format!("metadata task failed: {}", e)))?
}
