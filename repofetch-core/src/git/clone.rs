//! Clone strategies and commit inspection

use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use super::url::is_commit_sha;
use super::{args, Git};
use crate::process::CommandOptions;
use crate::{Error, Result};

/// Field separator used in `git log` output
const FIELD_SEP: char = '\u{1f}';

/// Shape of a single clone invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloneOptions {
    /// Branch, tag, or commit to fetch
    pub reference: Option<String>,
    /// Shallow clone depth
    pub depth: Option<u32>,
    /// Omit blobs until they are needed
    pub partial: bool,
}

/// Most recent commit in a working tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastCommit {
    /// Full SHA
    pub sha: String,
    /// Author name
    pub author: String,
    /// Author email
    pub email: String,
    /// Author date, strict ISO 8601
    pub date: String,
    /// Subject line
    pub message: String,
}

/// Arguments for `git clone`
///
/// A branch or tag reference is cloned with `--single-branch --branch`. A
/// commit SHA cannot be passed to `--branch`, so the clone skips checkout and
/// [`Git::checkout_commit`] finishes the job.
pub fn clone_args(url: &str, dest: &Path, options: &CloneOptions) -> Vec<String> {
    let mut list = args(["clone"]);
    if let Some(depth) = options.depth {
        list.push("--depth".to_string());
        list.push(depth.to_string());
    }
    match options.reference.as_deref() {
        Some(reference) if is_commit_sha(reference) => list.push("--no-checkout".to_string()),
        Some(reference) => {
            list.push("--single-branch".to_string());
            list.push("--branch".to_string());
            list.push(reference.to_string());
        }
        None => {}
    }
    if options.partial {
        list.push("--filter=blob:none".to_string());
    }
    list.push("--".to_string());
    list.push(url.to_string());
    list.push(dest.display().to_string());
    list
}

fn parse_last_commit(stdout: &str) -> Result<LastCommit> {
    let line = stdout.trim_end_matches(['\r', '\n']);
    let fields: Vec<&str> = line.splitn(5, FIELD_SEP).collect();
    match fields.as_slice() {
        [sha, author, email, date, message] if !sha.is_empty() => Ok(LastCommit {
            sha: sha.to_string(),
            author: author.to_string(),
            email: email.to_string(),
            date: date.to_string(),
            message: message.to_string(),
        }),
        _ => Err(Error::Other(format!(
            "unexpected git log output: {:?}",
            line
        ))),
    }
}

impl Git {
    /// Full clone (optionally shallow) into `dest`
    pub async fn standard_clone(
        &self,
        url: &str,
        dest: &Path,
        options: &CloneOptions,
        command: &CommandOptions,
    ) -> Result<()> {
        let options = CloneOptions {
            partial: false,
            ..options.clone()
        };
        info!(dest = %dest.display(), reference = ?options.reference, depth = ?options.depth, "Cloning repository");
        self.run(clone_args(url, dest, &options), command).await?;
        Ok(())
    }

    /// Blobless clone into `dest`
    pub async fn partial_clone(
        &self,
        url: &str,
        dest: &Path,
        options: &CloneOptions,
        command: &CommandOptions,
    ) -> Result<()> {
        let options = CloneOptions {
            partial: true,
            ..options.clone()
        };
        info!(dest = %dest.display(), reference = ?options.reference, depth = ?options.depth, "Cloning repository (blobless)");
        self.run(clone_args(url, dest, &options), command).await?;
        Ok(())
    }

    /// Detach the working tree at `sha`
    ///
    /// Shallow clones may not contain the commit, so it is fetched first.
    pub async fn checkout_commit(
        &self,
        dir: &Path,
        sha: &str,
        shallow: bool,
        command: &CommandOptions,
    ) -> Result<()> {
        let command = command.clone().current_dir(dir);
        if shallow {
            debug!(sha, "Fetching commit into shallow clone");
            self.run(args(["fetch", "--depth", "1", "origin", sha]), &command)
                .await?;
        }
        self.run(args(["checkout", "--detach", sha]), &command).await?;
        Ok(())
    }

    /// SHA of `HEAD` in `dir`
    pub async fn head_commit(&self, dir: &Path, command: &CommandOptions) -> Result<String> {
        let output = self
            .run(args(["rev-parse", "HEAD"]), &command.clone().current_dir(dir))
            .await?;
        let sha = output.stdout.trim();
        if sha.is_empty() {
            return Err(Error::Other("git rev-parse HEAD returned nothing".to_string()));
        }
        Ok(sha.to_string())
    }

    /// Most recent commit in `dir`
    pub async fn last_commit(&self, dir: &Path, command: &CommandOptions) -> Result<LastCommit> {
        let output = self
            .run(
                args(["log", "-1", "--format=%H%x1f%an%x1f%ae%x1f%aI%x1f%s"]),
                &command.clone().current_dir(dir),
            )
            .await?;
        parse_last_commit(&output.stdout)
    }
}
