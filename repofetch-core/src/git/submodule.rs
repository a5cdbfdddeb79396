//! Submodule initialization and discovery

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use super::url::sanitize_url;
use super::{args, Git};
use crate::process::CommandOptions;
use crate::{Error, Result};

/// A submodule as declared in `.gitmodules`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredSubmodule {
    /// Submodule name
    pub name: String,
    /// Path relative to the superproject root
    pub path: String,
    /// Configured URL, if any
    pub url: Option<String>,
}

/// A submodule present in a clone
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmoduleInfo {
    /// Submodule name
    pub name: String,
    /// Path relative to the superproject root
    pub path: String,
    /// Sanitized URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Checked-out commit, when it could be determined
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

/// Result of initializing submodules
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmoduleOutcome {
    /// Submodules were initialized (possibly none)
    Ready(Vec<SubmoduleInfo>),
    /// Initialization failed; the clone itself is still usable
    Degraded {
        /// What went wrong
        reason: String,
    },
}

impl SubmoduleOutcome {
    /// Initialized submodules (empty when degraded)
    pub fn submodules(&self) -> &[SubmoduleInfo] {
        match self {
            SubmoduleOutcome::Ready(list) => list,
            SubmoduleOutcome::Degraded { .. } => &[],
        }
    }
}

/// Read submodule declarations from a `.gitmodules` file
pub fn read_gitmodules(path: &Path) -> Result<Vec<DeclaredSubmodule>> {
    let config = git2::Config::open(path)?;
    let mut entries = config.entries(Some(r"^submodule\..*\.path$"))?;

    let mut modules = Vec::new();
    // ConfigEntries lends each entry, so it cannot be a std Iterator
    while let Some(entry) = entries.next() {
        let entry = entry?;
        let (Some(key), Some(value)) = (entry.name(), entry.value()) else {
            continue;
        };
        let Some(name) = key
            .strip_prefix("submodule.")
            .and_then(|rest| rest.strip_suffix(".path"))
        else {
            continue;
        };
        let url = config.get_string(&format!("submodule.{}.url", name)).ok();
        modules.push(DeclaredSubmodule {
            name: name.to_string(),
            path: value.to_string(),
            url,
        });
    }
    modules.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(modules)
}

impl Git {
    /// Initialize submodules recursively in `dir`
    ///
    /// Failures other than cancellation are logged and reported as
    /// [`SubmoduleOutcome::Degraded`].
    pub async fn initialize_submodules(
        &self,
        dir: &Path,
        depth: Option<u32>,
        command: &CommandOptions,
    ) -> Result<SubmoduleOutcome> {
        let mut update = args(["submodule", "update", "--init", "--recursive"]);
        if let Some(depth) = depth {
            update.push("--depth".to_string());
            update.push(depth.to_string());
        }

        let initialized = async {
            self.run(update, &command.clone().current_dir(dir)).await?;
            self.discover_submodules(dir, command).await
        }
        .await;

        match initialized {
            Ok(list) => {
                debug!(count = list.len(), "Submodules initialized");
                Ok(SubmoduleOutcome::Ready(list))
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Submodule initialization failed; continuing without submodules");
                Ok(SubmoduleOutcome::Degraded {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// List the submodules declared in `dir` with their checked-out commits
    pub async fn discover_submodules(
        &self,
        dir: &Path,
        command: &CommandOptions,
    ) -> Result<Vec<SubmoduleInfo>> {
        let gitmodules = dir.join(".gitmodules");
        if !gitmodules.is_file() {
            return Ok(Vec::new());
        }

        let declared = read_gitmodules(&gitmodules)?;
        let mut found = Vec::with_capacity(declared.len());
        for module in declared {
            let module_dir: PathBuf = dir.join(&module.path);
            let commit = match self.head_commit(&module_dir, command).await {
                Ok(sha) => Some(sha),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    debug!(path = %module.path, error = %e, "Could not resolve submodule commit");
                    None
                }
            };
            found.push(SubmoduleInfo {
                name: module.name,
                path: module.path,
                url: module.url.as_deref().map(sanitize_url),
                commit,
            });
        }
        Ok(found)
    }
}
