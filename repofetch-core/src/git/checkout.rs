//! Sparse checkout configuration

use std::path::Path;

use tracing::{debug, warn};

use super::{args, Git};
use crate::process::CommandOptions;
use crate::{Error, Result};

impl Git {
    /// Restrict the working tree in `dir` to `patterns` (cone mode)
    ///
    /// Patterns may name directories or individual files. An empty pattern list leaves the tree untouched. If applying the
    /// patterns fails, sparse checkout is disabled again before the error is
    /// returned as [`Error::SparseCheckout`].
    pub async fn setup_sparse_checkout(
        &self,
        dir: &Path,
        patterns: &[String],
        command: &CommandOptions,
    ) -> Result<()> {
        if patterns.is_empty() {
            return Ok(());
        }
        let command = command.clone().current_dir(dir);
        debug!(dir = %dir.display(), ?patterns, "Configuring sparse checkout");

        self.run(args(["sparse-checkout", "init", "--cone"]), &command)
            .await
            .map_err(into_sparse_error)?;

        // Cone mode rejects file patterns such as `README.md` unless checks
        // are skipped; root-level files are always materialized in cone mode
        let mut set = args(["sparse-checkout", "set", "--skip-checks"]);
        set.extend(patterns.iter().cloned());
        if let Err(e) = self.run(set, &command).await {
            if !e.is_cancelled() {
                // Rollback must run even though the operation token may be
                // about to fire, so it is detached from cancellation
                let mut rollback = command.clone();
                rollback.cancel = None;
                if let Err(disable) = self
                    .run(args(["sparse-checkout", "disable"]), &rollback)
                    .await
                {
                    warn!(error = %disable, "Failed to disable sparse checkout after error");
                }
            }
            return Err(into_sparse_error(e));
        }
        Ok(())
    }
}

fn into_sparse_error(e: Error) -> Error {
    match e {
        Error::Cancelled => Error::Cancelled,
        other => Error::SparseCheckout(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use std::path::PathBuf;

    fn patterns(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_empty_patterns_is_noop() {
        let runner = ScriptedRunner::ok();
        git(runner.clone())
            .setup_sparse_checkout(&PathBuf::from("/tmp/x"), &[], &CommandOptions::new())
            .await
            .unwrap();
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_init_then_set() {
        let runner = ScriptedRunner::ok();
        let dir = PathBuf::from("/tmp/x");
        git(runner.clone())
            .setup_sparse_checkout(&dir, &patterns(&["src/", "docs/"]), &CommandOptions::new())
            .await
            .unwrap();
        assert_eq!(
            runner.lines(),
            vec![
                "sparse-checkout init --cone".to_string(),
                "sparse-checkout set --skip-checks src/ docs/".to_string()
            ]
        );
        assert!(runner.calls().iter().all(|c| c.cwd.as_deref() == Some(dir.as_path())));
    }

    #[tokio::test]
    async fn test_set_failure_rolls_back() {
        let runner = ScriptedRunner::new(|args, _| {
            if args.get(1).map(String::as_str) == Some("set") {
                failure("fatal: bad pattern")
            } else {
                Ok(Default::default())
            }
        });
        let err = git(runner.clone())
            .setup_sparse_checkout(&PathBuf::from("/tmp/x"), &patterns(&["["]), &CommandOptions::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::SparseCheckout(ref m) if m.contains("bad pattern")));
        assert_eq!(
            runner.lines().last().map(String::as_str),
            Some("sparse-checkout disable")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_directory_and_file_patterns_with_real_git() {
        use crate::process::ProcessRunner;
        use std::process::Command;
        use std::sync::Arc;

        let available = Command::new("git").arg("--version").output().is_ok_and(|o| o.status.success());
        if !available {
            return;
        }

        let repo = tempfile::TempDir::new().unwrap();
        let root = repo.path();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::create_dir_all(root.join("docs")).unwrap();
        std::fs::write(root.join("README.md"), "hello").unwrap();
        std::fs::write(root.join("src/lib.rs"), "pub fn f() {}").unwrap();
        std::fs::write(root.join("docs/guide.md"), "guide").unwrap();
        let git_cmd = |list: &[&str]| {
            let status = Command::new("git")
                .args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
                .args(list)
                .current_dir(root)
                .output()
                .unwrap();
            assert!(status.status.success(), "{:?}", status);
        };
        git_cmd(&["init", "-q"]);
        git_cmd(&["add", "."]);
        git_cmd(&["commit", "-q", "-m", "init"]);

        Git::new(Arc::new(ProcessRunner::new()), "git")
            .setup_sparse_checkout(root, &patterns(&["src", "README.md"]), &CommandOptions::new())
            .await
            .unwrap();

        assert!(root.join("src/lib.rs").exists());
        assert!(root.join("README.md").exists());
        assert!(!root.join("docs/guide.md").exists());
    }

    #[tokio::test]
    async fn test_cancellation_is_not_rewrapped() {
        let runner = ScriptedRunner::new(|_, _| Err(Error::Cancelled));
        let err = git(runner.clone())
            .setup_sparse_checkout(&PathBuf::from("/tmp/x"), &patterns(&["src/"]), &CommandOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(runner.calls().len(), 1);
    }
}
