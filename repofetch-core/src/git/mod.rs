//! Git operations for repofetch
//!
//! Everything that talks to a remote goes through the git executable via a
//! [`CommandRunner`]; libgit2 is only used to read local configuration files.

mod checkout;
mod clone;
mod remote;
mod submodule;
pub mod url;

use std::sync::Arc;

use tracing::trace;

use crate::process::{command_line, CommandOptions, CommandOutput, CommandRunner};
use crate::Result;

pub use clone::{clone_args, CloneOptions, LastCommit};
pub use remote::{parse_ls_remote, RemoteRef, RepositoryValidation};
pub use submodule::{read_gitmodules, DeclaredSubmodule, SubmoduleInfo, SubmoduleOutcome};
pub use url::{is_commit_sha, is_full_sha, sanitize_url, RepoUrl, Transport};

/// Git executable bound to a command runner
#[derive(Clone)]
pub struct Git {
    runner: Arc<dyn CommandRunner>,
    program: String,
}

impl std::fmt::Debug for Git {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Git")
            .field("program", &self.program)
            .finish_non_exhaustive()
    }
}

impl Git {
    /// Invoke `program` through `runner`
    pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }

    /// The git executable being invoked
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run one git command
    ///
    /// Terminal prompts are always disabled so a missing credential fails
    /// instead of hanging.
    pub async fn run(&self, args: Vec<String>, options: &CommandOptions) -> Result<CommandOutput> {
        let mut options = options.clone();
        options
            .env
            .entry("GIT_TERMINAL_PROMPT".to_string())
            .or_insert_with(|| "0".to_string());
        trace!(command = %command_line(&self.program, &args, &options.secrets), "git");
        self.runner.run(&self.program, &args, &options).await
    }
}

/// Build an owned argument list
pub(crate) fn args<I, S>(list: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    list.into_iter().map(Into::into).collect()
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted command runner for unit tests

    use std::path::PathBuf;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::Error;

    /// One recorded invocation
    #[derive(Debug, Clone)]
    pub struct Call {
        pub args: Vec<String>,
        pub cwd: Option<PathBuf>,
        pub options: CommandOptions,
    }

    type Responder = Box<dyn Fn(&[String], &CommandOptions) -> Result<CommandOutput> + Send + Sync>;

    /// Answers every command through a closure and records what was run
    pub struct ScriptedRunner {
        respond: Responder,
        pub calls: Mutex<Vec<Call>>,
    }

    impl ScriptedRunner {
        pub fn new<F>(respond: F) -> Arc<Self>
        where
            F: Fn(&[String], &CommandOptions) -> Result<CommandOutput> + Send + Sync + 'static,
        {
            Arc::new(Self {
                respond: Box::new(respond),
                calls: Mutex::new(Vec::new()),
            })
        }

        /// Runner where every command succeeds with empty output
        pub fn ok() -> Arc<Self> {
            Self::new(|_, _| Ok(CommandOutput::default()))
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        /// Arguments of every call, joined with spaces
        pub fn lines(&self) -> Vec<String> {
            self.calls().iter().map(|c| c.args.join(" ")).collect()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(
            &self,
            _program: &str,
            args: &[String],
            options: &CommandOptions,
        ) -> Result<CommandOutput> {
            self.calls.lock().unwrap().push(Call {
                args: args.to_vec(),
                cwd: options.cwd.clone(),
                options: options.clone(),
            });
            (self.respond)(args, options)
        }
    }

    pub fn stdout(text: &str) -> Result<CommandOutput> {
        Ok(CommandOutput {
            stdout: text.to_string(),
            stderr: String::new(),
        })
    }

    pub fn failure(stderr: &str) -> Result<CommandOutput> {
        Err(Error::CommandFailed {
            command: "git".to_string(),
            code: Some(128),
            signal: None,
            stdout: String::new(),
            stderr: stderr.to_string(),
        })
    }

    pub fn git(runner: Arc<ScriptedRunner>) -> Git {
        Git::new(runner, "git")
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn test_run_disables_terminal_prompt() {
        let runner = ScriptedRunner::ok();
        git(runner.clone())
            .run(args(["status"]), &CommandOptions::new())
            .await
            .unwrap();
        let calls = runner.calls();
        assert_eq!(calls[0].args, vec!["status".to_string()]);
        assert_eq!(
            calls[0].options.env.get("GIT_TERMINAL_PROMPT").map(String::as_str),
            Some("0")
        );
    }
}
