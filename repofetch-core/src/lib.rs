//! repofetch core - clone remote repositories into disposable scratch directories
//!
//! The entry point is [`RemoteRepositoryService`], which negotiates
//! credentials, runs `git clone` under a bounded retry policy, shapes the
//! working tree (ref checkout, sparse checkout, submodules), and collects
//! metadata. Every scratch directory it allocates is either handed to the
//! caller or removed, including on cancellation and process shutdown.

pub mod auth;
pub mod config;
pub mod error;
pub mod git;
pub mod operation;
pub mod phase;
pub mod process;
pub mod progress;
pub mod report;
pub mod retry;
pub mod scratch;
pub mod secrets;
pub mod service;
pub mod types;

pub use auth::{AuthMethod, AuthenticationInfo, CredentialNegotiator};
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use git::{LastCommit, RemoteRef, RepoUrl, RepositoryValidation, SubmoduleInfo};
pub use operation::{ActiveOperations, OperationHandle, OperationState};
pub use phase::ClonePhase;
pub use process::{CommandOptions, CommandOutput, CommandRunner, ProcessRunner};
pub use progress::{ProgressSink, ProgressUpdate};
pub use report::{ErrorReporter, ReportContext, TracingReporter};
pub use retry::{Delay, RetryCoordinator, RetryPolicy, TokioDelay};
pub use scratch::{LifecycleRegistrar, ShutdownHandle, SignalRegistrar, TempDirManager};
pub use secrets::Secrets;
pub use service::RemoteRepositoryService;
pub use types::{CloneRequest, CloneResult, CloneStatistics, RepositoryMetadata};
