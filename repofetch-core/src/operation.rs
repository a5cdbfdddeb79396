//! In-flight clone tracking
//!
//! Each clone registers an [`OperationHandle`] in [`ActiveOperations`] so the
//! shutdown sequence can cancel it and wait for it to unwind before scratch
//! directories are removed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Settlement state of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// Still working
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error (including cancellation)
    Failed,
}

/// Cancellation and completion for one in-flight clone
pub struct OperationHandle {
    id: Uuid,
    url: String,
    token: CancellationToken,
    state: watch::Sender<OperationState>,
}

impl std::fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationHandle")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("state", &self.state())
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

impl OperationHandle {
    /// Create a handle with its own cancellation token
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_token(url, CancellationToken::new())
    }

    /// Create a handle around an existing token
    ///
    /// Pass a child of the caller's token to link external cancellation.
    pub fn with_token(url: impl Into<String>, token: CancellationToken) -> Self {
        let (state, _) = watch::channel(OperationState::Running);
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            token,
            state,
        }
    }

    /// Unique id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Sanitized repository URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Token that the pipeline observes
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Current state
    pub fn state(&self) -> OperationState {
        *self.state.borrow()
    }

    /// Settle as completed; returns false if already settled
    pub fn complete(&self) -> bool {
        self.settle(OperationState::Completed)
    }

    /// Settle as failed; returns false if already settled
    pub fn fail(&self) -> bool {
        self.settle(OperationState::Failed)
    }

    fn settle(&self, outcome: OperationState) -> bool {
        self.state.send_if_modified(|current| {
            if *current == OperationState::Running {
                *current = outcome;
                true
            } else {
                false
            }
        })
    }

    /// Wait until the operation settles
    pub async fn wait(&self) -> OperationState {
        let mut rx = self.state.subscribe();
        let settled = rx
            .wait_for(|state| *state != OperationState::Running)
            .await
            .map(|state| *state);
        settled.unwrap_or_else(|_| self.state())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry of in-flight operations
#[derive(Debug, Clone, Default)]
pub struct ActiveOperations {
    inner: Arc<Mutex<HashMap<Uuid, Arc<OperationHandle>>>>,
}

impl ActiveOperations {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` until the returned guard is dropped
    pub fn register(&self, handle: Arc<OperationHandle>) -> OperationGuard {
        debug!(id = %handle.id(), url = %handle.url(), "Registered operation");
        lock(&self.inner).insert(handle.id(), handle.clone());
        OperationGuard {
            operations: self.clone(),
            handle,
        }
    }

    /// Number of operations in flight
    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    /// Whether nothing is in flight
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handles currently in flight
    pub fn snapshot(&self) -> Vec<Arc<OperationHandle>> {
        lock(&self.inner).values().cloned().collect()
    }

    /// Cancel every in-flight operation and wait for all of them to settle
    pub async fn cancel_all(&self) {
        let handles = self.snapshot();
        if handles.is_empty() {
            return;
        }
        info!(count = handles.len(), "Cancelling in-flight clones");
        for handle in &handles {
            handle.cancel();
        }
        join_all(handles.iter().map(|handle| handle.wait())).await;
    }
}

/// Deregisters an operation when dropped
///
/// An operation whose guard is dropped while still running (for example
/// because the caller dropped the clone future) is settled as failed so that
/// shutdown never waits on it forever.
#[derive(Debug)]
pub struct OperationGuard {
    operations: ActiveOperations,
    handle: Arc<OperationHandle>,
}

impl OperationGuard {
    /// The guarded handle
    pub fn handle(&self) -> &Arc<OperationHandle> {
        &self.handle
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        if self.handle.fail() {
            debug!(id = %self.handle.id(), "Operation dropped before settling");
        }
        lock(&self.operations.inner).remove(&self.handle.id());
    }
}
