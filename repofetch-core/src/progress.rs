//! Progress reporting and cooperative cancellation checks

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::phase::ClonePhase;
use crate::{Error, Result};

/// One progress event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    /// Phase the pipeline is in
    pub phase: ClonePhase,
    /// Overall completion, 0-100
    pub percent: u8,
    /// Human-readable status line
    pub message: String,
    /// Optional extra detail (e.g. the attempt number)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Single consumer of progress events for one clone
pub trait ProgressSink: Send + Sync {
    /// Receive an update
    fn report(&self, update: &ProgressUpdate);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressUpdate) + Send + Sync,
{
    fn report(&self, update: &ProgressUpdate) {
        self(update)
    }
}

/// Delivers progress to an optional sink and owns the cancellation check
#[derive(Clone)]
pub struct ProgressTracker {
    sink: Option<Arc<dyn ProgressSink>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("has_sink", &self.sink.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl ProgressTracker {
    /// Create a tracker for one operation
    pub fn new(sink: Option<Arc<dyn ProgressSink>>, cancel: CancellationToken) -> Self {
        Self { sink, cancel }
    }

    /// Fail with [`Error::Cancelled`] if cancellation has been requested
    pub fn check_cancellation(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Check cancellation, then deliver an update
    ///
    /// A panicking sink is logged and otherwise ignored.
    pub fn report(
        &self,
        phase: ClonePhase,
        percent: u8,
        message: impl Into<String>,
        detail: Option<String>,
    ) -> Result<()> {
        self.check_cancellation()?;

        let update = ProgressUpdate {
            phase,
            percent: percent.min(100),
            message: message.into(),
            detail,
        };
        debug!(phase = %update.phase, percent = update.percent, message = %update.message, "Progress");

        if let Some(sink) = &self.sink {
            if catch_unwind(AssertUnwindSafe(|| sink.report(&update))).is_err() {
                warn!(phase = %update.phase, "Progress sink panicked; ignoring");
            }
        }
        Ok(())
    }
}
