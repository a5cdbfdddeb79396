//! Out-of-band error reporting

use std::collections::BTreeMap;

use tracing::error;

use crate::Error;

/// Where a reported error came from, plus structured detail
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportContext {
    /// Component that observed the error (e.g. "clone", "metadata")
    pub source: String,
    /// Extra key/value detail; values must already be sanitized
    pub metadata: BTreeMap<String, String>,
}

impl ReportContext {
    /// Context for `source` with no metadata
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Add one metadata entry
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Receives final failures and failures that were swallowed along the way
pub trait ErrorReporter: Send + Sync {
    /// Record `error`
    fn report(&self, error: &Error, context: &ReportContext);
}

/// Reporter that writes to the tracing subscriber
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, err: &Error, context: &ReportContext) {
        error!(
            source = %context.source,
            kind = ?err.kind(),
            metadata = ?context.metadata,
            error = %err,
            "Reported error"
        );
    }
}
