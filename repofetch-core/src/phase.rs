//! Clone pipeline phases and the state machine that orders them

use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};

/// A phase of the clone pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClonePhase {
    /// Negotiating credentials
    Authenticating,
    /// Running `git clone`
    Cloning,
    /// Resolving the ref and shaping the working tree
    CheckingOut,
    /// Initializing submodules
    Submodules,
    /// Finished successfully
    Complete,
    /// Terminal failure
    Failed,
}

impl ClonePhase {
    /// Whether no further transitions are possible
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Stable lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authenticating => "authenticating",
            Self::Cloning => "cloning",
            Self::CheckingOut => "checking-out",
            Self::Submodules => "submodules",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ClonePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Ordered phase tracker for one clone
///
/// Phases only move forward along
/// `authenticating -> cloning -> checking-out -> [submodules] -> complete`,
/// and `failed` is reachable from any non-terminal phase.
#[derive(Debug, Clone)]
pub struct PhaseMachine {
    current: ClonePhase,
    valid_transitions: Vec<(ClonePhase, ClonePhase)>,
}

impl PhaseMachine {
    /// Create a machine positioned at `authenticating`
    pub fn new() -> Self {
        use ClonePhase::*;
        Self {
            current: Authenticating,
            valid_transitions: vec![
                (Authenticating, Cloning),
                (Cloning, CheckingOut),
                (CheckingOut, Submodules),
                (CheckingOut, Complete),
                (Submodules, Complete),
            ],
        }
    }

    /// Current phase
    pub fn current(&self) -> ClonePhase {
        self.current
    }

    /// Check if a transition is allowed from the current phase
    pub fn can_transition_to(&self, phase: ClonePhase) -> bool {
        if self.current.is_terminal() {
            return false;
        }
        if phase == ClonePhase::Failed {
            return true;
        }
        self.valid_transitions
            .iter()
            .any(|(from, to)| *from == self.current && *to == phase)
    }

    /// Move to the next phase
    pub fn transition_to(&mut self, phase: ClonePhase) -> Result<()> {
        if !self.can_transition_to(phase) {
            return Err(Error::Other(format!(
                "Invalid phase transition: {} -> {}",
                self.current, phase
            )));
        }
        debug!(from = %self.current, to = %phase, "Clone phase transition");
        self.current = phase;
        Ok(())
    }
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}
