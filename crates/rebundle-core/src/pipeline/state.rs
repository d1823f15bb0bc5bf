//! Pipeline state machine and failure policy

use serde::{Deserialize, Serialize};

/// Where a resign run is
///
/// Advances strictly left to right on success; any failure or observed
/// cancellation moves to [`Failed`](Self::Failed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Extracting,
    PatchingIdentity,
    SigningMembers,
    Repackaging,
    SigningBundle,
    Completed,
    Failed,
}

impl PipelineState {
    /// The state following a successful stage
    pub fn next(self) -> Self {
        match self {
            Self::Extracting => Self::PatchingIdentity,
            Self::PatchingIdentity => Self::SigningMembers,
            Self::SigningMembers => Self::Repackaging,
            Self::Repackaging => Self::SigningBundle,
            Self::SigningBundle => Self::Completed,
            Self::Completed => Self::Completed,
            Self::Failed => Self::Failed,
        }
    }

    /// Whether the run has stopped
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Extracting => write!(f, "Extracting bundle"),
            Self::PatchingIdentity => write!(f, "Patching member identity"),
            Self::SigningMembers => write!(f, "Signing members"),
            Self::Repackaging => write!(f, "Repackaging bundle"),
            Self::SigningBundle => write!(f, "Signing bundle"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// When continuing past failures, what fails the stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureThreshold {
    /// Any failed file fails the stage
    AnyFailed,
    /// The stage fails only when every file failed
    AllFailed,
}

/// How a multi-file signing stage reacts to failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// The first failure stops the stage
    #[default]
    FailFast,
    /// Sign everything, then apply the threshold to the counts
    ContinueOnError { threshold: FailureThreshold },
}

impl FailurePolicy {
    /// Whether a failure should stop new work from starting
    pub fn stops_on_failure(&self) -> bool {
        matches!(self, Self::FailFast)
    }

    /// Whether a stage with these counts failed
    pub fn stage_failed(&self, counts: &MemberCounts) -> bool {
        if counts.failed == 0 {
            return false;
        }
        match self {
            Self::FailFast => true,
            Self::ContinueOnError {
                threshold: FailureThreshold::AnyFailed,
            } => true,
            Self::ContinueOnError {
                threshold: FailureThreshold::AllFailed,
            } => counts.succeeded == 0,
        }
    }
}

/// Per-file tallies of a signing stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemberCounts {
    pub succeeded: usize,
    pub failed: usize,
}

impl MemberCounts {
    /// Files attempted
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }
}
