//! Exit codes for the CLI

use rebundle_core::{
    BatchReport, ConfigError, PipelineState, ResignError, ResignOutcome, ResignStatus,
};
use rebundle_signing::SigningError;

/// Success
pub const SUCCESS: i32 = 0;

/// One or more files or stages failed
pub const ERROR: i32 = 1;

/// Invalid argument or configuration
pub const INVALID_ARGUMENT: i32 = 2;

/// Signing is not supported on this platform
pub const UNSUPPORTED_PLATFORM: i32 = 3;

/// Every file failed
pub const ALL_FAILED: i32 = 4;

/// User cancelled
pub const CANCELLED: i32 = 130;

/// Exit code for a resign run
pub fn for_outcome(outcome: &ResignOutcome) -> i32 {
    match &outcome.status {
        ResignStatus::Succeeded => SUCCESS,
        ResignStatus::Cancelled { .. } => CANCELLED,
        ResignStatus::Failed {
            stage: PipelineState::SigningMembers,
            ..
        } if outcome.counts.failed > 0 && outcome.counts.succeeded == 0 => ALL_FAILED,
        ResignStatus::Failed { .. } => ERROR,
    }
}

/// Exit code for a batch of directly signed files
///
/// Any failed file is an error, whatever the failure threshold said.
pub fn for_batch(report: &BatchReport) -> i32 {
    if report.cancelled {
        CANCELLED
    } else if report.counts.failed > 0 && report.counts.succeeded == 0 {
        ALL_FAILED
    } else if report.counts.failed > 0 {
        ERROR
    } else {
        SUCCESS
    }
}

/// Exit code for an error that stopped a command before it ran
pub fn for_error(error: &anyhow::Error) -> i32 {
    if let Some(signing) = error.downcast_ref::<SigningError>() {
        return for_signing_error(signing);
    }
    match error.downcast_ref::<ResignError>() {
        Some(ResignError::Signing(signing)) => for_signing_error(signing),
        Some(ResignError::Config(_)) => INVALID_ARGUMENT,
        Some(ResignError::ToolNotFound { .. }) => INVALID_ARGUMENT,
        Some(_) => ERROR,
        None if error.downcast_ref::<ConfigError>().is_some() => INVALID_ARGUMENT,
        None => ERROR,
    }
}

fn for_signing_error(error: &SigningError) -> i32 {
    match error {
        SigningError::UnsupportedPlatform => UNSUPPORTED_PLATFORM,
        SigningError::Configuration(_)
        | SigningError::InvalidArgument(_)
        | SigningError::KeyMismatch { .. }
        | SigningError::UnsupportedKeyKind(_) => INVALID_ARGUMENT,
        _ => ERROR,
    }
}
