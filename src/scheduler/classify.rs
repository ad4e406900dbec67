// Mapping remote job states onto the local lifecycle

use crate::models::FailureCause;
use crate::remote::{FailureCode, RemoteState, RemoteStatus};

/// What a status response means locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Still queued or executing.
    Active,
    Succeeded,
    Failed(FailureCause),
}

/// Cause from the platform's structured failure code. Free-form
/// `failure_reason` text is kept in `raw_status` only and never parsed.
pub fn classify_failure(status: &RemoteStatus) -> FailureCause {
    match status.failure_code {
        Some(FailureCode::AlgorithmError) => FailureCause::AlgorithmError,
        Some(FailureCode::ResourceLimitExceeded) => FailureCause::ResourceExhausted,
        Some(FailureCode::Timeout) => FailureCause::Timeout,
        Some(FailureCode::ClientError) => FailureCause::InvalidInput,
        Some(FailureCode::InternalServerError) | Some(FailureCode::Unknown) | None => {
            FailureCause::RemoteFailure
        }
    }
}

pub fn poll_outcome(status: &RemoteStatus) -> PollOutcome {
    match status.state {
        RemoteState::InProgress | RemoteState::Stopping => PollOutcome::Active,
        RemoteState::Completed => PollOutcome::Succeeded,
        RemoteState::Failed => PollOutcome::Failed(classify_failure(status)),
        // Stopped by someone other than us
        RemoteState::Stopped => PollOutcome::Failed(FailureCause::RemoteFailure),
    }
}
