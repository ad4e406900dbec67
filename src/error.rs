// Error types shared across the evaluation core

use crate::models::JobState;
use thiserror::Error;

/// Job Store failures. `DuplicateJob` and `InvalidTransition` are contract
/// violations by the caller; `Snapshot` and `Persistence` are process level.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("job name already in use: {0}")]
    DuplicateJob(String),
    #[error("invalid transition for job {id}: {from:?} -> {to:?}")]
    InvalidTransition {
        id: String,
        from: JobState,
        to: JobState,
    },
    #[error("job {0} is not ready for dispatch")]
    NotReady(String),
    #[error("job would be left inconsistent: {0}")]
    Inconsistent(String),
    #[error("snapshot rejected: {0}")]
    Snapshot(String),
    #[error("snapshot persistence failed: {0}")]
    Persistence(String),
}

/// Errors returned by the remote inference platform.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// A job with this name already exists remotely.
    #[error("duplicate request for {0}")]
    DuplicateRequest(String),
    #[error("remote job not found: {0}")]
    NotFound(String),
    /// Network failures, timeouts, throttling and 5xx responses.
    #[error("transient remote error: {0}")]
    Transient(String),
    /// The platform refused the request outright (bad input, quota, ...).
    #[error("remote rejected request: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue unreachable: {0}")]
    Unreachable(String),
    #[error("failed to delete message {receipt}: {reason}")]
    Delete { receipt: String, reason: String },
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("unknown dataset: {0}")]
    NotFound(String),
    #[error("dataset registry unreadable: {0}")]
    Unreadable(String),
    #[error("ground truth unavailable for {dataset}: {reason}")]
    GroundTruth { dataset: String, reason: String },
    #[error("dataset registered twice: {0}")]
    DuplicateName(String),
}

/// Data-contract violations raised while scoring a job. None of these are
/// retried automatically.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MetricError {
    #[error("raw output unavailable: {0}")]
    MissingOutput(String),
    #[error("malformed record: {0}")]
    Malformed(String),
    #[error("ground truth missing: {0}")]
    MissingGroundTruth(String),
    #[error("no prediction for example {0}")]
    MissingPrediction(String),
    #[error("unknown metric: {0}")]
    UnknownMetric(String),
    #[error("predictions and targets differ in length ({predictions} vs {targets})")]
    LengthMismatch { predictions: usize, targets: usize },
    #[error("nothing to score")]
    Empty,
    #[error("worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("model catalog unreadable: {0}")]
    Unreadable(String),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("score sink unavailable: {0}")]
    Unavailable(String),
    #[error("score sink refused report: {0}")]
    Refused(String),
}

/// Process-level failures. Any of these stops the server; recovery is a
/// restart followed by snapshot reconciliation.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
}
