//! Remote lifecycle driving: submission, polling, retries, dispatch order.
pub mod backoff;
pub mod classify;
pub mod job_scheduler;

pub use backoff::Backoff;
pub use classify::{classify_failure, poll_outcome, PollOutcome};
pub use job_scheduler::{JobScheduler, ReconcileReport};
