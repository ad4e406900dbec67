//! Job Store: durable record of evaluation jobs and their lifecycle.
pub mod job_store;
pub mod snapshot;

pub use job_store::{JobStore, JournalEntry};
pub use snapshot::{SchedulerSnapshot, SNAPSHOT_VERSION};
