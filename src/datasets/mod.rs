//! Dataset Registry: maps dataset names to their task, storage and metrics,
//! and loads ground truth for scoring.
pub mod registry;

pub use registry::{record_id, DatasetRegistry, LabeledExample};
