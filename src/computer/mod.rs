//! Metrics Computer: off-loop scoring of succeeded jobs.
pub mod metrics_computer;
pub mod work;

pub use metrics_computer::{MetricsComputer, ScoreOutcome};
pub use work::score_job;
