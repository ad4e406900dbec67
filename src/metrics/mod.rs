//! Metric Library: pure scoring functions plus job-level signals.
pub mod functions;
pub mod registry;
pub mod signals;

pub use registry::{MetricFn, MetricRegistry};
pub use signals::job_signals;
