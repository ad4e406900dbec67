pub mod metric_pool;

pub use metric_pool::{MetricPool, WorkerMessage};
