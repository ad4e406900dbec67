// Auxiliary performance signals derived from the job itself

use crate::models::Job;
use std::collections::BTreeMap;

pub const EXAMPLES_PER_SECOND: &str = "examples_per_second";
pub const INSTANCE_MEMORY_GIB: &str = "instance_memory_gib";

/// Memory of the common batch-inference instance types, in GiB.
pub fn instance_memory_gib(instance_type: &str) -> Option<f64> {
    let gib = match instance_type {
        "ml.m5.large" => 8.0,
        "ml.m5.xlarge" => 16.0,
        "ml.m5.2xlarge" => 32.0,
        "ml.m5.4xlarge" => 64.0,
        "ml.c5.xlarge" => 8.0,
        "ml.c5.2xlarge" => 16.0,
        "ml.g4dn.xlarge" => 16.0,
        "ml.g4dn.2xlarge" => 32.0,
        "ml.p3.2xlarge" => 61.0,
        _ => return None,
    };
    Some(gib)
}

/// Throughput and memory for a finished job. Signals that cannot be derived
/// (missing timestamps, unknown instance type) are left out.
pub fn job_signals(job: &Job, example_count: usize, default_instance_type: &str) -> BTreeMap<String, f64> {
    let mut signals = BTreeMap::new();

    if let (Some(start), Some(end)) = (job.submitted_at, job.completed_at) {
        let seconds = (end - start).num_milliseconds() as f64 / 1000.0;
        if seconds > 0.0 {
            signals.insert(EXAMPLES_PER_SECOND.to_string(), example_count as f64 / seconds);
        }
    }

    let instance_type = job.instance_type.as_deref().unwrap_or(default_instance_type);
    if let Some(gib) = instance_memory_gib(instance_type) {
        signals.insert(INSTANCE_MEMORY_GIB.to_string(), gib);
    }

    signals
}
