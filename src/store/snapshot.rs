// Versioned snapshot format for crash recovery

use crate::error::StoreError;
use crate::models::Job;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Bump when a change is not readable by older servers. Additive optional
/// fields do not need a bump: unknown fields are ignored on read.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerSnapshot {
    pub version: u32,
    pub taken_at: DateTime<Utc>,
    pub jobs: Vec<Job>,
}

impl SchedulerSnapshot {
    pub fn new(jobs: Vec<Job>, taken_at: DateTime<Utc>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            taken_at,
            jobs,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec_pretty(self).map_err(|e| StoreError::Snapshot(e.to_string()))
    }

    /// Parse and schema-check a snapshot. Anything suspicious is refused
    /// rather than partially loaded.
    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let snapshot: SchedulerSnapshot =
            serde_json::from_slice(bytes).map_err(|e| StoreError::Snapshot(e.to_string()))?;

        if snapshot.version == 0 || snapshot.version > SNAPSHOT_VERSION {
            return Err(StoreError::Snapshot(format!(
                "unsupported snapshot version {} (reader supports up to {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }

        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for job in &snapshot.jobs {
            job.check_invariants().map_err(StoreError::Snapshot)?;
            if !ids.insert(job.id.as_str()) {
                return Err(StoreError::Snapshot(format!("duplicate job id {}", job.id)));
            }
            if !names.insert(job.job_name.as_str()) {
                return Err(StoreError::Snapshot(format!("duplicate job name {}", job.job_name)));
            }
        }

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobSpec, JobState};

    fn job(id: &str, name: &str) -> Job {
        let mut spec = JobSpec::new(1, "ep", "ds");
        spec.job_name = name.to_string();
        Job::new(id.to_string(), spec, Utc::now())
    }

    #[test]
    fn test_newer_version_is_refused() {
        let mut snapshot = SchedulerSnapshot::new(vec![], Utc::now());
        snapshot.version = SNAPSHOT_VERSION + 1;
        let bytes = serde_json::to_vec(&snapshot).unwrap();
        assert!(matches!(SchedulerSnapshot::decode(&bytes), Err(StoreError::Snapshot(_))));
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let snapshot = SchedulerSnapshot::new(vec![job("a", "eval-1-ds")], Utc::now());
        let mut value = serde_json::to_value(&snapshot).unwrap();
        value["written_by"] = serde_json::json!("evalserver 9.9");
        value["jobs"][0]["gpu_hours"] = serde_json::json!(1.5);

        let decoded = SchedulerSnapshot::decode(&serde_json::to_vec(&value).unwrap()).unwrap();
        assert_eq!(decoded.jobs, snapshot.jobs);
    }

    #[test]
    fn test_duplicate_names_are_refused() {
        let snapshot = SchedulerSnapshot::new(vec![job("a", "same"), job("b", "same")], Utc::now());
        let bytes = snapshot.encode().unwrap();
        assert!(SchedulerSnapshot::decode(&bytes).is_err());
    }

    #[test]
    fn test_broken_invariants_are_refused() {
        let mut broken = job("a", "eval-1-ds");
        broken.state = JobState::Succeeded;
        let bytes = SchedulerSnapshot::new(vec![broken], Utc::now()).encode().unwrap();
        assert!(SchedulerSnapshot::decode(&bytes).is_err());
    }

    #[test]
    fn test_garbage_is_refused() {
        assert!(SchedulerSnapshot::decode(b"{not json").is_err());
    }
}
