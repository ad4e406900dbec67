// Operator commands over the persisted snapshot
// These run in a separate process from the server, so they only read the
// snapshot and talk to the server through the control queue.

use crate::file_manager::read_bytes;
use crate::intake::SpoolQueue;
use crate::models::{ControlMessage, Job, JobState};
use crate::store::SchedulerSnapshot;
use crate::utils::{get_control_queue_dir, get_snapshot_json_path};
use log::debug;
use std::path::Path;

pub fn list_jobs(state: Option<JobState>) -> Result<Vec<Job>, String> {
    list_jobs_in(&get_snapshot_json_path(), state)
}

/// Failed jobs with their causes, for cleanup tooling.
pub fn failed_jobs() -> Result<Vec<Job>, String> {
    list_jobs(Some(JobState::Failed))
}

/// Ask the running server to move a failed job back to pending.
pub fn release_job(job_id: &str) -> Result<String, String> {
    release_job_in(&get_snapshot_json_path(), &get_control_queue_dir(), job_id)
}

pub fn list_jobs_in(snapshot_path: &Path, state: Option<JobState>) -> Result<Vec<Job>, String> {
    if !snapshot_path.exists() {
        return Ok(vec![]);
    }
    let bytes = read_bytes(snapshot_path)?;
    let snapshot = SchedulerSnapshot::decode(&bytes).map_err(|e| e.to_string())?;

    let mut jobs: Vec<Job> = snapshot
        .jobs
        .into_iter()
        .filter(|job| state.map_or(true, |s| job.state == s))
        .collect();
    jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    Ok(jobs)
}

pub fn release_job_in(snapshot_path: &Path, control_dir: &Path, job_id: &str) -> Result<String, String> {
    let jobs = list_jobs_in(snapshot_path, None)?;
    let job = jobs
        .iter()
        .find(|job| job.id == job_id)
        .ok_or_else(|| format!("Job not found: {}", job_id))?;
    if job.state != JobState::Failed {
        return Err(format!("Cannot release job with state {:?}", job.state));
    }

    let queue: SpoolQueue<ControlMessage> = SpoolQueue::open(control_dir).map_err(|e| e.to_string())?;
    let receipt = queue.enqueue(&ControlMessage::Release {
        job_id: job_id.to_string(),
    })?;
    debug!("Queued release of job {} as {}", job_id, receipt);
    Ok(receipt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::IntakeQueue;
    use crate::models::{FailureCause, JobSpec};
    use crate::store::JobStore;
    use chrono::Utc;
    use std::time::Duration;

    fn write_snapshot(path: &Path) -> (String, String) {
        let store = JobStore::new();
        let now = Utc::now();
        let failed = store.create_at(JobSpec::new(1, "ep-1", "snli"), now).unwrap();
        store
            .fail_at(&failed.id, FailureCause::AlgorithmError, None, now)
            .unwrap();
        let pending = store.create_at(JobSpec::new(2, "ep-2", "snli"), now).unwrap();
        store.flush_to(path).unwrap();
        (failed.id, pending.id)
    }

    #[test]
    fn test_list_filters_by_state() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("scheduler_snapshot.json");
        let (failed_id, _) = write_snapshot(&snapshot);

        assert_eq!(list_jobs_in(&snapshot, None).unwrap().len(), 2);
        let failed = list_jobs_in(&snapshot, Some(JobState::Failed)).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, failed_id);
        assert_eq!(failed[0].failure_cause, Some(FailureCause::AlgorithmError));
    }

    #[test]
    fn test_missing_snapshot_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_jobs_in(&dir.path().join("none.json"), None).unwrap().is_empty());
    }

    #[test]
    fn test_release_queues_control_message() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("scheduler_snapshot.json");
        let control = dir.path().join("control");
        let (failed_id, pending_id) = write_snapshot(&snapshot);

        assert!(release_job_in(&snapshot, &control, &pending_id).is_err());
        assert!(release_job_in(&snapshot, &control, "nope").is_err());
        release_job_in(&snapshot, &control, &failed_id).unwrap();

        let queue: SpoolQueue<ControlMessage> = SpoolQueue::open(&control).unwrap();
        let received = queue.receive(10, Duration::ZERO).unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].body, ControlMessage::Release { job_id: failed_id });
    }
}
