// Job Store: the only writer of job lifecycle state

use super::snapshot::SchedulerSnapshot;
use crate::error::StoreError;
use crate::file_manager::{read_bytes, write_bytes};
use crate::models::{FailureCause, Job, JobSpec, JobState, ScoredResult};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// A mutation recorded since the last flush.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub job_id: String,
    pub action: &'static str,
    pub state: JobState,
    pub at: DateTime<Utc>,
}

/// Authoritative in-memory job table. Callers receive clones; the table is
/// only changed through the methods below, each of which journals.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<String, Job>>,
    journal: Mutex<Vec<JournalEntry>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, spec: JobSpec) -> Result<Job, StoreError> {
        self.create_at(spec, Utc::now())
    }

    /// Fails with `DuplicateJob` while a non-failed job holds the name. A
    /// failed holder is replaced by a fresh job on the next attempt number.
    pub fn create_at(&self, spec: JobSpec, now: DateTime<Utc>) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write();

        let mut attempt = 0;
        let existing = jobs
            .values()
            .find(|j| j.job_name == spec.job_name)
            .map(|j| (j.id.clone(), j.state, j.attempt));
        if let Some((old_id, state, old_attempt)) = existing {
            if state != JobState::Failed {
                return Err(StoreError::DuplicateJob(spec.job_name));
            }
            jobs.remove(&old_id);
            attempt = old_attempt + 1;
            info!("Replacing failed job {} ({}) with a new attempt", old_id, spec.job_name);
        }

        let mut job = Job::new(uuid::Uuid::new_v4().to_string(), spec, now);
        job.attempt = attempt;
        jobs.insert(job.id.clone(), job.clone());
        drop(jobs);

        self.journal_push(&job, "create", now);
        info!("Created job {} ({}) for dataset {}", job.id, job.job_name, job.dataset_id);
        Ok(job)
    }

    pub fn get(&self, id: &str) -> Result<Job, StoreError> {
        self.jobs
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Jobs in `state`, oldest first.
    pub fn list(&self, state: JobState) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .values()
            .filter(|j| j.state == state)
            .cloned()
            .collect();
        sort_by_age(&mut jobs);
        jobs
    }

    pub fn all(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().values().cloned().collect();
        sort_by_age(&mut jobs);
        jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    pub fn transition(&self, id: &str, new_state: JobState, raw_status: Option<Value>) -> Result<Job, StoreError> {
        self.transition_at(id, new_state, raw_status, Utc::now())
    }

    pub fn transition_at(
        &self,
        id: &str,
        new_state: JobState,
        raw_status: Option<Value>,
        now: DateTime<Utc>,
    ) -> Result<Job, StoreError> {
        self.apply_transition(id, new_state, raw_status, now, |_| {})
    }

    /// `-> Succeeded`, recording where the raw predictions landed.
    pub fn succeed_at(
        &self,
        id: &str,
        output_location: String,
        raw_status: Option<Value>,
        now: DateTime<Utc>,
    ) -> Result<Job, StoreError> {
        self.apply_transition(id, JobState::Succeeded, raw_status, now, |job| {
            job.output_location = Some(output_location);
        })
    }

    /// `-> Failed` with a classified cause.
    pub fn fail_at(
        &self,
        id: &str,
        cause: FailureCause,
        raw_status: Option<Value>,
        now: DateTime<Utc>,
    ) -> Result<Job, StoreError> {
        let job = self.apply_transition(id, JobState::Failed, raw_status, now, |job| {
            job.failure_cause = Some(cause);
            job.claimed_at = None;
            job.next_attempt_at = None;
        })?;
        warn!("Job {} ({}) failed: {}", job.id, job.job_name, cause.as_str());
        Ok(job)
    }

    /// A successful status call without a state change.
    pub fn record_poll_at(&self, id: &str, raw_status: Option<Value>, now: DateTime<Utc>) -> Result<Job, StoreError> {
        self.mutate(id, "poll", now, |job| {
            job.last_polled_at = Some(now);
            if raw_status.is_some() {
                job.raw_status = raw_status;
            }
            job.retry_count = 0;
            job.next_attempt_at = None;
            Ok(())
        })
    }

    /// A failed remote call; the job may not be retried before `next_attempt_at`.
    pub fn record_retry(&self, id: &str, next_attempt_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<Job, StoreError> {
        self.mutate(id, "retry", now, |job| {
            job.retry_count += 1;
            job.next_attempt_at = Some(next_attempt_at);
            Ok(())
        })
    }

    /// Hand a ready job to the metrics computer.
    pub fn claim(&self, id: &str, now: DateTime<Utc>) -> Result<Job, StoreError> {
        self.mutate(id, "claim", now, |job| {
            if !job.is_ready() {
                return Err(StoreError::NotReady(job.id.clone()));
            }
            job.claimed_at = Some(now);
            Ok(())
        })
    }

    /// Return a claimed but unscored job to the ready set.
    pub fn unclaim(&self, id: &str, now: DateTime<Utc>) -> Result<Job, StoreError> {
        self.mutate(id, "unclaim", now, |job| {
            job.claimed_at = None;
            Ok(())
        })
    }

    /// Attach the metric result. A job is scored once; overwriting requires an
    /// explicit re-run through `release`.
    pub fn mark_scored(&self, id: &str, result: ScoredResult, now: DateTime<Utc>) -> Result<Job, StoreError> {
        let job = self.mutate(id, "scored", now, |job| {
            if job.state != JobState::Succeeded || job.scored_at.is_some() {
                return Err(StoreError::InvalidTransition {
                    id: job.id.clone(),
                    from: job.state,
                    to: JobState::Succeeded,
                });
            }
            job.result = Some(result);
            job.scored_at = Some(now);
            Ok(())
        })?;
        info!("Job {} ({}) scored", job.id, job.job_name);
        Ok(job)
    }

    pub fn mark_reported(&self, id: &str, now: DateTime<Utc>) -> Result<Job, StoreError> {
        self.mutate(id, "reported", now, |job| {
            job.reported_at = Some(now);
            Ok(())
        })
    }

    /// Operator-triggered `Failed -> Pending` for one more pass.
    pub fn release(&self, id: &str, now: DateTime<Utc>) -> Result<Job, StoreError> {
        let job = self.mutate(id, "release", now, |job| {
            if job.state != JobState::Failed {
                return Err(StoreError::InvalidTransition {
                    id: job.id.clone(),
                    from: job.state,
                    to: JobState::Pending,
                });
            }
            job.state = JobState::Pending;
            job.state_changed_at = now;
            job.attempt += 1;
            job.retry_count = 0;
            job.next_attempt_at = None;
            job.failure_cause = None;
            job.submitted_at = None;
            job.last_polled_at = None;
            job.completed_at = None;
            job.output_location = None;
            job.raw_status = None;
            job.claimed_at = None;
            job.scored_at = None;
            job.result = None;
            job.reported_at = None;
            Ok(())
        })?;
        info!("Released job {} ({}) for attempt {}", job.id, job.job_name, job.attempt);
        Ok(job)
    }

    /// Drop terminal jobs resolved before `now - retention`. Succeeded jobs
    /// are kept until their score has been reported.
    pub fn prune_resolved(&self, retention: Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now - retention;
        let mut jobs = self.jobs.write();
        let expired: Vec<String> = jobs
            .values()
            .filter(|job| {
                let resolved_at = match job.completed_at {
                    Some(at) if job.state.is_terminal() => at,
                    _ => return false,
                };
                let finished = job.state != JobState::Succeeded || job.reported_at.is_some();
                finished && resolved_at < cutoff
            })
            .map(|job| job.id.clone())
            .collect();
        let removed: Vec<Job> = expired.iter().filter_map(|id| jobs.remove(id)).collect();
        drop(jobs);

        for job in &removed {
            self.journal_push(job, "prune", now);
        }
        if !removed.is_empty() {
            debug!("Pruned {} resolved jobs", removed.len());
        }
        removed.len()
    }

    /// Mutations recorded since the last flush.
    pub fn pending_changes(&self) -> usize {
        self.journal.lock().len()
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.journal.lock().clone()
    }

    pub fn snapshot(&self) -> Result<Vec<u8>, StoreError> {
        self.snapshot_at(Utc::now())
    }

    pub fn snapshot_at(&self, now: DateTime<Utc>) -> Result<Vec<u8>, StoreError> {
        SchedulerSnapshot::new(self.all(), now).encode()
    }

    /// Replace the table with the snapshot's jobs. Returns how many were loaded.
    pub fn restore(&self, bytes: &[u8]) -> Result<usize, StoreError> {
        let snapshot = SchedulerSnapshot::decode(bytes)?;
        let count = snapshot.jobs.len();

        let mut jobs = self.jobs.write();
        jobs.clear();
        for job in snapshot.jobs {
            jobs.insert(job.id.clone(), job);
        }
        drop(jobs);

        self.journal.lock().clear();
        info!("Restored {} jobs from snapshot taken at {}", count, snapshot.taken_at);
        Ok(count)
    }

    /// Persist the current table and clear the journal.
    pub fn flush_to(&self, path: &Path) -> Result<(), StoreError> {
        let journal_len = self.pending_changes();
        let bytes = self.snapshot()?;
        write_bytes(path, &bytes).map_err(StoreError::Persistence)?;

        let mut journal = self.journal.lock();
        let flushed = journal_len.min(journal.len());
        journal.drain(..flushed);
        debug!("Flushed snapshot ({} changes) to {:?}", flushed, path);
        Ok(())
    }

    /// Load a snapshot file if one exists. Returns the number of jobs restored.
    pub fn restore_from(&self, path: &Path) -> Result<usize, StoreError> {
        if !path.exists() {
            return Ok(0);
        }
        let bytes = read_bytes(path).map_err(StoreError::Persistence)?;
        self.restore(&bytes)
    }

    fn apply_transition<F>(
        &self,
        id: &str,
        new_state: JobState,
        raw_status: Option<Value>,
        now: DateTime<Utc>,
        extra: F,
    ) -> Result<Job, StoreError>
    where
        F: FnOnce(&mut Job),
    {
        let job = self.mutate(id, "transition", now, |job| {
            if !job.state.can_transition_to(new_state) {
                return Err(StoreError::InvalidTransition {
                    id: job.id.clone(),
                    from: job.state,
                    to: new_state,
                });
            }
            job.state = new_state;
            job.state_changed_at = now;
            if raw_status.is_some() {
                job.raw_status = raw_status;
            }
            match new_state {
                JobState::Submitted => {
                    job.submitted_at = Some(now);
                    job.retry_count = 0;
                    job.next_attempt_at = None;
                }
                state if state.is_terminal() => {
                    job.completed_at.get_or_insert(now);
                }
                _ => {}
            }
            extra(job);
            Ok(())
        })?;
        info!("Job {} ({}) -> {:?}", job.id, job.job_name, job.state);
        Ok(job)
    }

    /// Apply `f` to a copy and commit only if it succeeds and the copy would
    /// still pass snapshot validation.
    fn mutate<F>(&self, id: &str, action: &'static str, now: DateTime<Utc>, f: F) -> Result<Job, StoreError>
    where
        F: FnOnce(&mut Job) -> Result<(), StoreError>,
    {
        let mut jobs = self.jobs.write();
        let current = jobs
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let mut updated = current.clone();
        f(&mut updated)?;
        updated.check_invariants().map_err(StoreError::Inconsistent)?;
        jobs.insert(id.to_string(), updated.clone());
        drop(jobs);

        self.journal_push(&updated, action, now);
        Ok(updated)
    }

    fn journal_push(&self, job: &Job, action: &'static str, at: DateTime<Utc>) {
        self.journal.lock().push(JournalEntry {
            job_id: job.id.clone(),
            action,
            state: job.state,
            at,
        });
    }
}

fn sort_by_age(jobs: &mut [Job]) {
    jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}
