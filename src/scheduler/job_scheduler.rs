// Job Scheduler: Pending -> Submitted -> Running -> {Succeeded, Failed, Expired}

use super::backoff::Backoff;
use super::classify::{poll_outcome, PollOutcome};
use crate::datasets::DatasetRegistry;
use crate::error::{DatasetError, RemoteError, StoreError};
use crate::file_manager::join_location;
use crate::models::{FailureCause, Job, JobState, PlatformSettings, Settings};
use crate::remote::{InferencePlatform, RemoteState, TransformRequest};
use crate::store::JobStore;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde_json::json;
use std::sync::Arc;

/// What start-up reconciliation did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReconcileReport {
    pub verified: usize,
    pub failed: usize,
    pub unclaimed: usize,
}

/// Drives jobs through the remote part of their lifecycle. Holds no job
/// state of its own: every call re-reads the job from the store.
pub struct JobScheduler {
    store: Arc<JobStore>,
    platform: Arc<dyn InferencePlatform>,
    datasets: Arc<DatasetRegistry>,
    backoff: Backoff,
    expiry_window: Duration,
    platform_settings: PlatformSettings,
}

impl JobScheduler {
    pub fn new(
        store: Arc<JobStore>,
        platform: Arc<dyn InferencePlatform>,
        datasets: Arc<DatasetRegistry>,
        settings: &Settings,
    ) -> Self {
        Self {
            store,
            platform,
            datasets,
            backoff: Backoff::from_settings(&settings.retry),
            expiry_window: Duration::seconds(settings.expiry_window_secs as i64),
            platform_settings: settings.platform.clone(),
        }
    }

    pub fn submit(&self, job_id: &str) -> Result<Job, StoreError> {
        self.submit_at(job_id, Utc::now())
    }

    /// Start the remote run for a pending job. Jobs in any other state, or
    /// still backing off, are returned unchanged.
    pub fn submit_at(&self, job_id: &str, now: DateTime<Utc>) -> Result<Job, StoreError> {
        let job = self.store.get(job_id)?;
        if job.state != JobState::Pending {
            debug!("Job {} already {:?}; not resubmitting", job.id, job.state);
            return Ok(job);
        }
        if !job.backoff_elapsed(now) {
            return Ok(job);
        }

        let request = match self.transform_request(&job) {
            Ok(request) => request,
            Err(e) => {
                warn!("Cannot build request for job {}: {}", job.id, e);
                return self.store.fail_at(
                    &job.id,
                    FailureCause::DatasetUnavailable,
                    Some(json!({ "error": e.to_string() })),
                    now,
                );
            }
        };

        match self.platform.submit(&request) {
            Ok(()) => {
                info!("Submitted {} to endpoint {}", request.job_name, request.endpoint_name);
                self.store
                    .transition_at(&job.id, JobState::Submitted, Some(json!({ "request": request })), now)
            }
            Err(RemoteError::DuplicateRequest(name)) => {
                // Already running remotely (e.g. submitted before a restart): adopt it.
                info!("Remote job {} already exists; adopting its status", name);
                self.store.transition_at(&job.id, JobState::Submitted, None, now)?;
                self.poll_at(&job.id, now)
            }
            Err(e) => self.handle_remote_error(&job, e, now),
        }
    }

    pub fn poll(&self, job_id: &str) -> Result<Job, StoreError> {
        self.poll_at(job_id, Utc::now())
    }

    /// Fetch remote status for an in-flight job and apply it.
    pub fn poll_at(&self, job_id: &str, now: DateTime<Utc>) -> Result<Job, StoreError> {
        let job = self.store.get(job_id)?;
        if !job.state.is_in_flight() || !job.backoff_elapsed(now) {
            return Ok(job);
        }

        let status = match self.platform.describe(&job.remote_job_name()) {
            Ok(status) => status,
            Err(e) => return self.handle_remote_error(&job, e, now),
        };
        let raw = Some(status.to_value());
        let polled = self.store.record_poll_at(&job.id, raw.clone(), now)?;

        match poll_outcome(&status) {
            PollOutcome::Active => {
                if job.state == JobState::Submitted && status.state == RemoteState::InProgress {
                    return self.store.transition_at(&job.id, JobState::Running, raw, now);
                }
                if now - job.state_changed_at > self.expiry_window {
                    warn!(
                        "Job {} ({}) unchanged since {}; expiring",
                        job.id, job.job_name, job.state_changed_at
                    );
                    return self.store.transition_at(&job.id, JobState::Expired, raw, now);
                }
                Ok(polled)
            }
            PollOutcome::Succeeded => {
                let output_location = status
                    .output_location
                    .clone()
                    .unwrap_or_else(|| self.output_location_for(&job));
                self.store.succeed_at(&job.id, output_location, raw, now)
            }
            PollOutcome::Failed(cause) => self.store.fail_at(&job.id, cause, raw, now),
        }
    }

    /// Oldest succeeded job not yet handed to the metrics computer, by
    /// submission time.
    pub fn find_next_ready_job(&self) -> Option<Job> {
        self.store
            .list(JobState::Succeeded)
            .into_iter()
            .filter(Job::is_ready)
            .min_by(|a, b| {
                a.submitted_at
                    .cmp(&b.submitted_at)
                    .then_with(|| a.completed_at.cmp(&b.completed_at))
                    .then_with(|| a.id.cmp(&b.id))
            })
    }

    /// Re-verify restored in-flight jobs against the platform and return
    /// orphaned claims to the ready set.
    pub fn reconcile_at(&self, now: DateTime<Utc>) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for job in self.store.all() {
            if job.state.is_in_flight() {
                match self.poll_at(&job.id, now) {
                    Ok(updated) if updated.state == JobState::Failed => report.failed += 1,
                    Ok(_) => report.verified += 1,
                    Err(e) => warn!("Reconcile of job {} failed: {}", job.id, e),
                }
            } else if job.state == JobState::Succeeded && job.claimed_at.is_some() && !job.is_scored() {
                match self.store.unclaim(&job.id, now) {
                    Ok(_) => report.unclaimed += 1,
                    Err(e) => warn!("Could not unclaim job {}: {}", job.id, e),
                }
            }
        }

        info!(
            "Reconciled snapshot: {} verified, {} failed, {} returned to ready",
            report.verified, report.failed, report.unclaimed
        );
        report
    }

    pub fn transform_request(&self, job: &Job) -> Result<TransformRequest, DatasetError> {
        Ok(TransformRequest {
            endpoint_name: job.endpoint_name.clone(),
            job_name: job.remote_job_name(),
            input_location: self.datasets.input_location(&job.dataset_id)?,
            output_location: self.output_location_for(job),
            instance_type: job
                .instance_type
                .clone()
                .unwrap_or_else(|| self.platform_settings.instance_type.clone()),
            instance_count: job
                .instance_count
                .unwrap_or(self.platform_settings.instance_count),
        })
    }

    fn output_location_for(&self, job: &Job) -> String {
        join_location(
            &self.platform_settings.output_root,
            &format!("{}/{}.jsonl", job.endpoint_name, job.remote_job_name()),
        )
    }

    fn handle_remote_error(&self, job: &Job, error: RemoteError, now: DateTime<Utc>) -> Result<Job, StoreError> {
        match error {
            RemoteError::Transient(message) => {
                let failures = job.retry_count + 1;
                if self.backoff.exhausted(failures) {
                    warn!(
                        "Giving up on job {} after {} failed remote calls: {}",
                        job.id, failures, message
                    );
                    return self.store.fail_at(
                        &job.id,
                        FailureCause::SchedulerUnreachable,
                        Some(json!({ "error": message, "attempts": failures })),
                        now,
                    );
                }
                let delay = self.backoff.delay_for(failures);
                warn!(
                    "Remote call for job {} failed ({}/{}), retrying in {:?}: {}",
                    job.id, failures, self.backoff.max_attempts(), delay, message
                );
                let next_attempt = now + Duration::milliseconds(delay.as_millis() as i64);
                self.store.record_retry(&job.id, next_attempt, now)
            }
            RemoteError::Rejected(message) => self.store.fail_at(
                &job.id,
                FailureCause::RemoteRejected,
                Some(json!({ "error": message })),
                now,
            ),
            RemoteError::NotFound(name) => self.store.fail_at(
                &job.id,
                FailureCause::RemoteJobMissing,
                Some(json!({ "error": format!("remote job {} not found", name) })),
                now,
            ),
            RemoteError::DuplicateRequest(name) => {
                debug!("Ignoring duplicate-request response for {}", name);
                Ok(job.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccessType, Dataset, DatasetStorage, JobSpec};
    use crate::remote::{FailureCode, RemoteStatus, ScriptedPlatform};

    fn dataset(name: &str) -> Dataset {
        Dataset {
            name: name.to_string(),
            task: "classification".to_string(),
            access_type: AccessType::Scoring,
            storage: DatasetStorage {
                input_location: format!("file:///data/{}/input.jsonl", name),
                labels_location: format!("file:///data/{}/labels.jsonl", name),
            },
            perf_metric: "accuracy".to_string(),
            delta_metrics: Vec::new(),
        }
    }

    fn setup() -> (Arc<JobStore>, Arc<ScriptedPlatform>, JobScheduler) {
        let store = Arc::new(JobStore::new());
        let platform = Arc::new(ScriptedPlatform::new());
        let datasets = Arc::new(DatasetRegistry::new(vec![dataset("sst2"), dataset("imdb")]));
        let mut settings = Settings::default();
        settings.retry.jitter = 0.0;
        settings.expiry_window_secs = 3600;
        let scheduler = JobScheduler::new(store.clone(), platform.clone(), datasets, &settings);
        (store, platform, scheduler)
    }

    #[test]
    fn test_submit_moves_pending_to_submitted() {
        let (store, platform, scheduler) = setup();
        let now = Utc::now();
        let job = store.create_at(JobSpec::new(7, "ep-7", "sst2"), now).unwrap();

        let job = scheduler.submit_at(&job.id, now).unwrap();

        assert_eq!(job.state, JobState::Submitted);
        assert_eq!(job.submitted_at, Some(now));
        let submissions = platform.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].job_name, "eval-7-sst2");
        assert_eq!(submissions[0].input_location, "file:///data/sst2/input.jsonl");
        assert_eq!(submissions[0].instance_type, "ml.m5.xlarge");
    }

    #[test]
    fn test_resubmitting_is_a_no_op() {
        let (store, platform, scheduler) = setup();
        let now = Utc::now();
        let job = store.create_at(JobSpec::new(7, "ep-7", "sst2"), now).unwrap();

        scheduler.submit_at(&job.id, now).unwrap();
        let again = scheduler.submit_at(&job.id, now).unwrap();

        assert_eq!(again.state, JobState::Submitted);
        assert_eq!(platform.submissions().len(), 1);
    }

    #[test]
    fn test_duplicate_request_adopts_remote_job() {
        let (store, platform, scheduler) = setup();
        let now = Utc::now();
        platform.insert_existing("eval-7-sst2", RemoteStatus::new(RemoteState::InProgress));
        let job = store.create_at(JobSpec::new(7, "ep-7", "sst2"), now).unwrap();

        let job = scheduler.submit_at(&job.id, now).unwrap();

        assert_eq!(job.state, JobState::Running);
        assert!(platform.submissions().is_empty());
    }

    #[test]
    fn test_unknown_dataset_fails_job() {
        let (store, _, scheduler) = setup();
        let now = Utc::now();
        let job = store.create_at(JobSpec::new(7, "ep-7", "missing"), now).unwrap();

        let job = scheduler.submit_at(&job.id, now).unwrap();

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.failure_cause, Some(FailureCause::DatasetUnavailable));
    }

    #[test]
    fn test_transient_errors_back_off_then_give_up() {
        let (store, platform, scheduler) = setup();
        let now = Utc::now();
        let job = store.create_at(JobSpec::new(7, "ep-7", "sst2"), now).unwrap();
        for _ in 0..3 {
            platform.push_submit_error(RemoteError::Transient("connection reset".to_string()));
        }

        let first = scheduler.submit_at(&job.id, now).unwrap();
        assert_eq!(first.state, JobState::Pending);
        assert_eq!(first.retry_count, 1);
        assert_eq!(first.next_attempt_at, Some(now + Duration::seconds(2)));

        // still backing off
        let early = scheduler.submit_at(&job.id, now + Duration::seconds(1)).unwrap();
        assert_eq!(early.retry_count, 1);

        let second = scheduler.submit_at(&job.id, now + Duration::seconds(2)).unwrap();
        assert_eq!(second.retry_count, 2);

        let third = scheduler.submit_at(&job.id, now + Duration::seconds(10)).unwrap();
        assert_eq!(third.state, JobState::Failed);
        assert_eq!(third.failure_cause, Some(FailureCause::SchedulerUnreachable));
        assert!(platform.submissions().is_empty());
    }

    #[test]
    fn test_rejected_submit_fails_job() {
        let (store, platform, scheduler) = setup();
        let now = Utc::now();
        let job = store.create_at(JobSpec::new(7, "ep-7", "sst2"), now).unwrap();
        platform.push_submit_error(RemoteError::Rejected("endpoint not found".to_string()));

        let job = scheduler.submit_at(&job.id, now).unwrap();

        assert_eq!(job.failure_cause, Some(FailureCause::RemoteRejected));
    }

    #[test]
    fn test_poll_maps_remote_states() {
        let (store, platform, scheduler) = setup();
        let now = Utc::now();
        let job = store.create_at(JobSpec::new(7, "ep-7", "sst2"), now).unwrap();
        scheduler.submit_at(&job.id, now).unwrap();

        let running = scheduler.poll_at(&job.id, now + Duration::seconds(60)).unwrap();
        assert_eq!(running.state, JobState::Running);

        let mut done = RemoteStatus::new(RemoteState::Completed);
        done.output_location = Some("file:///out/eval-7-sst2.jsonl".to_string());
        platform.push_status("eval-7-sst2", Ok(done));
        let finished = scheduler.poll_at(&job.id, now + Duration::seconds(120)).unwrap();

        assert_eq!(finished.state, JobState::Succeeded);
        assert_eq!(finished.output_location.as_deref(), Some("file:///out/eval-7-sst2.jsonl"));
        assert_eq!(finished.completed_at, Some(now + Duration::seconds(120)));
        assert!(finished.is_ready());
    }

    #[test]
    fn test_poll_failure_uses_structured_code() {
        let (store, platform, scheduler) = setup();
        let now = Utc::now();
        let job = store.create_at(JobSpec::new(7, "ep-7", "sst2"), now).unwrap();
        scheduler.submit_at(&job.id, now).unwrap();
        platform.push_status(
            "eval-7-sst2",
            Ok(RemoteStatus::failed(FailureCode::AlgorithmError, "worker exited with code 137")),
        );

        let job = scheduler.poll_at(&job.id, now).unwrap();

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.failure_cause, Some(FailureCause::AlgorithmError));
        assert!(job.raw_status.is_some());
    }

    #[test]
    fn test_stuck_job_expires() {
        let (store, _, scheduler) = setup();
        let now = Utc::now();
        let job = store.create_at(JobSpec::new(7, "ep-7", "sst2"), now).unwrap();
        scheduler.submit_at(&job.id, now).unwrap();
        scheduler.poll_at(&job.id, now).unwrap();

        let still = scheduler.poll_at(&job.id, now + Duration::seconds(3599)).unwrap();
        assert_eq!(still.state, JobState::Running);

        let expired = scheduler.poll_at(&job.id, now + Duration::seconds(3601)).unwrap();
        assert_eq!(expired.state, JobState::Expired);
    }

    #[test]
    fn test_missing_remote_job_fails() {
        let (store, platform, scheduler) = setup();
        let now = Utc::now();
        let job = store.create_at(JobSpec::new(7, "ep-7", "sst2"), now).unwrap();
        scheduler.submit_at(&job.id, now).unwrap();
        platform.push_status("eval-7-sst2", Err(RemoteError::NotFound("eval-7-sst2".to_string())));

        let job = scheduler.poll_at(&job.id, now).unwrap();

        assert_eq!(job.failure_cause, Some(FailureCause::RemoteJobMissing));
    }

    #[test]
    fn test_ready_jobs_in_submission_order() {
        let (store, platform, scheduler) = setup();
        let now = Utc::now();
        let later = store.create_at(JobSpec::new(1, "ep-1", "imdb"), now).unwrap();
        let earlier = store.create_at(JobSpec::new(2, "ep-2", "sst2"), now).unwrap();
        scheduler.submit_at(&earlier.id, now).unwrap();
        scheduler.submit_at(&later.id, now + Duration::seconds(5)).unwrap();

        assert!(scheduler.find_next_ready_job().is_none());

        // the later submission finishes first
        platform.push_status("eval-1-imdb", Ok(RemoteStatus::new(RemoteState::Completed)));
        scheduler.poll_at(&later.id, now + Duration::seconds(10)).unwrap();
        platform.push_status("eval-2-sst2", Ok(RemoteStatus::new(RemoteState::Completed)));
        scheduler.poll_at(&earlier.id, now + Duration::seconds(20)).unwrap();

        assert_eq!(scheduler.find_next_ready_job().unwrap().id, earlier.id);
        store.claim(&earlier.id, now).unwrap();
        assert_eq!(scheduler.find_next_ready_job().unwrap().id, later.id);
        store.claim(&later.id, now).unwrap();
        assert!(scheduler.find_next_ready_job().is_none());
    }

    #[test]
    fn test_reconcile_unclaims_and_verifies() {
        let (store, platform, scheduler) = setup();
        let now = Utc::now();
        let in_flight = store.create_at(JobSpec::new(1, "ep-1", "imdb"), now).unwrap();
        let claimed = store.create_at(JobSpec::new(2, "ep-2", "sst2"), now).unwrap();
        scheduler.submit_at(&in_flight.id, now).unwrap();
        scheduler.submit_at(&claimed.id, now).unwrap();
        platform.push_status("eval-2-sst2", Ok(RemoteStatus::new(RemoteState::Completed)));
        scheduler.poll_at(&claimed.id, now).unwrap();
        store.claim(&claimed.id, now).unwrap();

        let report = scheduler.reconcile_at(now + Duration::seconds(1));

        assert_eq!(report.verified, 1);
        assert_eq!(report.unclaimed, 1);
        assert_eq!(store.get(&in_flight.id).unwrap().state, JobState::Running);
        assert!(store.get(&claimed.id).unwrap().is_ready());
    }

    #[test]
    fn test_released_job_uses_new_remote_name() {
        let (store, platform, scheduler) = setup();
        let now = Utc::now();
        let job = store.create_at(JobSpec::new(7, "ep-7", "sst2"), now).unwrap();
        scheduler.submit_at(&job.id, now).unwrap();
        platform.push_status("eval-7-sst2", Ok(RemoteStatus::failed(FailureCode::Timeout, "")));
        scheduler.poll_at(&job.id, now).unwrap();

        store.release(&job.id, now).unwrap();
        let job = scheduler.submit_at(&job.id, now).unwrap();

        assert_eq!(job.state, JobState::Submitted);
        assert_eq!(platform.submissions().last().unwrap().job_name, "eval-7-sst2-r1");
    }
}
