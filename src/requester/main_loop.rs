// Requester: the single cooperative loop driving intake, scheduler and computer

use crate::computer::{MetricsComputer, ScoreOutcome};
use crate::datasets::DatasetRegistry;
use crate::error::{CatalogError, ServerError, StoreError};
use crate::intake::{IntakeQueue, ModelCatalog};
use crate::models::{ControlMessage, FailureCause, IntakeMessage, JobSpec, JobState, ScoreReport, Settings};
use crate::scheduler::JobScheduler;
use crate::scoring::ScoreSink;
use crate::store::JobStore;
use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const SHUTDOWN_GRACE_SECS: u64 = 30;

/// External collaborators the loop talks to.
pub struct Collaborators {
    pub catalog: Box<dyn ModelCatalog>,
    pub intake: Box<dyn IntakeQueue<IntakeMessage>>,
    pub control: Box<dyn IntakeQueue<ControlMessage>>,
    pub sink: Box<dyn ScoreSink>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    /// Meant for another server; left on the queue.
    NotAddressed,
    UnknownModel,
    Accepted { created: usize, existing: usize },
}

/// Counters for one pass of the loop.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickReport {
    pub received: usize,
    pub released: usize,
    pub submitted: usize,
    pub polled: usize,
    pub scored: usize,
    pub scoring_failed: usize,
    pub reported: usize,
    pub dispatched: Option<String>,
    pub flushed: bool,
    pub pruned: usize,
}

pub struct Requester {
    settings: Settings,
    store: Arc<JobStore>,
    scheduler: JobScheduler,
    computer: MetricsComputer,
    datasets: Arc<DatasetRegistry>,
    io: Collaborators,
    snapshot_path: Option<PathBuf>,
    last_poll: Option<DateTime<Utc>>,
    last_flush: Option<DateTime<Utc>>,
}

impl Requester {
    pub fn new(
        settings: Settings,
        store: Arc<JobStore>,
        scheduler: JobScheduler,
        computer: MetricsComputer,
        datasets: Arc<DatasetRegistry>,
        io: Collaborators,
    ) -> Self {
        Self {
            settings,
            store,
            scheduler,
            computer,
            datasets,
            io,
            snapshot_path: None,
            last_poll: None,
            last_flush: None,
        }
    }

    /// Persist the store to `path` on the snapshot cadence and at shutdown.
    pub fn with_snapshot_path(mut self, path: PathBuf) -> Self {
        self.snapshot_path = Some(path);
        self
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    /// Run ticks until `running` is cleared, then shut down cleanly.
    pub fn run(&mut self, running: &AtomicBool) -> Result<(), ServerError> {
        info!("Requester loop started for server {}", self.settings.server_id);
        while running.load(Ordering::SeqCst) {
            let report = self.tick_at(Utc::now())?;
            if report != TickReport::default() {
                debug!("Tick: {:?}", report);
            }
            std::thread::sleep(self.settings.tick_interval());
        }
        self.shutdown_at(Utc::now())
    }

    pub fn tick_at(&mut self, now: DateTime<Utc>) -> Result<TickReport, ServerError> {
        let mut report = TickReport {
            received: self.drain_intake_at(now)?,
            released: self.drain_control_at(now)?,
            submitted: self.submit_at(now),
            ..TickReport::default()
        };

        if self.poll_due(now) {
            report.polled = self.update_status_at(now);
        }

        let (scored, failed) = self.collect_results_at(now);
        report.scored = scored;
        report.scoring_failed = failed;
        report.reported = self.report_scores_at(now);
        report.dispatched = self.dispatch_ready_at(now);
        report.flushed = self.flush_if_due(now)?;
        report.pruned = self
            .store
            .prune_resolved(Duration::seconds(self.settings.resolved_retention_secs as i64), now);
        Ok(report)
    }

    /// Handle one intake message. Duplicate deliveries land on the existing
    /// jobs through their deterministic names.
    pub fn request_at(&self, message: &IntakeMessage, now: DateTime<Utc>) -> Result<RequestOutcome, CatalogError> {
        if !message.is_addressed_to(&self.settings.server_id) {
            debug!(
                "Skipping request for model {} addressed to {:?}",
                message.model_id, message.target_server_id
            );
            return Ok(RequestOutcome::NotAddressed);
        }

        let model = match self.io.catalog.lookup(message.model_id)? {
            Some(model) => model,
            None => {
                warn!("Request for unknown model {}", message.model_id);
                return Ok(RequestOutcome::UnknownModel);
            }
        };

        let datasets = self.datasets.for_task(&model.task);
        if datasets.is_empty() {
            warn!("No datasets registered for task {} (model {})", model.task, model.id);
        }

        let (mut created, mut existing) = (0, 0);
        for dataset in datasets {
            let mut spec = JobSpec::new(model.id, &model.endpoint_name, &dataset.name);
            spec.instance_type = model.instance_type.clone();
            spec.instance_count = model.instance_count;
            match self.store.create_at(spec, now) {
                Ok(_) => created += 1,
                Err(StoreError::DuplicateJob(name)) => {
                    debug!("Job {} already exists", name);
                    existing += 1;
                }
                Err(e) => warn!("Could not create job for model {} on {}: {}", model.id, dataset.name, e),
            }
        }
        info!(
            "Model {} accepted: {} jobs created, {} already known",
            model.id, created, existing
        );
        Ok(RequestOutcome::Accepted { created, existing })
    }

    /// Receive a batch of intake messages. Only an unreachable queue or a
    /// failed snapshot write is fatal.
    pub fn drain_intake_at(&mut self, now: DateTime<Utc>) -> Result<usize, ServerError> {
        let deliveries = self
            .io
            .intake
            .receive(self.settings.intake_batch_size, self.settings.intake_wait())?;
        let received = deliveries.len();

        let mut handled = Vec::new();
        let mut created = 0;
        for delivery in deliveries {
            match self.request_at(&delivery.body, now) {
                Ok(RequestOutcome::NotAddressed) => {}
                Ok(RequestOutcome::Accepted { created: count, .. }) => {
                    created += count;
                    handled.push(delivery.receipt);
                }
                Ok(RequestOutcome::UnknownModel) => handled.push(delivery.receipt),
                Err(e) => warn!("Leaving request for model {} queued: {}", delivery.body.model_id, e),
            }
        }

        // New jobs reach the snapshot before their messages leave the queue.
        if created > 0 {
            self.flush_now(now)?;
        }
        self.delete_intake(&handled);
        Ok(received)
    }

    /// Apply operator releases.
    pub fn drain_control_at(&mut self, now: DateTime<Utc>) -> Result<usize, ServerError> {
        let deliveries = self
            .io
            .control
            .receive(self.settings.intake_batch_size, std::time::Duration::ZERO)?;

        let mut released = 0;
        let mut receipts = Vec::with_capacity(deliveries.len());
        for delivery in deliveries {
            match &delivery.body {
                ControlMessage::Release { job_id } => match self.store.release(job_id, now) {
                    Ok(_) => released += 1,
                    Err(e) => warn!("Release of job {} refused: {}", job_id, e),
                },
            }
            receipts.push(delivery.receipt);
        }

        if released > 0 {
            self.flush_now(now)?;
        }
        for receipt in &receipts {
            if let Err(e) = self.io.control.delete(receipt) {
                warn!("{}", e);
            }
        }
        Ok(released)
    }

    /// Submit pending jobs, oldest first, while the in-flight cap allows.
    pub fn submit_at(&self, now: DateTime<Utc>) -> usize {
        let mut in_flight = self.store.list(JobState::Submitted).len() + self.store.list(JobState::Running).len();
        let mut submitted = 0;

        for job in self.store.list(JobState::Pending) {
            if in_flight >= self.settings.max_in_flight_submissions {
                debug!("In-flight cap of {} reached", self.settings.max_in_flight_submissions);
                break;
            }
            match self.scheduler.submit_at(&job.id, now) {
                Ok(updated) if updated.state.is_in_flight() || updated.state == JobState::Succeeded => {
                    in_flight += usize::from(updated.state.is_in_flight());
                    submitted += 1;
                }
                Ok(_) => {}
                Err(e) => warn!("Submit of job {} failed: {}", job.id, e),
            }
        }
        submitted
    }

    /// Poll every in-flight job.
    pub fn update_status_at(&mut self, now: DateTime<Utc>) -> usize {
        self.last_poll = Some(now);
        let mut in_flight = self.store.list(JobState::Submitted);
        in_flight.extend(self.store.list(JobState::Running));

        let mut polled = 0;
        for job in in_flight {
            match self.scheduler.poll_at(&job.id, now) {
                Ok(_) => polled += 1,
                Err(e) => warn!("Poll of job {} failed: {}", job.id, e),
            }
        }
        polled
    }

    /// Write finished worker results back through the store.
    pub fn collect_results_at(&mut self, now: DateTime<Utc>) -> (usize, usize) {
        let finished = self.computer.collect_completed();
        self.apply_outcomes(finished, now)
    }

    /// Deliver scored results not yet reported. Failures are retried next tick.
    pub fn report_scores_at(&self, now: DateTime<Utc>) -> usize {
        let mut reported = 0;
        for job in self.store.list(JobState::Succeeded) {
            let result = match (&job.result, job.reported_at) {
                (Some(result), None) => result,
                _ => continue,
            };
            let mut score = ScoreReport::from(result);
            score.access_type = self.datasets.get(&job.dataset_id).ok().map(|d| d.access_type);
            if let Err(e) = self.io.sink.report(&score) {
                warn!("Score report for job {} deferred: {}", job.id, e);
                continue;
            }
            match self.store.mark_reported(&job.id, now) {
                Ok(_) => reported += 1,
                Err(e) => warn!("{}", e),
            }
        }
        reported
    }

    /// Hand at most one ready job to the computer.
    pub fn dispatch_ready_at(&self, now: DateTime<Utc>) -> Option<String> {
        if !self.computer.has_capacity() {
            return None;
        }
        let job = self.scheduler.find_next_ready_job()?;
        let claimed = match self.store.claim(&job.id, now) {
            Ok(job) => job,
            Err(e) => {
                warn!("Could not claim job {}: {}", job.id, e);
                return None;
            }
        };
        if let Err(e) = self.computer.compute_one_async(&claimed) {
            warn!("{}", e);
            if let Err(e) = self.store.unclaim(&claimed.id, now) {
                warn!("{}", e);
            }
            return None;
        }
        info!("Dispatched job {} ({}) for scoring", claimed.id, claimed.job_name);
        Some(claimed.id)
    }

    /// Flush the store on shutdown: finish running work within the grace
    /// period, record it, and write the final snapshot.
    pub fn shutdown_at(&mut self, now: DateTime<Utc>) -> Result<(), ServerError> {
        info!("Shutting down; {} metric tasks in flight", self.computer.in_flight());
        let finished = self
            .computer
            .drain(std::time::Duration::from_secs(SHUTDOWN_GRACE_SECS));
        self.apply_outcomes(finished, now);
        self.report_scores_at(now);
        if let Some(path) = &self.snapshot_path {
            self.store.flush_to(path)?;
            info!("Final snapshot written to {:?}", path);
        }
        Ok(())
    }

    fn apply_outcomes(&self, finished: Vec<(String, ScoreOutcome)>, now: DateTime<Utc>) -> (usize, usize) {
        let (mut scored, mut failed) = (0, 0);
        for (job_id, outcome) in finished {
            let written = match outcome {
                Ok(result) => self.store.mark_scored(&job_id, result, now).map(|_| scored += 1),
                Err(e) => {
                    error!("Scoring job {} failed: {}", job_id, e);
                    self.store
                        .fail_at(
                            &job_id,
                            FailureCause::MetricComputationError,
                            Some(json!({ "error": e.to_string() })),
                            now,
                        )
                        .map(|_| failed += 1)
                }
            };
            if let Err(e) = written {
                warn!("Dropping result for job {}: {}", job_id, e);
            }
        }
        (scored, failed)
    }

    fn poll_due(&self, now: DateTime<Utc>) -> bool {
        let interval = Duration::seconds(self.settings.status_poll_interval_secs as i64);
        self.last_poll.map_or(true, |last| now - last >= interval)
    }

    fn flush_if_due(&mut self, now: DateTime<Utc>) -> Result<bool, ServerError> {
        if self.snapshot_path.is_none() {
            return Ok(false);
        }
        let interval = Duration::seconds(self.settings.snapshot_interval_secs as i64);
        let due = self.last_flush.map_or(true, |last| now - last >= interval);
        if !due || self.store.pending_changes() == 0 {
            return Ok(false);
        }
        self.flush_now(now)
    }

    fn flush_now(&mut self, now: DateTime<Utc>) -> Result<bool, ServerError> {
        let path = match &self.snapshot_path {
            Some(path) => path,
            None => return Ok(false),
        };
        self.store.flush_to(path)?;
        self.last_flush = Some(now);
        Ok(true)
    }

    fn delete_intake(&self, receipts: &[String]) {
        for receipt in receipts {
            if let Err(e) = self.io.intake.delete(receipt) {
                warn!("{}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::MemoryQueue;
    use crate::metrics::MetricRegistry;
    use crate::models::{AccessType, Dataset, DatasetStorage, ModelRecord};
    use crate::error::RemoteError;
    use crate::remote::ScriptedPlatform;
    use crate::scoring::MemorySink;

    struct Harness {
        requester: Requester,
        platform: Arc<ScriptedPlatform>,
        intake: Arc<MemoryQueue<IntakeMessage>>,
        control: Arc<MemoryQueue<ControlMessage>>,
        sink: Arc<MemorySink>,
        _runtime: tokio::runtime::Runtime,
    }

    fn dataset(name: &str, task: &str) -> Dataset {
        Dataset {
            name: name.to_string(),
            task: task.to_string(),
            access_type: AccessType::Scoring,
            storage: DatasetStorage {
                input_location: format!("file:///inputs/{}.jsonl", name),
                labels_location: format!("file:///labels/{}.jsonl", name),
            },
            perf_metric: "accuracy".to_string(),
            delta_metrics: vec![],
        }
    }

    fn harness(configure: impl FnOnce(&mut Settings)) -> Harness {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_time()
            .build()
            .unwrap();
        let mut settings = Settings::default();
        settings.server_id = "eu-1".to_string();
        settings.intake_wait_ms = 0;
        settings.retry.jitter = 0.0;
        settings.metric_workers = 1;
        configure(&mut settings);

        let store = Arc::new(JobStore::new());
        let platform = Arc::new(ScriptedPlatform::new());
        let datasets = Arc::new(DatasetRegistry::new(vec![
            dataset("snli", "nli"),
            dataset("mnli", "nli"),
            dataset("squad", "qa"),
            Dataset {
                access_type: AccessType::Hidden,
                ..dataset("squad-holdout", "qa")
            },
        ]));
        let scheduler = JobScheduler::new(store.clone(), platform.clone(), datasets.clone(), &settings);
        let computer = MetricsComputer::new(
            runtime.handle().clone(),
            datasets.clone(),
            Arc::new(MetricRegistry::default()),
            &settings,
        );
        let intake = Arc::new(MemoryQueue::new());
        let control = Arc::new(MemoryQueue::new());
        let sink = Arc::new(MemorySink::new());
        let catalog = vec![ModelRecord {
            id: 8,
            endpoint_name: "ep-8".to_string(),
            task: "nli".to_string(),
            instance_type: Some("ml.g4dn.xlarge".to_string()),
            instance_count: None,
        }];
        let io = Collaborators {
            catalog: Box::new(catalog),
            intake: Box::new(intake.clone()),
            control: Box::new(control.clone()),
            sink: Box::new(sink.clone()),
        };

        Harness {
            requester: Requester::new(settings, store, scheduler, computer, datasets, io),
            platform,
            intake,
            control,
            sink,
            _runtime: runtime,
        }
    }

    fn request(model_id: u64, target: Option<&str>) -> IntakeMessage {
        IntakeMessage {
            model_id,
            target_server_id: target.map(str::to_string),
        }
    }

    #[test]
    fn test_one_job_per_dataset_of_the_task() {
        let h = harness(|_| {});
        let outcome = h.requester.request_at(&request(8, None), Utc::now()).unwrap();

        assert_eq!(outcome, RequestOutcome::Accepted { created: 2, existing: 0 });
        let jobs = h.requester.store().list(JobState::Pending);
        let names: Vec<&str> = jobs.iter().map(|j| j.job_name.as_str()).collect();
        assert!(names.contains(&"eval-8-snli"));
        assert!(names.contains(&"eval-8-mnli"));
        assert_eq!(jobs[0].instance_type.as_deref(), Some("ml.g4dn.xlarge"));
    }

    #[test]
    fn test_redelivered_request_is_idempotent() {
        let mut h = harness(|_| {});
        h.intake.push(request(8, None));
        h.intake.push(request(8, Some("eu-1")));

        let report = h.requester.tick_at(Utc::now()).unwrap();

        assert_eq!(report.received, 2);
        assert_eq!(h.requester.store().len(), 2);
        assert!(h.intake.is_empty());
    }

    #[test]
    fn test_message_for_other_server_stays_queued() {
        let mut h = harness(|_| {});
        h.intake.push(request(8, Some("us-2")));

        h.requester.tick_at(Utc::now()).unwrap();

        assert!(h.requester.store().is_empty());
        assert_eq!(h.intake.len(), 1);
    }

    #[test]
    fn test_unknown_model_is_dropped() {
        let mut h = harness(|_| {});
        h.intake.push(request(99, None));

        h.requester.tick_at(Utc::now()).unwrap();

        assert!(h.requester.store().is_empty());
        assert!(h.intake.is_empty());
    }

    #[test]
    fn test_in_flight_cap_holds_back_submissions() {
        let mut h = harness(|s| s.max_in_flight_submissions = 1);
        h.intake.push(request(8, None));

        let report = h.requester.tick_at(Utc::now()).unwrap();

        assert_eq!(report.submitted, 1);
        assert_eq!(h.platform.submissions().len(), 1);
        assert_eq!(h.requester.store().list(JobState::Pending).len(), 1);
    }

    #[test]
    fn test_control_release_resubmits_failed_job() {
        let mut h = harness(|_| {});
        let now = Utc::now();
        h.platform.push_submit_error(RemoteError::Rejected("quota".to_string()));
        h.intake.push(request(8, None));
        h.requester.tick_at(now).unwrap();

        let failed = h.requester.store().list(JobState::Failed);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].failure_cause, Some(FailureCause::RemoteRejected));

        h.control.push(ControlMessage::Release {
            job_id: failed[0].id.clone(),
        });
        let report = h.requester.tick_at(now + Duration::seconds(1)).unwrap();

        assert_eq!(report.released, 1);
        let job = h.requester.store().get(&failed[0].id).unwrap();
        assert_eq!(job.attempt, 1);
        assert!(job.state.is_in_flight());
        assert!(h.control.is_empty());
    }

    #[test]
    fn test_hidden_dataset_score_is_reported() {
        let h = harness(|_| {});
        let now = Utc::now();
        let store = h.requester.store();
        let job = store
            .create_at(JobSpec::new(8, "ep-8", "squad-holdout"), now)
            .unwrap();
        store.transition_at(&job.id, JobState::Submitted, None, now).unwrap();
        store
            .succeed_at(&job.id, "file:///out/holdout.jsonl".to_string(), None, now)
            .unwrap();
        let result = crate::models::ScoredResult {
            job_id: job.id.clone(),
            model_id: 8,
            dataset_id: "squad-holdout".to_string(),
            perf_metric: "accuracy".to_string(),
            perf: 0.75,
            perf_by_metric: Default::default(),
            output_location: "file:///out/holdout.jsonl".to_string(),
            example_count: 4,
            computed_at: now,
        };
        store.mark_scored(&job.id, result, now).unwrap();

        assert_eq!(h.requester.report_scores_at(now), 1);

        let reports = h.sink.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].job_id, job.id);
        assert_eq!(reports[0].access_type, Some(AccessType::Hidden));
        assert!(store.get(&job.id).unwrap().reported_at.is_some());
    }

    #[test]
    fn test_release_is_durable_before_control_message_is_dropped() {
        let mut h = harness(|_| {});
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheduler_snapshot.json");
        h.requester.snapshot_path = Some(path.clone());
        let now = Utc::now();

        let job = h.requester.store().create_at(JobSpec::new(8, "ep-8", "snli"), now).unwrap();
        h.requester
            .store()
            .fail_at(&job.id, FailureCause::RemoteRejected, None, now)
            .unwrap();
        h.requester.flush_now(now).unwrap();

        h.control.push(ControlMessage::Release { job_id: job.id.clone() });
        assert_eq!(h.requester.drain_control_at(now + Duration::seconds(1)).unwrap(), 1);

        let on_disk = JobStore::new();
        on_disk.restore_from(&path).unwrap();
        let restored = on_disk.get(&job.id).unwrap();
        assert_eq!(restored.state, JobState::Pending);
        assert_eq!(restored.attempt, 1);
        assert!(h.control.is_empty());
    }
}
