//! Score ingestion: hands finished results to the hosting system.
use crate::error::SinkError;
use crate::file_manager::update_json_file;
use crate::models::ScoreReport;
use log::debug;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::time::Duration;

pub trait ScoreSink: Send + Sync {
    /// Deliver one report. Must be safe to call again with the same report.
    fn report(&self, report: &ScoreReport) -> Result<(), SinkError>;
}

/// POSTs each report as JSON to the ingestion service.
pub struct HttpScoreSink {
    agent: ureq::Agent,
    url: String,
}

impl HttpScoreSink {
    pub fn new(url: &str, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            url: url.to_string(),
        }
    }
}

impl ScoreSink for HttpScoreSink {
    fn report(&self, report: &ScoreReport) -> Result<(), SinkError> {
        match self.agent.post(&self.url).send_json(report) {
            Ok(_) => {
                debug!("Reported score for job {}", report.job_id);
                Ok(())
            }
            Err(ureq::Error::Status(code, response)) if code == 429 || code >= 500 => {
                let body = response.into_string().unwrap_or_default();
                Err(SinkError::Unavailable(format!("HTTP {}: {}", code, body)))
            }
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(SinkError::Refused(format!("HTTP {}: {}", code, body)))
            }
            Err(ureq::Error::Transport(transport)) => Err(SinkError::Unavailable(transport.to_string())),
        }
    }
}

/// Keeps one report per job in a JSON array file.
pub struct FileScoreSink {
    path: PathBuf,
}

impl FileScoreSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl ScoreSink for FileScoreSink {
    fn report(&self, report: &ScoreReport) -> Result<(), SinkError> {
        update_json_file(&self.path, |reports: &mut Vec<ScoreReport>| {
            reports.retain(|r| r.job_id != report.job_id);
            reports.push(report.clone());
        })
        .map_err(SinkError::Unavailable)?;
        Ok(())
    }
}

/// Collects reports in memory. `fail_next` makes the following calls fail as
/// if the service were down.
#[derive(Default)]
pub struct MemorySink {
    reports: Mutex<Vec<ScoreReport>>,
    failures: Mutex<u32>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, count: u32) {
        *self.failures.lock() = count;
    }

    pub fn reports(&self) -> Vec<ScoreReport> {
        self.reports.lock().clone()
    }
}

impl ScoreSink for MemorySink {
    fn report(&self, report: &ScoreReport) -> Result<(), SinkError> {
        let mut failures = self.failures.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(SinkError::Unavailable("score service down".to_string()));
        }
        self.reports.lock().push(report.clone());
        Ok(())
    }
}

impl<S: ScoreSink + ?Sized> ScoreSink for std::sync::Arc<S> {
    fn report(&self, report: &ScoreReport) -> Result<(), SinkError> {
        (**self).report(report)
    }
}
