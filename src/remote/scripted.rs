// In-memory inference platform driven by scripted responses

use super::{InferencePlatform, RemoteState, RemoteStatus, TransformRequest};
use crate::error::RemoteError;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

#[derive(Default)]
struct ScriptState {
    submissions: Vec<TransformRequest>,
    known: HashMap<String, RemoteStatus>,
    submit_errors: VecDeque<RemoteError>,
    statuses: HashMap<String, VecDeque<Result<RemoteStatus, RemoteError>>>,
}

/// Behaves like a real platform: a second submit with the same name gets
/// `DuplicateRequest`. Queued errors and statuses are consumed in order; once
/// a job's status script runs out the last reported status repeats.
#[derive(Default)]
pub struct ScriptedPlatform {
    state: Mutex<ScriptState>,
}

impl ScriptedPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next submit call with `error`.
    pub fn push_submit_error(&self, error: RemoteError) {
        self.state.lock().submit_errors.push_back(error);
    }

    pub fn push_status(&self, job_name: &str, status: Result<RemoteStatus, RemoteError>) {
        self.state
            .lock()
            .statuses
            .entry(job_name.to_string())
            .or_default()
            .push_back(status);
    }

    /// Pretend a job already exists remotely, e.g. submitted before a crash.
    pub fn insert_existing(&self, job_name: &str, status: RemoteStatus) {
        self.state.lock().known.insert(job_name.to_string(), status);
    }

    /// Accepted submissions, in order.
    pub fn submissions(&self) -> Vec<TransformRequest> {
        self.state.lock().submissions.clone()
    }
}

impl InferencePlatform for ScriptedPlatform {
    fn submit(&self, request: &TransformRequest) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        if let Some(error) = state.submit_errors.pop_front() {
            return Err(error);
        }
        if state.known.contains_key(&request.job_name) {
            return Err(RemoteError::DuplicateRequest(request.job_name.clone()));
        }
        state
            .known
            .insert(request.job_name.clone(), RemoteStatus::new(RemoteState::InProgress));
        state.submissions.push(request.clone());
        Ok(())
    }

    fn describe(&self, job_name: &str) -> Result<RemoteStatus, RemoteError> {
        let mut state = self.state.lock();
        let next = state.statuses.get_mut(job_name).and_then(|queue| queue.pop_front());
        match next {
            Some(Ok(status)) => {
                state.known.insert(job_name.to_string(), status.clone());
                Ok(status)
            }
            Some(Err(error)) => Err(error),
            None => state
                .known
                .get(job_name)
                .cloned()
                .ok_or_else(|| RemoteError::NotFound(job_name.to_string())),
        }
    }
}
