// HTTP client for the remote inference platform

use super::{InferencePlatform, RemoteStatus, TransformRequest};
use crate::error::RemoteError;
use crate::models::PlatformSettings;
use log::debug;
use std::time::Duration;

pub struct HttpInferencePlatform {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpInferencePlatform {
    pub fn new(settings: &PlatformSettings) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build();
        Self {
            agent,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        }
    }

    fn jobs_url(&self) -> String {
        format!("{}/transform-jobs", self.base_url)
    }
}

/// Map an HTTP failure onto the remote error taxonomy.
fn classify_error(error: ureq::Error, job_name: &str) -> RemoteError {
    match error {
        ureq::Error::Status(409, _) => RemoteError::DuplicateRequest(job_name.to_string()),
        ureq::Error::Status(404, _) => RemoteError::NotFound(job_name.to_string()),
        ureq::Error::Status(code, response) if code == 429 || code >= 500 => {
            let body = response.into_string().unwrap_or_default();
            RemoteError::Transient(format!("HTTP {}: {}", code, body))
        }
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            RemoteError::Rejected(format!("HTTP {}: {}", code, body))
        }
        ureq::Error::Transport(transport) => RemoteError::Transient(transport.to_string()),
    }
}

impl InferencePlatform for HttpInferencePlatform {
    fn submit(&self, request: &TransformRequest) -> Result<(), RemoteError> {
        debug!("Submitting transform job {} to {}", request.job_name, request.endpoint_name);
        self.agent
            .post(&self.jobs_url())
            .send_json(request)
            .map_err(|e| classify_error(e, &request.job_name))?;
        Ok(())
    }

    fn describe(&self, job_name: &str) -> Result<RemoteStatus, RemoteError> {
        let url = format!("{}/{}", self.jobs_url(), job_name);
        let response = self
            .agent
            .get(&url)
            .call()
            .map_err(|e| classify_error(e, job_name))?;
        response
            .into_json::<RemoteStatus>()
            .map_err(|e| RemoteError::Transient(format!("Unreadable status for {}: {}", job_name, e)))
    }
}
