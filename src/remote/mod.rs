//! Remote inference platform: batch-transform submission and status calls.
pub mod http_platform;
pub mod scripted;

use crate::error::RemoteError;
use serde::{Deserialize, Serialize};

pub use http_platform::HttpInferencePlatform;
pub use scripted::ScriptedPlatform;

/// Body of the submit-job call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransformRequest {
    pub endpoint_name: String,
    pub job_name: String,
    pub input_location: String,
    pub output_location: String,
    pub instance_type: String,
    pub instance_count: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RemoteState {
    InProgress,
    Completed,
    Failed,
    Stopping,
    Stopped,
}

/// Structured failure codes reported by the platform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FailureCode {
    AlgorithmError,
    ResourceLimitExceeded,
    Timeout,
    ClientError,
    InternalServerError,
    #[serde(other)]
    Unknown,
}

/// Response of the status call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteStatus {
    pub state: RemoteState,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub failure_code: Option<FailureCode>,
    #[serde(default)]
    pub output_location: Option<String>,
}

impl RemoteStatus {
    pub fn new(state: RemoteState) -> Self {
        Self {
            state,
            failure_reason: None,
            failure_code: None,
            output_location: None,
        }
    }

    pub fn failed(code: FailureCode, reason: &str) -> Self {
        Self {
            state: RemoteState::Failed,
            failure_reason: Some(reason.to_string()),
            failure_code: Some(code),
            output_location: None,
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Managed batch-inference service. Calls block for at most the client's
/// configured timeout.
pub trait InferencePlatform: Send + Sync {
    fn submit(&self, request: &TransformRequest) -> Result<(), RemoteError>;

    fn describe(&self, job_name: &str) -> Result<RemoteStatus, RemoteError>;
}
