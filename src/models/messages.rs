// Queue message models
use serde::{Deserialize, Serialize};

/// Evaluation request published by the web backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntakeMessage {
    pub model_id: u64,
    #[serde(default)]
    pub target_server_id: Option<String>,
}

impl IntakeMessage {
    pub fn is_addressed_to(&self, server_id: &str) -> bool {
        self.target_server_id
            .as_deref()
            .map_or(true, |target| target == server_id)
    }
}

/// Operator instructions delivered to a running server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Release { job_id: String },
}

/// Deployment record exported by the web backend's model table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelRecord {
    pub id: u64,
    pub endpoint_name: String,
    pub task: String,
    #[serde(default)]
    pub instance_type: Option<String>,
    #[serde(default)]
    pub instance_count: Option<u32>,
}
