// Server settings data models
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Consecutive remote failures tolerated before a job is failed with
    /// `scheduler_unreachable`.
    pub max_attempts: u32,
    /// Fraction of the delay added as random jitter (0.0 disables it).
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 2_000,
            max_delay_ms: 300_000,
            max_attempts: 3,
            jitter: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformSettings {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub instance_type: String,
    pub instance_count: u32,
    /// Prefix under which each job's raw predictions are written.
    pub output_root: String,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            base_url: String::from("http://localhost:8080"),
            request_timeout_secs: 30,
            instance_type: String::from("ml.m5.xlarge"),
            instance_count: 1,
            output_root: String::from("file:///var/lib/evalserver/predictions"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Identity matched against `target_server_id` on intake messages.
    pub server_id: String,
    pub tick_interval_ms: u64,
    pub status_poll_interval_secs: u64,
    pub snapshot_interval_secs: u64,
    pub intake_batch_size: usize,
    pub intake_wait_ms: u64,
    pub max_in_flight_submissions: usize,
    /// 0 sizes the pool by the available cores.
    pub metric_workers: usize,
    pub expiry_window_secs: u64,
    pub resolved_retention_secs: u64,
    pub retry: RetrySettings,
    pub platform: PlatformSettings,
    pub score_sink_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_id: String::from("default"),
            tick_interval_ms: 1_000,
            status_poll_interval_secs: 60,
            snapshot_interval_secs: 30,
            intake_batch_size: 10,
            intake_wait_ms: 1_000,
            max_in_flight_submissions: 8,
            metric_workers: 0,
            expiry_window_secs: 6 * 60 * 60,
            resolved_retention_secs: 7 * 24 * 60 * 60,
            retry: RetrySettings::default(),
            platform: PlatformSettings::default(),
            score_sink_url: None,
        }
    }
}

impl Settings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn intake_wait(&self) -> Duration {
        Duration::from_millis(self.intake_wait_ms)
    }

    pub fn worker_count(&self) -> usize {
        if self.metric_workers > 0 {
            return self.metric_workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}
