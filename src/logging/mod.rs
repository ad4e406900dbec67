//! Logging setup for evalserver
//! Installs the subscriber and handles log file cleanup for 7-day retention

use crate::utils::get_logs_dir;
use log::info;
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};
use time::format_description::well_known::Rfc3339;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

const LOG_RETENTION_DAYS: u64 = 7;
const LOG_FILE_PREFIX: &str = "evalserver.log";

/// Install the file + stderr subscriber. `log` records are bridged in by
/// tracing-log. Keep the returned guard alive until shutdown so buffered
/// lines are flushed.
pub fn init_logging() -> Result<WorkerGuard, String> {
    init_logging_in(&get_logs_dir())
}

/// Same as `init_logging`, writing under `logs_dir`. Creates the directory,
/// so it can run before anything else touches the data root.
pub fn init_logging_in(logs_dir: &Path) -> Result<WorkerGuard, String> {
    fs::create_dir_all(logs_dir)
        .map_err(|e| format!("Failed to create logs directory {:?}: {}", logs_dir, e))?;

    let appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let file_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let file_layer = tracing_subscriber::fmt::layer()
        .with_timer(UtcTime::new(Rfc3339))
        .with_writer(writer)
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_filter(file_filter);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .with_filter(EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| format!("Failed to install log subscriber: {}", e))?;

    Ok(guard)
}

pub fn cleanup_old_logs() {
    let logs_dir = get_logs_dir();
    if !logs_dir.exists() {
        return;
    }

    let retention = Duration::from_secs(LOG_RETENTION_DAYS * 24 * 60 * 60);
    let now = SystemTime::now();

    if let Ok(entries) = fs::read_dir(&logs_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            let is_log = path
                .file_name()
                .and_then(|name| name.to_str())
                .map_or(false, |name| name.starts_with(LOG_FILE_PREFIX));
            if !is_log {
                continue;
            }
            let age = fs::metadata(&path)
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok());
            if let Some(age) = age {
                if age > retention && fs::remove_file(&path).is_ok() {
                    info!("Cleaned up old log: {:?}", path.file_name());
                }
            }
        }
    }
}
