use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

static APP_DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Root of all server state. `EVALSERVER_HOME` wins over the platform data dir.
pub fn get_app_data_dir() -> PathBuf {
    APP_DATA_DIR
        .get_or_init(|| {
            if let Some(home) = std::env::var_os("EVALSERVER_HOME") {
                return PathBuf::from(home);
            }
            let base_dir = dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."));
            base_dir.join("Evalserver")
        })
        .clone()
}

pub fn get_data_dir() -> PathBuf {
    get_app_data_dir().join("data")
}

pub fn get_queue_dir() -> PathBuf {
    get_app_data_dir().join("queue")
}

pub fn get_intake_queue_dir() -> PathBuf {
    get_queue_dir().join("intake")
}

pub fn get_control_queue_dir() -> PathBuf {
    get_queue_dir().join("control")
}

pub fn get_logs_dir() -> PathBuf {
    get_app_data_dir().join("logs")
}

pub fn get_settings_json_path() -> PathBuf {
    get_data_dir().join("settings.json")
}

pub fn get_snapshot_json_path() -> PathBuf {
    get_data_dir().join("scheduler_snapshot.json")
}

pub fn get_datasets_json_path() -> PathBuf {
    get_data_dir().join("datasets.json")
}

pub fn get_models_json_path() -> PathBuf {
    get_data_dir().join("models.json")
}

pub fn get_scores_json_path() -> PathBuf {
    get_data_dir().join("scores.json")
}

pub fn initialize_data_directories() -> Result<(), String> {
    let directories = [
        get_data_dir(),
        get_intake_queue_dir(),
        get_control_queue_dir(),
        get_logs_dir(),
    ];

    for dir in &directories {
        if !dir.exists() {
            fs::create_dir_all(dir).map_err(|e| {
                format!("Failed to create directory {:?}: {}", dir, e)
            })?;
        }
    }

    Ok(())
}
