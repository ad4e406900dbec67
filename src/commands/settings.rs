// Server settings stored in settings.json
use crate::file_manager::{initialize_json_file, read_json_file};
use crate::models::Settings;
use crate::utils::get_settings_json_path;
use log::debug;
use std::path::Path;

/// Read settings, writing the defaults first if no file exists yet.
pub fn get_settings() -> Result<Settings, String> {
    load_settings(&get_settings_json_path())
}

pub fn load_settings(path: &Path) -> Result<Settings, String> {
    initialize_json_file(path, &Settings::default())?;
    let settings: Settings = read_json_file(path)?;
    if settings.server_id.trim().is_empty() {
        return Err(format!("{:?}: server_id must not be empty", path));
    }
    debug!("Loaded settings for server {}", settings.server_id);
    Ok(settings)
}
