// Atomic JSON file operations

use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Mutex;

lazy_static::lazy_static! {
    static ref FILE_LOCK: Mutex<()> = Mutex::new(());
}

pub fn read_bytes(path: &Path) -> Result<Vec<u8>, String> {
    let _lock = FILE_LOCK.lock().map_err(|e| format!("Lock error: {}", e))?;

    if !path.exists() {
        return Err(format!("File not found: {:?}", path));
    }

    let mut file = File::open(path).map_err(|e| format!("Failed to open {:?}: {}", path, e))?;

    let mut contents = Vec::new();
    file.read_to_end(&mut contents)
        .map_err(|e| format!("Failed to read {:?}: {}", path, e))?;

    Ok(contents)
}

pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T, String> {
    let contents = read_bytes(path)?;

    serde_json::from_slice(&contents)
        .map_err(|e| format!("Failed to parse JSON from {:?}: {}", path, e))
}

/// Writes bytes atomically using write-to-temp-then-rename
pub fn write_bytes(path: &Path, bytes: &[u8]) -> Result<(), String> {
    let _lock = FILE_LOCK.lock().map_err(|e| format!("Lock error: {}", e))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create directory {:?}: {}", parent, e))?;
    }

    let temp_path = path.with_extension("tmp");

    let mut temp_file = File::create(&temp_path)
        .map_err(|e| format!("Failed to create temp file {:?}: {}", temp_path, e))?;

    temp_file
        .write_all(bytes)
        .map_err(|e| format!("Failed to write to temp file: {}", e))?;

    temp_file
        .sync_all()
        .map_err(|e| format!("Failed to sync temp file: {}", e))?;

    fs::rename(&temp_path, path)
        .map_err(|e| format!("Failed to rename temp file to {:?}: {}", path, e))?;

    Ok(())
}

pub fn write_json_file<T: Serialize>(path: &Path, data: &T) -> Result<(), String> {
    let json_string = serde_json::to_string_pretty(data)
        .map_err(|e| format!("Failed to serialize data: {}", e))?;

    write_bytes(path, json_string.as_bytes())
}

pub fn initialize_json_file<T: Serialize>(path: &Path, default: &T) -> Result<(), String> {
    if !path.exists() {
        log::info!("Initializing JSON file: {:?}", path);
        write_json_file(path, default)?;
    }
    Ok(())
}

pub fn read_json_file_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T, String> {
    if path.exists() {
        read_json_file(path)
    } else {
        Ok(T::default())
    }
}

pub fn update_json_file<T, F>(path: &Path, update_fn: F) -> Result<T, String>
where
    T: DeserializeOwned + Serialize + Clone + Default,
    F: FnOnce(&mut T),
{
    let mut data: T = read_json_file_or_default(path)?;
    update_fn(&mut data);
    write_json_file(path, &data)?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.json");

        write_json_file(&path, &vec![1, 2, 3]).unwrap();
        let back: Vec<i32> = read_json_file(&path).unwrap();

        assert_eq!(back, vec![1, 2, 3]);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_update_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.json");

        update_json_file(&path, |items: &mut Vec<String>| items.push("a".to_string())).unwrap();
        let items = update_json_file(&path, |items: &mut Vec<String>| items.push("b".to_string())).unwrap();

        assert_eq!(items, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result: Result<Vec<i32>, String> = read_json_file(&dir.path().join("absent.json"));
        assert!(result.unwrap_err().contains("File not found"));
    }
}
