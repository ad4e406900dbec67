// Directory-backed message queue
// One JSON file per message; files are taken in name order.

use super::{Delivery, IntakeQueue};
use crate::error::QueueError;
use crate::file_manager::{read_json_file, write_json_file};
use chrono::Utc;
use log::{debug, warn};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const DEFAULT_VISIBILITY_SECS: u64 = 30;
const EMPTY_POLL_MS: u64 = 100;
const REJECTED_DIR: &str = "rejected";

pub struct SpoolQueue<T> {
    dir: PathBuf,
    visibility: Duration,
    hidden: Mutex<HashMap<String, Instant>>,
    _message: PhantomData<fn() -> T>,
}

impl<T> SpoolQueue<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn open(dir: &Path) -> Result<Self, QueueError> {
        fs::create_dir_all(dir)
            .map_err(|e| QueueError::Unreachable(format!("{:?}: {}", dir, e)))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            visibility: Duration::from_secs(DEFAULT_VISIBILITY_SECS),
            hidden: Mutex::new(HashMap::new()),
            _message: PhantomData,
        })
    }

    /// How long a received, undeleted message stays invisible.
    pub fn with_visibility(mut self, visibility: Duration) -> Self {
        self.visibility = visibility;
        self
    }

    /// Publish a message. Returns its receipt.
    pub fn enqueue(&self, message: &T) -> Result<String, String> {
        let receipt = format!(
            "{}-{}.json",
            Utc::now().format("%Y%m%dT%H%M%S%.6f"),
            uuid::Uuid::new_v4().simple()
        );
        write_json_file(&self.dir.join(&receipt), message)?;
        Ok(receipt)
    }

    /// Messages currently stored, visible or not.
    pub fn len(&self) -> Result<usize, QueueError> {
        Ok(self.message_files()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len()? == 0)
    }

    fn message_files(&self) -> Result<Vec<String>, QueueError> {
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| QueueError::Unreachable(format!("{:?}: {}", self.dir, e)))?;
        let mut names: Vec<String> = entries
            .flatten()
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| name.ends_with(".json"))
            .collect();
        names.sort();
        Ok(names)
    }

    fn take_visible(&self, max: usize) -> Result<Vec<Delivery<T>>, QueueError> {
        let now = Instant::now();
        let mut hidden = self.hidden.lock();
        hidden.retain(|_, until| *until > now);

        let mut delivered = Vec::new();
        for name in self.message_files()? {
            if delivered.len() >= max {
                break;
            }
            if hidden.contains_key(&name) {
                continue;
            }
            let path = self.dir.join(&name);
            match read_json_file::<T>(&path) {
                Ok(body) => {
                    hidden.insert(name.clone(), now + self.visibility);
                    delivered.push(Delivery { receipt: name, body });
                }
                Err(e) => {
                    warn!("Moving unreadable message {} aside: {}", name, e);
                    self.reject(&path, &name);
                }
            }
        }
        Ok(delivered)
    }

    fn reject(&self, path: &Path, name: &str) {
        let rejected = self.dir.join(REJECTED_DIR);
        let moved = fs::create_dir_all(&rejected).and_then(|_| fs::rename(path, rejected.join(name)));
        if let Err(e) = moved {
            warn!("Could not move {:?} to {:?}: {}", path, rejected, e);
        }
    }
}

impl<T> IntakeQueue<T> for SpoolQueue<T>
where
    T: Serialize + DeserializeOwned,
{
    fn receive(&self, max: usize, wait: Duration) -> Result<Vec<Delivery<T>>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            let delivered = self.take_visible(max)?;
            if !delivered.is_empty() {
                debug!("Received {} messages from {:?}", delivered.len(), self.dir);
                return Ok(delivered);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(delivered);
            }
            std::thread::sleep(remaining.min(Duration::from_millis(EMPTY_POLL_MS)));
        }
    }

    fn delete(&self, receipt: &str) -> Result<(), QueueError> {
        let path = self.dir.join(receipt);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| QueueError::Delete {
                receipt: receipt.to_string(),
                reason: e.to_string(),
            })?;
        }
        self.hidden.lock().remove(receipt);
        Ok(())
    }
}
