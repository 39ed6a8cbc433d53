//! JSON checkpoint file
//!
//! Saves go to a temporary sibling file that is synced and then renamed over
//! the real checkpoint, so readers only ever see a complete file.

use crate::storage::traits::{CheckpointRecord, CheckpointStore, StorageError, StorageResult};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct JsonCheckpointStore {
    path: PathBuf,
}

impl JsonCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> StorageResult<PathBuf> {
        let name = self
            .path
            .file_name()
            .ok_or_else(|| StorageError::InvalidPath(self.path.display().to_string()))?;
        let mut temp = name.to_os_string();
        temp.push(".tmp");
        Ok(self.path.with_file_name(temp))
    }
}

impl CheckpointStore for JsonCheckpointStore {
    fn load(&self) -> Option<CheckpointRecord> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("Cannot read checkpoint {}: {}", self.path.display(), e);
                return None;
            }
        };

        match serde_json::from_str(&contents) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(
                    "Ignoring corrupt checkpoint {}: {}",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }

    fn save(&self, record: &CheckpointRecord) -> StorageResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let temp = self.temp_path()?;
        let json = serde_json::to_string_pretty(record)?;
        {
            let mut file = File::create(&temp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;

        // Make the rename itself durable
        #[cfg(unix)]
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        tracing::debug!(position = %record.position, "Checkpoint saved");
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
