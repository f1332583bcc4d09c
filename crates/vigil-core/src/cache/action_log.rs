use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::warn;

use vigil_types::error::{Result, VigilError};

use super::action::CacheAction;

/// Attempts to allocate a never-before-used staging file name.
const TEMP_FILE_ATTEMPTS: u32 = 1000;

/// Durable on-disk queue of pending remote mutations.
///
/// Each action is one JSON file in the queue directory, named by its
/// decimal action key (a wall-clock microsecond timestamp, bumped past
/// collisions). Staged upload payloads live alongside under non-numeric
/// names, so they never collide with the key namespace.
pub struct CacheActionLog {
    root: PathBuf,
}

impl CacheActionLog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// All persisted action keys, in no particular order. Callers sort
    /// ascending before replay.
    pub fn enumerate_action_keys(&self) -> Result<Vec<i64>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(key) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<i64>().ok())
            {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    /// Persist `action`, allocating its key and stamping the on-disk path
    /// onto it. The record is synced before this returns: after a crash it
    /// is either fully present or absent.
    pub fn log_action(&self, action: &mut CacheAction) -> Result<()> {
        let mut key = Utc::now().timestamp_micros();
        loop {
            let path = self.root.join(key.to_string());
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    action.key = key;
                    file.write_all(&serde_json::to_vec(&*action)?)?;
                    file.sync_all()?;
                    action.file_path = Some(path);
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => key += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Read a persisted action back into memory. The filename is
    /// authoritative for the key.
    pub fn rehydrate_action(&self, key: i64) -> Result<CacheAction> {
        let path = self.root.join(key.to_string());
        let data = fs::read(&path)?;
        let mut action: CacheAction = serde_json::from_slice(&data).map_err(|e| {
            VigilError::CorruptAction(format!("{}: {e}", path.display()))
        })?;
        action.key = key;
        action.file_path = Some(path);
        Ok(action)
    }

    /// Best-effort delete of the action's backing file; clears the path
    /// pointer either way. Idempotent against a missing file.
    pub fn release_action(&self, action: &mut CacheAction) {
        let Some(path) = action.file_path.take() else {
            return;
        };
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                // The action has already been applied remotely; a surviving
                // record is replayed harmlessly on the next start.
                warn!(path = %path.display(), "failed to delete action file: {e}");
            }
        }
    }

    /// Allocate a never-before-used path for staging an upload payload.
    pub fn create_temporary_data_file(&self) -> Result<PathBuf> {
        for _ in 0..TEMP_FILE_ATTEMPTS {
            let path = self
                .root
                .join(format!("stage-{:016x}", rand::random::<u64>()));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(path),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(VigilError::Other(format!(
            "could not allocate a temporary action data file after {TEMP_FILE_ATTEMPTS} attempts"
        )))
    }
}
