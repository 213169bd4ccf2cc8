// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Local};
use tracing::{debug, warn};

use crate::error::IntakeError;
use crate::record::LogRecord;
use crate::rotation::{compressed_path, RotationPolicy};

/// strftime pattern for log file names, e.g. `2024-05-06_07-08-09`
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
const LOG_FILE_EXTENSION: &str = "log";

pub trait LogStore {
    /// Persists one record and returns the path of the file written.
    fn save(&self, record: &LogRecord) -> Result<PathBuf, IntakeError>;
}

/// Stores each record as its own file under `<root>/<device_id>/`.
///
/// Saves for the same device are serialized so that rotation never races a concurrent write into
/// the same folder. Different devices do not contend.
pub struct FsLogStore {
    root: PathBuf,
    rotation_policy: RotationPolicy,
    device_locks: DeviceLocks,
}

impl FsLogStore {
    /// Creates the store, making sure `root` exists.
    pub fn new(root: impl Into<PathBuf>, rotation_policy: RotationPolicy) -> Result<Self, IntakeError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            IntakeError::StorageUnavailable(format!(
                "failed to create log directory {}: {e}",
                root.display()
            ))
        })?;
        Ok(FsLogStore {
            root,
            rotation_policy,
            device_locks: DeviceLocks::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn device_folder(&self, device_id: &str) -> PathBuf {
        self.root.join(device_id)
    }

    /// Same as [`LogStore::save`] with an explicit clock.
    pub fn save_at(&self, record: &LogRecord, now: DateTime<Local>) -> Result<PathBuf, IntakeError> {
        let lock = self.device_locks.for_device(&record.device_id);
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.save_locked(record, now)
        };
        self.device_locks.release(&record.device_id, lock);
        result
    }

    fn save_locked(&self, record: &LogRecord, now: DateTime<Local>) -> Result<PathBuf, IntakeError> {
        let folder = self.device_folder(&record.device_id);
        fs::create_dir_all(&folder).map_err(|e| {
            IntakeError::StorageUnavailable(format!(
                "failed to create folder {}: {e}",
                folder.display()
            ))
        })?;

        match self.rotation_policy.rotate(&folder) {
            Ok(summary) if !summary.compressed.is_empty() => debug!(
                "Rotated {} log file(s) for device {}",
                summary.compressed.len(),
                record.device_id
            ),
            Ok(_) => {}
            Err(e) => warn!("Failed to rotate logs for device {}: {e}", record.device_id),
        }

        let timestamp = now.format(TIMESTAMP_FORMAT).to_string();
        let (path, file) = create_unique_log_file(&folder, &timestamp)?;
        write_log_file(&path, file, record.render(&timestamp).as_bytes())?;

        debug!("Saved log for device {} to {}", record.device_id, path.display());
        Ok(path)
    }
}

impl LogStore for FsLogStore {
    fn save(&self, record: &LogRecord) -> Result<PathBuf, IntakeError> {
        self.save_at(record, Local::now())
    }
}

/// Creates `<timestamp>.log`, falling back to `<timestamp>_1.log`, `<timestamp>_2.log`, ... when
/// records for the same device arrive within the same second. Names whose `.gz` archive already
/// exists are skipped too.
fn create_unique_log_file(folder: &Path, timestamp: &str) -> Result<(PathBuf, File), IntakeError> {
    let mut suffix: u32 = 0;
    loop {
        let file_name = if suffix == 0 {
            format!("{timestamp}.{LOG_FILE_EXTENSION}")
        } else {
            format!("{timestamp}_{suffix}.{LOG_FILE_EXTENSION}")
        };
        let path = folder.join(file_name);
        if compressed_path(&path).exists() {
            suffix += 1;
            continue;
        }

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && suffix < u32::MAX => {
                suffix += 1;
            }
            Err(e) => {
                return Err(IntakeError::StorageUnavailable(format!(
                    "failed to create log file {}: {e}",
                    path.display()
                )))
            }
        }
    }
}

/// Writes and syncs `contents`, removing the file again if either step fails so no truncated
/// record is left behind.
fn write_log_file(path: &Path, mut file: File, contents: &[u8]) -> Result<(), IntakeError> {
    let result = file.write_all(contents).and_then(|()| file.sync_all());
    drop(file);
    result.map_err(|e| {
        if let Err(remove_err) = fs::remove_file(path) {
            warn!("Failed to remove partial log file {}: {remove_err}", path.display());
        }
        IntakeError::StorageUnavailable(format!("failed to write log file {}: {e}", path.display()))
    })
}

#[derive(Default)]
struct DeviceLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DeviceLocks {
    fn for_device(&self, device_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(device_id.to_string()).or_default())
    }

    /// Hands back a lock taken with [`DeviceLocks::for_device`] and forgets the device once no
    /// other save holds it, so the map only tracks devices with saves in flight.
    fn release(&self, device_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // clones are only handed out under the map lock
        drop(lock);
        if locks
            .get(device_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(device_id);
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap().len()
    }
}
