// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, warn};

use crate::error::IntakeError;

pub const COMPRESSED_SUFFIX: &str = ".gz";

/// Thresholds past which a device log file is compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    /// files strictly larger than this many bytes are rotated
    pub max_log_size: u64,
    /// files last modified longer ago than this are rotated
    pub max_log_age: Duration,
}

/// Outcome of one rotation pass over a device folder.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RotationSummary {
    pub compressed: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

impl RotationPolicy {
    pub fn new(max_log_size: u64, max_log_age: Duration) -> Self {
        RotationPolicy {
            max_log_size,
            max_log_age,
        }
    }

    /// Compresses every plain file in `folder` that exceeds the size or age threshold and removes
    /// the original once its `.gz` copy is complete.
    ///
    /// Directories and files already ending in `.gz` are skipped, so running this twice without
    /// new writes leaves the folder unchanged. A file that fails to compress is kept as-is and
    /// retried on the next pass; such failures are logged and listed in the summary but do not
    /// fail the pass. An original left next to a complete archive of itself is only removed.
    pub fn rotate(&self, folder: &Path) -> Result<RotationSummary, IntakeError> {
        let entries = fs::read_dir(folder).map_err(|e| {
            IntakeError::StorageUnavailable(format!("failed to list {}: {e}", folder.display()))
        })?;

        let now = SystemTime::now();
        let mut summary = RotationSummary::default();

        for entry in entries.flatten() {
            let path = entry.path();
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    debug!("Skipping {} during rotation: {e}", path.display());
                    continue;
                }
            };
            if !metadata.is_file() || is_compressed(&path) {
                continue;
            }

            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if metadata.len() <= self.max_log_size && age <= self.max_log_age {
                continue;
            }

            let archive = compressed_path(&path);
            if archive.is_file() && archive_holds(&archive, &path) {
                // an earlier pass compressed this file but could not remove it
                match fs::remove_file(&path) {
                    Ok(()) => {
                        debug!(
                            "Removed {} already archived as {}",
                            path.display(),
                            archive.display()
                        );
                        summary.compressed.push(archive);
                    }
                    Err(e) => {
                        warn!("Failed to remove already archived {}: {e}", path.display());
                        summary.failed.push(path);
                    }
                }
                continue;
            }

            match compress_file(&path) {
                Ok(compressed_path) => {
                    if let Err(e) = fs::remove_file(&path) {
                        warn!(
                            "Compressed {} but failed to remove the original: {e}",
                            path.display()
                        );
                    }
                    debug!("Rotated {} to {}", path.display(), compressed_path.display());
                    summary.compressed.push(compressed_path);
                }
                Err(e) => {
                    warn!("{e}");
                    summary.failed.push(path);
                }
            }
        }

        Ok(summary)
    }
}

pub fn is_compressed(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(COMPRESSED_SUFFIX))
}

/// `<path>.gz`
pub(crate) fn compressed_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(COMPRESSED_SUFFIX);
    PathBuf::from(name)
}

/// Whether `archive` decompresses to exactly the bytes of `original`. Unreadable or corrupt
/// archives never match.
fn archive_holds(archive: &Path, original: &Path) -> bool {
    let compare = || -> io::Result<bool> {
        let mut expected = BufReader::new(File::open(original)?);
        let mut actual = GzDecoder::new(BufReader::new(File::open(archive)?));
        let mut expected_buf = [0u8; 8192];
        let mut actual_buf = [0u8; 8192];
        loop {
            let n = read_up_to(&mut expected, &mut expected_buf)?;
            let m = read_up_to(&mut actual, &mut actual_buf)?;
            if expected_buf[..n] != actual_buf[..m] {
                return Ok(false);
            }
            if n == 0 {
                return Ok(true);
            }
        }
    };
    compare().unwrap_or(false)
}

/// Fills `buf` unless the reader runs dry first.
fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Streams `path` through gzip into `<path>.gz`, which must not exist yet. A partially written
/// output is removed on failure.
fn compress_file(path: &Path) -> Result<PathBuf, IntakeError> {
    let compressed_path = compressed_path(path);

    let mut created = false;
    let result = (|| -> io::Result<()> {
        let mut input = BufReader::new(File::open(path)?);
        // never clobber an existing archive
        let output = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&compressed_path)?;
        created = true;
        let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::default());
        io::copy(&mut input, &mut encoder)?;
        let mut writer = encoder.finish()?;
        writer.flush()?;
        writer.get_ref().sync_all()
    })();

    match result {
        Ok(()) => Ok(compressed_path),
        Err(e) => {
            if created {
                let _ = fs::remove_file(&compressed_path);
            }
            Err(IntakeError::CompressionFailure {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tracing_test::traced_test;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn file_names(folder: &Path) -> BTreeSet<String> {
        fs::read_dir(folder)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    fn write_file(folder: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = folder.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn age_file(path: &Path, age: Duration) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[test]
    fn test_small_recent_files_are_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "2024-01-01_00-00-00.log", b"short");

        let summary = RotationPolicy::new(1024, DAY).rotate(dir.path()).unwrap();

        assert_eq!(summary, RotationSummary::default());
        assert_eq!(
            file_names(dir.path()),
            BTreeSet::from(["2024-01-01_00-00-00.log".to_string()])
        );
    }

    #[test]
    fn test_oversized_file_is_compressed_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let contents = b"IMEL: 1\nTime: t\nError: a long enough error line\n";
        write_file(dir.path(), "big.log", contents);

        let summary = RotationPolicy::new(10, DAY).rotate(dir.path()).unwrap();

        assert_eq!(summary.compressed, vec![dir.path().join("big.log.gz")]);
        assert_eq!(file_names(dir.path()), BTreeSet::from(["big.log.gz".to_string()]));

        let mut decoded = Vec::new();
        GzDecoder::new(File::open(dir.path().join("big.log.gz")).unwrap())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, contents);
    }

    #[test]
    fn test_file_exactly_at_size_limit_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "exact.log", &[b'x'; 10]);

        let summary = RotationPolicy::new(10, DAY).rotate(dir.path()).unwrap();

        assert!(summary.compressed.is_empty());
        assert!(dir.path().join("exact.log").exists());
    }

    #[test]
    fn test_aged_file_is_compressed() {
        let dir = tempfile::tempdir().unwrap();
        let old = write_file(dir.path(), "old.log", b"old");
        write_file(dir.path(), "new.log", b"new");
        age_file(&old, 8 * DAY);

        let summary = RotationPolicy::new(1024, 7 * DAY).rotate(dir.path()).unwrap();

        assert_eq!(summary.compressed, vec![dir.path().join("old.log.gz")]);
        assert_eq!(
            file_names(dir.path()),
            BTreeSet::from(["new.log".to_string(), "old.log.gz".to_string()])
        );
    }

    #[test]
    fn test_rotation_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.log", &[b'a'; 64]);
        write_file(dir.path(), "b.log", b"b");
        let policy = RotationPolicy::new(16, DAY);

        policy.rotate(dir.path()).unwrap();
        let after_first = file_names(dir.path());
        let second = policy.rotate(dir.path()).unwrap();

        assert!(second.compressed.is_empty());
        assert_eq!(file_names(dir.path()), after_first);
        assert_eq!(
            after_first,
            BTreeSet::from(["a.log.gz".to_string(), "b.log".to_string()])
        );
    }

    #[test]
    fn test_compressed_files_are_never_recompressed() {
        let dir = tempfile::tempdir().unwrap();
        let gz = write_file(dir.path(), "old.log.gz", &[0u8; 128]);
        age_file(&gz, 30 * DAY);

        let summary = RotationPolicy::new(1, DAY).rotate(dir.path()).unwrap();

        assert!(summary.compressed.is_empty());
        assert_eq!(file_names(dir.path()), BTreeSet::from(["old.log.gz".to_string()]));
    }

    #[test]
    fn test_directories_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        fs::create_dir(&nested).unwrap();
        age_file(&write_file(&nested, "inner.log", b"x"), 30 * DAY);

        let summary = RotationPolicy::new(0, Duration::ZERO).rotate(dir.path()).unwrap();

        assert!(summary.compressed.is_empty());
        assert!(nested.join("inner.log").exists());
    }

    #[test]
    #[traced_test]
    fn test_compression_failure_keeps_original() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "stuck.log", &[b's'; 64]);
        // a directory squatting on the output name makes the compressed file impossible to create
        fs::create_dir(dir.path().join("stuck.log.gz")).unwrap();

        let summary = RotationPolicy::new(16, DAY).rotate(dir.path()).unwrap();

        assert!(summary.compressed.is_empty());
        assert_eq!(summary.failed, vec![dir.path().join("stuck.log")]);
        assert_eq!(fs::read(dir.path().join("stuck.log")).unwrap(), vec![b's'; 64]);
        assert!(dir.path().join("stuck.log.gz").is_dir());
        assert!(logs_contain("Failed to compress"));
    }

    #[test]
    fn test_unrelated_archive_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "dup.log", &[b'n'; 64]);
        write_file(dir.path(), "dup.log.gz", b"earlier archive");

        let summary = RotationPolicy::new(16, DAY).rotate(dir.path()).unwrap();

        assert_eq!(summary.failed, vec![dir.path().join("dup.log")]);
        assert_eq!(fs::read(dir.path().join("dup.log.gz")).unwrap(), b"earlier archive");
        assert!(dir.path().join("dup.log").exists());
    }

    #[test]
    #[traced_test]
    fn test_leftover_original_of_finished_archive_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let contents = [b'r'; 64];
        let original = write_file(dir.path(), "left.log", &contents);
        let archive = compress_file(&original).unwrap();
        let archived_bytes = fs::read(&archive).unwrap();
        let policy = RotationPolicy::new(16, DAY);

        let summary = policy.rotate(dir.path()).unwrap();

        assert_eq!(summary.compressed, vec![archive.clone()]);
        assert!(summary.failed.is_empty());
        assert_eq!(file_names(dir.path()), BTreeSet::from(["left.log.gz".to_string()]));
        assert_eq!(fs::read(&archive).unwrap(), archived_bytes);
        assert!(!logs_contain("Failed to compress"));

        assert_eq!(policy.rotate(dir.path()).unwrap(), RotationSummary::default());
    }

    #[test]
    fn test_missing_folder_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = RotationPolicy::new(16, DAY).rotate(&dir.path().join("missing"));
        assert!(matches!(result, Err(IntakeError::StorageUnavailable(_))));
    }

    #[test]
    fn test_is_compressed() {
        assert!(is_compressed(Path::new("logs/dev/2024-01-01_00-00-00.log.gz")));
        assert!(!is_compressed(Path::new("logs/dev/2024-01-01_00-00-00.log")));
    }
}
