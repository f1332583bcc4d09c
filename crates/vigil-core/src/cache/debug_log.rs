use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use tracing::warn;

use vigil_types::error::Result;

/// Append-only diagnostic log, enabled by the `debug_log_path` option.
pub struct DebugLog {
    file: Mutex<File>,
}

impl DebugLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Write one timestamped line. Diagnostics are best-effort: a failed
    /// write is reported via tracing and otherwise dropped.
    pub fn write_line(&self, line: &str) {
        let stamped = format!("[{}] {line}\n", Utc::now().to_rfc3339());
        let mut file = self.file.lock().unwrap();
        if let Err(e) = file.write_all(stamped.as_bytes()) {
            warn!("failed to write debug log line: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_appended_with_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("debug.log");

        let log = DebugLog::open(&path).unwrap();
        log.write_line("first");
        log.write_line("second");
        drop(log);

        // Reopening appends rather than truncating.
        let log = DebugLog::open(&path).unwrap();
        log.write_line("third");
        drop(log);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("first"));
        assert!(lines[2].ends_with("third"));
    }
}
