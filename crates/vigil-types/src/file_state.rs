use std::fmt;

use crate::error::{Result, VigilError};

/// Sentinel size marking a tombstone record.
pub const TOMBSTONE_SIZE: i64 = -1;
/// Sentinel checksum marking a tombstone record.
pub const TOMBSTONE_CHECKSUM: &str = "-";

/// One catalog record: a file held remotely, or a tombstone erasing one.
///
/// Serialized as a single text line `<size> <checksum> <path>`. The path
/// comes last so it may contain spaces; the checksum is an opaque digest
/// and must not contain whitespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState {
    pub path: String,
    /// Byte count for live entries; [`TOMBSTONE_SIZE`] for tombstones.
    pub size: i64,
    pub checksum: String,
}

impl FileState {
    /// A live entry for `path`.
    pub fn new(path: impl Into<String>, size: u64, checksum: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size: size as i64,
            checksum: checksum.into(),
        }
    }

    /// A tombstone erasing any prior entry for `path`.
    pub fn tombstone(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size: TOMBSTONE_SIZE,
            checksum: TOMBSTONE_CHECKSUM.to_string(),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.size == TOMBSTONE_SIZE
    }

    /// Parse one batch-file line. Inverse of [`FileState::to_line`].
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.splitn(3, ' ');
        let (size, checksum, path) = match (parts.next(), parts.next(), parts.next()) {
            (Some(size), Some(checksum), Some(path)) => (size, checksum, path),
            _ => {
                return Err(VigilError::InvalidFormat(format!(
                    "file state line has too few fields: '{line}'"
                )))
            }
        };

        let size: i64 = size.parse().map_err(|_| {
            VigilError::InvalidFormat(format!("invalid file size in line: '{line}'"))
        })?;
        if size < TOMBSTONE_SIZE {
            return Err(VigilError::InvalidFormat(format!(
                "negative file size in line: '{line}'"
            )));
        }
        if (size == TOMBSTONE_SIZE) != (checksum == TOMBSTONE_CHECKSUM) {
            return Err(VigilError::InvalidFormat(format!(
                "inconsistent tombstone sentinels in line: '{line}'"
            )));
        }
        if path.is_empty() {
            return Err(VigilError::InvalidFormat(format!(
                "empty path in line: '{line}'"
            )));
        }

        Ok(Self {
            path: path.to_string(),
            size,
            checksum: checksum.to_string(),
        })
    }

    /// Serialize to one batch-file line (without trailing newline).
    ///
    /// Fails if the record cannot round-trip: an empty or newline-bearing
    /// path, or a checksum containing whitespace.
    pub fn to_line(&self) -> Result<String> {
        if self.path.is_empty() || self.path.contains('\n') {
            return Err(VigilError::InvalidFormat(format!(
                "path cannot be serialized: '{}'",
                self.path.escape_default()
            )));
        }
        if self.checksum.is_empty() || self.checksum.contains(char::is_whitespace) {
            return Err(VigilError::InvalidFormat(format!(
                "checksum cannot be serialized: '{}'",
                self.checksum.escape_default()
            )));
        }
        Ok(format!("{} {} {}", self.size, self.checksum, self.path))
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_tombstone() {
            write!(f, "{} (deleted)", self.path)
        } else {
            write!(f, "{} ({} bytes, {})", self.path, self.size, self.checksum)
        }
    }
}
