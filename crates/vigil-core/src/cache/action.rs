use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The remote mutation an action performs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    /// Upload a staged local file to the remote path.
    UploadFile {
        remote_path: String,
        source_path: PathBuf,
    },
    /// Delete the remote path.
    DeleteFile { remote_path: String },
}

impl ActionKind {
    pub fn remote_path(&self) -> &str {
        match self {
            ActionKind::UploadFile { remote_path, .. } => remote_path,
            ActionKind::DeleteFile { remote_path } => remote_path,
        }
    }
}

/// One durable pending remote mutation.
///
/// The action key doubles as the on-disk filename in the queue directory;
/// ascending keys define replay order across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheAction {
    /// Monotonic key, assigned when the action is logged.
    pub key: i64,
    pub kind: ActionKind,
    /// Set once the remote call has succeeded.
    pub complete: bool,
    /// Absolute path of the persisted record, while one exists.
    #[serde(skip)]
    pub file_path: Option<PathBuf>,
}

impl CacheAction {
    pub fn upload(remote_path: impl Into<String>, source_path: impl Into<PathBuf>) -> Self {
        Self {
            key: 0,
            kind: ActionKind::UploadFile {
                remote_path: remote_path.into(),
                source_path: source_path.into(),
            },
            complete: false,
            file_path: None,
        }
    }

    pub fn delete(remote_path: impl Into<String>) -> Self {
        Self {
            key: 0,
            kind: ActionKind::DeleteFile {
                remote_path: remote_path.into(),
            },
            complete: false,
            file_path: None,
        }
    }
}
