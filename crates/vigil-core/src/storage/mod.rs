pub mod local_backend;

use std::io::{Read, Write};
use std::sync::Arc;

use vigil_types::error::Result;

/// One entry returned by [`RemoteStorage::list_files`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteItem {
    /// Full `/`-separated remote path (e.g. "/state/7").
    pub path: String,
    pub size: u64,
}

/// Abstract object storage over a remote blob namespace.
/// Paths are `/`-separated strings rooted at `/` (e.g. "/state/7").
///
/// The port is idempotent-tolerant: deleting an absent object and
/// uploading over an existing path must both succeed, so a retried or
/// replayed action is always safe.
pub trait RemoteStorage: Send + Sync {
    /// Upload the stream's contents to `remote_path`, replacing any
    /// existing object.
    fn upload_file(&self, remote_path: &str, source: &mut dyn Read) -> Result<()>;

    /// Download `remote_path` into `sink`. An absent object is an error.
    fn download_file(&self, remote_path: &str, sink: &mut dyn Write) -> Result<()>;

    /// Delete `remote_path`. Deleting an absent object succeeds.
    fn delete_file(&self, remote_path: &str) -> Result<()>;

    /// List objects under `prefix`. With `recursive`, descend into nested
    /// prefixes; otherwise return only immediate children.
    fn list_files(&self, prefix: &str, recursive: bool) -> Result<Vec<RemoteItem>>;
}

impl RemoteStorage for Arc<dyn RemoteStorage> {
    fn upload_file(&self, remote_path: &str, source: &mut dyn Read) -> Result<()> {
        (**self).upload_file(remote_path, source)
    }
    fn download_file(&self, remote_path: &str, sink: &mut dyn Write) -> Result<()> {
        (**self).download_file(remote_path, sink)
    }
    fn delete_file(&self, remote_path: &str) -> Result<()> {
        (**self).delete_file(remote_path)
    }
    fn list_files(&self, prefix: &str, recursive: bool) -> Result<Vec<RemoteItem>> {
        (**self).list_files(prefix, recursive)
    }
}
