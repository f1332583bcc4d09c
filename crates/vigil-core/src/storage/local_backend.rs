use std::fs;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use vigil_types::error::{Result, VigilError};

use crate::storage::{RemoteItem, RemoteStorage};

/// Remote storage backed by a local directory, using `std::fs` directly.
/// Useful for tests and for backup targets on mounted filesystems.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a backend rooted at the given directory path.
    pub fn new(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        // Canonicalize for correct strip_prefix behavior with symlinked roots.
        let root = fs::canonicalize(root)?;
        Ok(Self { root })
    }

    /// Reject remote paths that could escape the backend root.
    fn validate_path(remote_path: &str) -> Result<&str> {
        let rel = remote_path.trim_start_matches('/');
        if rel.is_empty() {
            return Err(VigilError::InvalidFormat(format!(
                "unsafe remote path: '{remote_path}'"
            )));
        }
        if rel.contains('\\') {
            return Err(VigilError::InvalidFormat(format!(
                "unsafe remote path: contains backslash '{remote_path}'"
            )));
        }
        for component in Path::new(rel).components() {
            if component == Component::ParentDir {
                return Err(VigilError::InvalidFormat(format!(
                    "unsafe remote path: parent traversal '{remote_path}'"
                )));
            }
        }
        Ok(rel)
    }

    /// Resolve a `/`-rooted remote path to a filesystem path under the root.
    fn resolve(&self, remote_path: &str) -> Result<PathBuf> {
        Ok(self.root.join(Self::validate_path(remote_path)?))
    }

    fn list_dir(&self, dir: &Path, recursive: bool, items: &mut Vec<RemoteItem>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                if recursive {
                    self.list_dir(&entry.path(), recursive, items)?;
                }
            } else if file_type.is_file() {
                if let Ok(rel) = entry.path().strip_prefix(&self.root) {
                    let path = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    items.push(RemoteItem {
                        path: format!("/{path}"),
                        size: entry.metadata()?.len(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl RemoteStorage for LocalBackend {
    fn upload_file(&self, remote_path: &str, source: &mut dyn Read) -> Result<()> {
        let path = self.resolve(remote_path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&path)?;
        std::io::copy(source, &mut file)?;
        file.sync_all()?;
        Ok(())
    }

    fn download_file(&self, remote_path: &str, sink: &mut dyn Write) -> Result<()> {
        let path = self.resolve(remote_path)?;
        let mut file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VigilError::Remote(format!(
                    "object not found: '{remote_path}'"
                )))
            }
            Err(e) => return Err(e.into()),
        };
        std::io::copy(&mut file, sink)?;
        Ok(())
    }

    fn delete_file(&self, remote_path: &str) -> Result<()> {
        let path = self.resolve(remote_path)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list_files(&self, prefix: &str, recursive: bool) -> Result<Vec<RemoteItem>> {
        let dir = self.resolve(prefix)?;
        match fs::metadata(&dir) {
            Ok(meta) if meta.is_dir() => {
                let mut items = Vec::new();
                self.list_dir(&dir, recursive, &mut items)?;
                Ok(items)
            }
            Ok(_) => Ok(Vec::new()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}
