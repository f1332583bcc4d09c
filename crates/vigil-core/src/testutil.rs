use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vigil_types::error::{Result, VigilError};

use crate::report::ErrorReporter;
use crate::snapshot::Snapshot;
use crate::storage::{RemoteItem, RemoteStorage};
use crate::timer::{Timer, TimerControl, TimerGuard};

/// In-memory remote storage for testing. Thread-safe via Mutex, and
/// records the order of mutating calls for FIFO assertions.
pub struct MemoryRemote {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    operations: Mutex<Vec<String>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            operations: Mutex::new(Vec::new()),
        }
    }

    pub fn object(&self, path: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(path).cloned()
    }

    /// Mutating calls in arrival order, e.g. `"upload /state/1"`.
    pub fn operations(&self) -> Vec<String> {
        self.operations.lock().unwrap().clone()
    }
}

impl RemoteStorage for MemoryRemote {
    fn upload_file(&self, remote_path: &str, source: &mut dyn Read) -> Result<()> {
        let mut data = Vec::new();
        source.read_to_end(&mut data)?;
        self.objects
            .lock()
            .unwrap()
            .insert(remote_path.to_string(), data);
        self.operations
            .lock()
            .unwrap()
            .push(format!("upload {remote_path}"));
        Ok(())
    }

    fn download_file(&self, remote_path: &str, sink: &mut dyn Write) -> Result<()> {
        match self.objects.lock().unwrap().get(remote_path) {
            Some(data) => {
                sink.write_all(data)?;
                Ok(())
            }
            None => Err(VigilError::Remote(format!(
                "object not found: '{remote_path}'"
            ))),
        }
    }

    fn delete_file(&self, remote_path: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(remote_path);
        self.operations
            .lock()
            .unwrap()
            .push(format!("delete {remote_path}"));
        Ok(())
    }

    fn list_files(&self, prefix: &str, recursive: bool) -> Result<Vec<RemoteItem>> {
        let prefix = format!("{}/", prefix.trim_end_matches('/'));
        let objects = self.objects.lock().unwrap();
        let items = objects
            .iter()
            .filter(|(path, _)| {
                let path = path.as_str();
                path.starts_with(&prefix) && (recursive || !path[prefix.len()..].contains('/'))
            })
            .map(|(path, data)| RemoteItem {
                path: path.clone(),
                size: data.len() as u64,
            })
            .collect();
        Ok(items)
    }
}

/// Remote port that fails uploads while a failure budget remains, then
/// delegates to an inner [`MemoryRemote`].
pub struct FlakyRemote {
    pub inner: MemoryRemote,
    failures_remaining: AtomicUsize,
    upload_attempts: AtomicUsize,
}

impl FlakyRemote {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: MemoryRemote::new(),
            failures_remaining: AtomicUsize::new(failures),
            upload_attempts: AtomicUsize::new(0),
        }
    }

    pub fn upload_attempts(&self) -> usize {
        self.upload_attempts.load(Ordering::SeqCst)
    }
}

impl RemoteStorage for FlakyRemote {
    fn upload_file(&self, remote_path: &str, source: &mut dyn Read) -> Result<()> {
        self.upload_attempts.fetch_add(1, Ordering::SeqCst);
        if self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(VigilError::Remote("injected upload failure".into()));
        }
        self.inner.upload_file(remote_path, source)
    }

    fn download_file(&self, remote_path: &str, sink: &mut dyn Write) -> Result<()> {
        self.inner.download_file(remote_path, sink)
    }

    fn delete_file(&self, remote_path: &str) -> Result<()> {
        self.inner.delete_file(remote_path)
    }

    fn list_files(&self, prefix: &str, recursive: bool) -> Result<Vec<RemoteItem>> {
        self.inner.list_files(prefix, recursive)
    }
}

/// Timer that captures scheduled callbacks for deterministic firing.
pub struct ManualTimer {
    pending: Mutex<Vec<(Box<dyn FnOnce() + Send>, Arc<TimerControl>)>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Fire every non-cancelled pending callback on the calling thread.
    /// Returns how many fired.
    pub fn fire_all(&self) -> usize {
        let drained: Vec<_> = self.pending.lock().unwrap().drain(..).collect();
        let mut fired = 0;
        for (callback, control) in drained {
            if !control.is_cancelled() {
                callback();
                fired += 1;
            }
        }
        fired
    }
}

impl Timer for ManualTimer {
    fn schedule(&self, _delay: Duration, callback: Box<dyn FnOnce() + Send>) -> TimerGuard {
        let (guard, control) = TimerGuard::with_control();
        self.pending.lock().unwrap().push((callback, control));
        guard
    }
}

/// Snapshot stub counting disposals, optionally failing them.
pub struct TestSnapshot {
    disposals: Arc<AtomicUsize>,
    fail: bool,
}

impl TestSnapshot {
    pub fn new(disposals: Arc<AtomicUsize>) -> Self {
        Self {
            disposals,
            fail: false,
        }
    }

    pub fn failing(disposals: Arc<AtomicUsize>) -> Self {
        Self {
            disposals,
            fail: true,
        }
    }
}

impl Snapshot for TestSnapshot {
    fn dispose(&self) -> Result<()> {
        self.disposals.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(VigilError::Other("injected dispose failure".into()))
        } else {
            Ok(())
        }
    }
}

/// Error reporter that collects formatted reports.
#[derive(Default)]
pub struct CollectingReporter {
    reports: Mutex<Vec<String>>,
}

impl CollectingReporter {
    pub fn reports(&self) -> Vec<String> {
        self.reports.lock().unwrap().clone()
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, message: &str, detail: &str, error: Option<&VigilError>) {
        let line = match error {
            Some(e) => format!("{message} ({detail}): {e}"),
            None => format!("{message} ({detail})"),
        };
        self.reports.lock().unwrap().push(line);
    }
}
