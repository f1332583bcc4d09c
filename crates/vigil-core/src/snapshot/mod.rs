use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use vigil_types::error::Result;

use crate::report::ErrorReporter;

/// A point-in-time immutable view of the source filesystem, externally
/// produced. The tracker calls `dispose` exactly once, after the last
/// reference is released.
pub trait Snapshot: Send + Sync {
    fn dispose(&self) -> Result<()>;
}

struct TrackerState {
    count: u64,
    disposed: bool,
}

/// Reference-counted lifetime wrapper around a snapshot handle.
///
/// Consumers take [`SnapshotReference`] tokens while they read from the
/// snapshot; the snapshot is disposed the instant the last token is
/// released, on the releasing thread.
pub struct SnapshotReferenceTracker {
    snapshot: Box<dyn Snapshot>,
    reporter: Arc<dyn ErrorReporter>,
    state: Mutex<TrackerState>,
}

impl SnapshotReferenceTracker {
    pub fn new(snapshot: Box<dyn Snapshot>, reporter: Arc<dyn ErrorReporter>) -> Arc<Self> {
        Arc::new(Self {
            snapshot,
            reporter,
            state: Mutex::new(TrackerState {
                count: 0,
                disposed: false,
            }),
        })
    }

    /// Take a reference tagged with the path that caused it.
    pub fn add_reference(self: &Arc<Self>, path: &str) -> SnapshotReference {
        let mut state = self.state.lock().unwrap();
        state.count += 1;
        SnapshotReference {
            tracker: Arc::clone(self),
            path: path.to_string(),
            released: AtomicBool::new(false),
        }
    }

    /// Number of outstanding references.
    pub fn reference_count(&self) -> u64 {
        self.state.lock().unwrap().count
    }

    fn release_one(&self, path: &str) {
        let dispose_now = {
            let mut state = self.state.lock().unwrap();
            state.count -= 1;
            if state.count == 0 && !state.disposed {
                state.disposed = true;
                true
            } else {
                false
            }
        };

        if dispose_now {
            debug!(path = %path, "last snapshot reference released, disposing");
            if let Err(e) = self.snapshot.dispose() {
                // Release never fails visibly to the caller.
                self.reporter
                    .report("failed to dispose snapshot", path, Some(&e));
            }
        }
    }
}

/// Token whose existence keeps the snapshot alive. Releasing is
/// idempotent; an unreleased token releases itself on drop.
pub struct SnapshotReference {
    tracker: Arc<SnapshotReferenceTracker>,
    path: String,
    released: AtomicBool,
}

impl SnapshotReference {
    /// The path that caused this reference.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.tracker.release_one(&self.path);
    }
}

impl Drop for SnapshotReference {
    fn drop(&mut self) {
        self.release();
    }
}
