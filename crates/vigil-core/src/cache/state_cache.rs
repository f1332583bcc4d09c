use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::File;
use std::io::BufRead;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use vigil_types::error::{Result, VigilError};
use vigil_types::file_state::FileState;

use crate::config::CacheConfig;
use crate::storage::RemoteStorage;
use crate::timer::{Timer, TimerGuard};

use super::action::{ActionKind, CacheAction};
use super::action_log::CacheActionLog;
use super::debug_log::DebugLog;
use super::store::{BatchStore, BatchWriter};

/// Local batch count above which consolidation runs.
const MAX_LOCAL_BATCHES: usize = 3;

/// Remote prefix under which batch files are stored.
pub const REMOTE_STATE_PREFIX: &str = "/state";

/// Remote object path for a batch number.
pub fn remote_batch_path(number: i64) -> String {
    format!("{REMOTE_STATE_PREFIX}/{number}")
}

/// Batch numbers present on the remote, parsed from numeric names under
/// `/state/`; anything else there is ignored.
pub fn enumerate_remote_batch_numbers(remote: &dyn RemoteStorage) -> Result<Vec<i64>> {
    let items = remote.list_files(REMOTE_STATE_PREFIX, false)?;
    let mut numbers: Vec<i64> = items
        .iter()
        .filter_map(|item| item.path.rsplit('/').next())
        .filter_map(|name| name.parse().ok())
        .collect();
    numbers.sort_unstable();
    Ok(numbers)
}

/// State guarded by the cache's main mutex.
struct CacheState {
    entries: HashMap<String, FileState>,
    current_batch: Vec<FileState>,
    current_batch_number: i64,
    batch_writer: Option<Box<dyn BatchWriter>>,
    upload_timer: Option<TimerGuard>,
}

struct ActionQueue {
    queue: VecDeque<CacheAction>,
    /// True while the worker is applying a dequeued action.
    in_flight: bool,
}

/// Batched, log-structured, self-consolidating catalog of what has been
/// uploaded to the remote, durable across crashes.
///
/// Producers call [`update_file_state`](Self::update_file_state) /
/// [`remove_file_state`](Self::remove_file_state); mutations are applied
/// to the in-memory map, appended to the current batch file, and flushed
/// to the remote after a debounce window. Once more than three batches
/// accumulate locally, the two oldest are merged and the retired batch is
/// deleted remotely. All remote traffic flows through a single worker
/// thread draining a durable action queue.
pub struct RemoteFileStateCache {
    weak: Weak<RemoteFileStateCache>,
    store: Arc<dyn BatchStore>,
    remote: Arc<dyn RemoteStorage>,
    timer: Arc<dyn Timer>,
    action_log: CacheActionLog,
    debug_log: Option<DebugLog>,
    upload_delay: Duration,
    retry_delay: Duration,

    state: Mutex<CacheState>,
    consolidation: Mutex<()>,
    actions: Mutex<ActionQueue>,
    actions_wake: Condvar,
    busy: Mutex<u32>,
    busy_wake: Condvar,
    stopping: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RemoteFileStateCache {
    /// Build the cache and replay local batches into memory.
    pub fn new(
        config: &CacheConfig,
        store: Arc<dyn BatchStore>,
        remote: Arc<dyn RemoteStorage>,
        timer: Arc<dyn Timer>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let upload_delay = config.consolidation_delay()?;
        let retry_delay = config.retry_delay();
        let debug_log = match &config.debug_log_path {
            Some(path) => Some(DebugLog::open(Path::new(path))?),
            None => None,
        };
        let action_log = CacheActionLog::new(config.action_queue_path());

        let cache = Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            store,
            remote,
            timer,
            action_log,
            debug_log,
            upload_delay,
            retry_delay,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                current_batch: Vec::new(),
                current_batch_number: 1,
                batch_writer: None,
                upload_timer: None,
            }),
            consolidation: Mutex::new(()),
            actions: Mutex::new(ActionQueue {
                queue: VecDeque::new(),
                in_flight: false,
            }),
            actions_wake: Condvar::new(),
            busy: Mutex::new(0),
            busy_wake: Condvar::new(),
            stopping: AtomicBool::new(false),
            worker: Mutex::new(None),
        });
        cache.load_cache()?;
        Ok(cache)
    }

    fn load_cache(&self) -> Result<()> {
        let mut numbers = self.store.enumerate_batches()?;
        numbers.sort_unstable();

        let mut entries = HashMap::new();
        for &number in &numbers {
            replay_batch(self.store.as_ref(), number, &mut entries)?;
        }

        let next = numbers.last().map_or(1, |n| n + 1);
        let mut state = self.state.lock().unwrap();
        state.entries = entries;
        state.current_batch_number = next;
        debug!(
            batches = numbers.len(),
            entries = state.entries.len(),
            next_batch = next,
            "loaded file state cache"
        );
        drop(state);
        self.debug_line(&format!(
            "loaded cache from {} local batches, next batch {next}",
            numbers.len()
        ));
        Ok(())
    }

    /// Rehydrate the pending action queue and launch the action worker.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        self.action_log.ensure_directory_exists()?;

        let mut keys = self.action_log.enumerate_action_keys()?;
        keys.sort_unstable();
        {
            let mut actions = self.actions.lock().unwrap();
            // Every queued action is persisted before it is enqueued, so
            // the on-disk queue is authoritative for anything logged
            // before the worker launches.
            actions.queue.clear();
            for key in keys {
                match self.action_log.rehydrate_action(key) {
                    Ok(action) => actions.queue.push_back(action),
                    Err(e) => {
                        // The record stays on disk for manual inspection.
                        error!(key = key, "skipping unreadable action record: {e}");
                    }
                }
            }
            if !actions.queue.is_empty() {
                info!(pending = actions.queue.len(), "rehydrated pending actions");
            }
        }

        let me = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("vigil-actions".into())
            .spawn(move || me.action_worker())?;
        *self.worker.lock().unwrap() = Some(handle);
        self.actions_wake.notify_all();
        Ok(())
    }

    // --- Read API ---

    pub fn contains_path(&self, path: &str) -> bool {
        self.state.lock().unwrap().entries.contains_key(path)
    }

    /// A stable copy of all live paths, never a live view.
    pub fn paths(&self) -> Vec<String> {
        self.state.lock().unwrap().entries.keys().cloned().collect()
    }

    pub fn file_state(&self, path: &str) -> Option<FileState> {
        self.state.lock().unwrap().entries.get(path).cloned()
    }

    pub fn current_batch_number(&self) -> i64 {
        self.state.lock().unwrap().current_batch_number
    }

    // --- Write API ---

    /// Insert or overwrite the state recorded for `path`. The path field
    /// of `state` is reaffirmed from the key.
    pub fn update_file_state(&self, path: &str, mut state: FileState) -> Result<()> {
        if state.is_tombstone() {
            return Err(VigilError::InvalidFormat(format!(
                "cannot upsert a tombstone for '{path}'"
            )));
        }
        state.path = path.to_string();

        let mut guard = self.state.lock().unwrap();
        guard.entries.insert(path.to_string(), state.clone());
        self.append_to_current_batch(&mut guard, state)
    }

    /// Remove `path`, appending a tombstone. Returns whether an entry was
    /// actually removed.
    pub fn remove_file_state(&self, path: &str) -> Result<bool> {
        let mut guard = self.state.lock().unwrap();
        if guard.entries.remove(path).is_none() {
            return Ok(false);
        }
        self.append_to_current_batch(&mut guard, FileState::tombstone(path))?;
        Ok(true)
    }

    fn append_to_current_batch(&self, guard: &mut CacheState, state: FileState) -> Result<()> {
        guard.current_batch.push(state.clone());

        if guard.upload_timer.is_none() {
            let weak = self.weak.clone();
            guard.upload_timer = Some(self.timer.schedule(
                self.upload_delay,
                Box::new(move || {
                    if let Some(cache) = weak.upgrade() {
                        cache.batch_upload_timer_elapsed();
                    }
                }),
            ));
        }

        if guard.batch_writer.is_none() {
            guard.batch_writer = Some(self.store.open_batch_writer(guard.current_batch_number)?);
        }
        if let Some(writer) = guard.batch_writer.as_mut() {
            writer.append(&state)?;
        }
        Ok(())
    }

    // --- Upload & consolidation ---

    fn batch_upload_timer_elapsed(&self) {
        let _busy = BusyScope::enter(self);
        self.state.lock().unwrap().upload_timer = None;
        if let Err(e) = self.upload_current_batch_and_begin_next() {
            error!("batch upload failed: {e}");
            self.debug_line(&format!("batch upload failed: {e}"));
        }
    }

    /// Seal the current batch (if non-empty), durably enqueue its upload,
    /// and consolidate old batches. When this returns the outgoing batch
    /// is on the action queue, though not necessarily uploaded yet.
    pub fn upload_current_batch_and_begin_next(&self) -> Result<()> {
        let sealed = {
            let mut state = self.state.lock().unwrap();
            if state.current_batch.is_empty() {
                None
            } else {
                let number = state.current_batch_number;
                state.current_batch_number += 1;
                state.current_batch.clear();
                state.batch_writer = None;
                state.upload_timer = None;
                Some(number)
            }
        };

        if let Some(number) = sealed {
            self.enqueue_batch_upload(number)?;
        }

        let _guard = self.consolidation.lock().unwrap();
        loop {
            if self.store.enumerate_batches()?.len() <= MAX_LOCAL_BATCHES {
                return Ok(());
            }
            let Some(retired) = self.consolidate_oldest_batch_locked()? else {
                return Ok(());
            };
            self.queue_action(CacheAction::delete(remote_batch_path(retired)))?;
        }
    }

    /// Stage a copy of the batch file and enqueue its upload. The copy
    /// insulates the queued action from later consolidation of the
    /// original.
    fn enqueue_batch_upload(&self, number: i64) -> Result<()> {
        self.action_log.ensure_directory_exists()?;
        let staged = self.action_log.create_temporary_data_file()?;
        let mut source = self.store.open_batch_stream(number)?;
        let mut target = File::create(&staged)?;
        std::io::copy(&mut source, &mut target)?;
        target.sync_all()?;
        drop(target);

        let size = self.store.batch_size(number)?;
        debug!(batch = number, bytes = size, "queueing batch upload");
        self.debug_line(&format!("queueing upload of batch {number} ({size} bytes)"));
        self.queue_action(CacheAction::upload(remote_batch_path(number), staged))
    }

    /// Merge the oldest batch into its successor and retire it. Returns
    /// the retired batch number, or `None` when fewer than two sealed
    /// batches exist. The caller is responsible for deleting the retired
    /// batch from the remote.
    pub fn consolidate_oldest_batch(&self) -> Result<Option<i64>> {
        let _guard = self.consolidation.lock().unwrap();
        self.consolidate_oldest_batch_locked()
    }

    fn consolidate_oldest_batch_locked(&self) -> Result<Option<i64>> {
        let mut numbers = self.store.enumerate_batches()?;
        numbers.sort_unstable();
        // The still-open batch never participates in a merge.
        let current = self.state.lock().unwrap().current_batch_number;
        numbers.retain(|&n| n < current);
        if numbers.len() < 2 {
            return Ok(None);
        }
        let oldest = numbers[0];
        let merge_into = numbers[1];

        let mut merged: HashMap<String, FileState> = HashMap::new();
        let mut deleted: HashSet<String> = HashSet::new();
        {
            let reader = self.store.open_batch_reader(merge_into)?;
            for line in reader.lines() {
                let line = line?;
                if line.is_empty() {
                    continue;
                }
                let state = FileState::parse(&line)?;
                if state.is_tombstone() {
                    merged.remove(&state.path);
                    deleted.insert(state.path);
                } else {
                    merged.insert(state.path.clone(), state);
                }
            }
        }
        {
            // The oldest batch replays in isolation first: a tombstone in
            // it can only erase an earlier line of the same batch, never
            // an entry from the newer one. Survivors merge unless the
            // newer batch shadows them.
            let mut oldest_entries: HashMap<String, FileState> = HashMap::new();
            replay_batch(self.store.as_ref(), oldest, &mut oldest_entries)?;
            for (path, state) in oldest_entries {
                if deleted.contains(&path) || merged.contains_key(&path) {
                    continue;
                }
                merged.insert(path, state);
            }
        }

        {
            let mut writer = self.store.open_new_batch_writer(merge_into)?;
            let mut states: Vec<&FileState> = merged.values().collect();
            states.sort_by(|a, b| a.path.cmp(&b.path));
            for state in states {
                writer.append(state)?;
            }
            writer.finish()?;
        }
        self.store.switch_to_consolidated(oldest, merge_into)?;

        info!(
            oldest = oldest,
            merge_into = merge_into,
            entries = merged.len(),
            "consolidated oldest batch"
        );
        self.debug_line(&format!(
            "consolidated batch {oldest} into {merge_into} ({} entries)",
            merged.len()
        ));

        self.enqueue_batch_upload(merge_into)?;
        Ok(Some(oldest))
    }

    // --- Action queue ---

    fn queue_action(&self, mut action: CacheAction) -> Result<()> {
        self.action_log.log_action(&mut action)?;
        let mut actions = self.actions.lock().unwrap();
        actions.queue.push_back(action);
        drop(actions);
        self.actions_wake.notify_all();
        Ok(())
    }

    fn action_worker(&self) {
        loop {
            let mut action = {
                let mut actions = self.actions.lock().unwrap();
                loop {
                    if self.stopping.load(Ordering::SeqCst) {
                        return;
                    }
                    if let Some(action) = actions.queue.pop_front() {
                        actions.in_flight = true;
                        break action;
                    }
                    actions = self.actions_wake.wait(actions).unwrap();
                }
            };

            while !action.complete {
                match self.process_action(&mut action) {
                    Ok(()) => {}
                    Err(e) => {
                        warn!(
                            key = action.key,
                            "action failed, retrying in {:?}: {e}", self.retry_delay
                        );
                        if self.stopping.load(Ordering::SeqCst) {
                            break;
                        }
                        std::thread::sleep(self.retry_delay);
                        if self.stopping.load(Ordering::SeqCst) {
                            break;
                        }
                    }
                }
            }

            if action.complete {
                self.action_log.release_action(&mut action);
            }

            let mut actions = self.actions.lock().unwrap();
            actions.in_flight = false;
            drop(actions);
            self.actions_wake.notify_all();
        }
    }

    fn process_action(&self, action: &mut CacheAction) -> Result<()> {
        match &action.kind {
            ActionKind::UploadFile {
                remote_path,
                source_path,
            } => {
                let mut source = File::open(source_path)?;
                self.remote.upload_file(remote_path, &mut source)?;
                drop(source);
                if let Err(e) = std::fs::remove_file(source_path) {
                    warn!(
                        path = %source_path.display(),
                        "failed to remove staged upload file: {e}"
                    );
                }
                self.debug_line(&format!("uploaded {remote_path}"));
            }
            ActionKind::DeleteFile { remote_path } => {
                self.remote.delete_file(remote_path)?;
                self.debug_line(&format!("deleted {remote_path}"));
            }
        }
        action.complete = true;
        Ok(())
    }

    /// Block until the action queue is empty and no action is in flight,
    /// or until `deadline` elapses. Returns whether the queue drained.
    pub fn drain_action_queue(&self, deadline: Duration) -> bool {
        let started = Instant::now();
        let mut actions = self.actions.lock().unwrap();
        loop {
            if actions.queue.is_empty() && !actions.in_flight {
                return true;
            }
            let elapsed = started.elapsed();
            if elapsed >= deadline {
                return false;
            }
            let (guard, _) = self
                .actions_wake
                .wait_timeout(actions, deadline - elapsed)
                .unwrap();
            actions = guard;
        }
    }

    // --- Busy tracking & shutdown ---

    /// Block until no background upload or consolidation work is running.
    pub fn wait_while_busy(&self) {
        let mut busy = self.busy.lock().unwrap();
        while *busy > 0 {
            busy = self.busy_wake.wait(busy).unwrap();
        }
    }

    /// Cooperative shutdown: wake the worker, let the in-flight remote
    /// attempt finish, and join the thread. Pending actions stay on disk
    /// for the next startup.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.actions_wake.notify_all();
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("action worker panicked");
            }
        }
        self.state.lock().unwrap().upload_timer = None;
        self.debug_line("stopped");
    }

    fn debug_line(&self, line: &str) {
        if let Some(log) = &self.debug_log {
            log.write_line(line);
        }
    }
}

fn replay_batch(
    store: &dyn BatchStore,
    number: i64,
    entries: &mut HashMap<String, FileState>,
) -> Result<()> {
    let reader = store.open_batch_reader(number)?;
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let state = FileState::parse(&line)?;
        if state.is_tombstone() {
            entries.remove(&state.path);
        } else {
            entries.insert(state.path.clone(), state);
        }
    }
    Ok(())
}

/// Scoped marker for background work, released on all exit paths.
struct BusyScope<'a> {
    cache: &'a RemoteFileStateCache,
}

impl<'a> BusyScope<'a> {
    fn enter(cache: &'a RemoteFileStateCache) -> Self {
        *cache.busy.lock().unwrap() += 1;
        Self { cache }
    }
}

impl Drop for BusyScope<'_> {
    fn drop(&mut self) {
        let mut busy = self.cache.busy.lock().unwrap();
        *busy -= 1;
        if *busy == 0 {
            self.cache.busy_wake.notify_all();
        }
    }
}
