use std::sync::Arc;

use tempfile::TempDir;

use crate::cache::{DirectoryBatchStore, RemoteFileStateCache};
use crate::config::CacheConfig;
use crate::storage::RemoteStorage;
use crate::testutil::{ManualTimer, MemoryRemote};

pub fn test_config(dir: &TempDir) -> CacheConfig {
    let mut config = CacheConfig::new(dir.path().to_string_lossy().to_string());
    config.retry.retry_delay_ms = 10;
    config
}

/// Build a cache over `dir` with the given remote and a fresh manual timer.
pub fn build_cache_on(
    dir: &TempDir,
    remote: Arc<dyn RemoteStorage>,
    timer: Arc<ManualTimer>,
) -> Arc<RemoteFileStateCache> {
    let store = Arc::new(DirectoryBatchStore::open(dir.path()).unwrap());
    RemoteFileStateCache::new(&test_config(dir), store, remote, timer).unwrap()
}

/// A cache on a tempdir with an in-memory remote, worker not started.
pub struct TestCache {
    pub dir: TempDir,
    pub remote: Arc<MemoryRemote>,
    pub timer: Arc<ManualTimer>,
    pub store: Arc<DirectoryBatchStore>,
    pub cache: Arc<RemoteFileStateCache>,
}

pub fn build_cache() -> TestCache {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(MemoryRemote::new());
    let timer = Arc::new(ManualTimer::new());
    let store = Arc::new(DirectoryBatchStore::open(dir.path()).unwrap());
    let cache = RemoteFileStateCache::new(
        &test_config(&dir),
        Arc::clone(&store) as Arc<dyn crate::cache::BatchStore>,
        Arc::clone(&remote) as Arc<dyn RemoteStorage>,
        Arc::clone(&timer) as Arc<dyn crate::timer::Timer>,
    )
    .unwrap();
    TestCache {
        dir,
        remote,
        timer,
        store,
        cache,
    }
}

impl TestCache {
    pub fn flush(&self) {
        self.cache.upload_current_batch_and_begin_next().unwrap();
    }

    /// Stop the cache and rebuild it over the same directory and remote,
    /// as a daemon restart would.
    pub fn restart(self) -> TestCache {
        self.cache.stop();
        let TestCache {
            dir, remote, store, ..
        } = self;
        let timer = Arc::new(ManualTimer::new());
        let cache = RemoteFileStateCache::new(
            &test_config(&dir),
            Arc::clone(&store) as Arc<dyn crate::cache::BatchStore>,
            Arc::clone(&remote) as Arc<dyn RemoteStorage>,
            Arc::clone(&timer) as Arc<dyn crate::timer::Timer>,
        )
        .unwrap();
        TestCache {
            dir,
            remote,
            timer,
            store,
            cache,
        }
    }

    pub fn sorted_batches(&self) -> Vec<i64> {
        use crate::cache::BatchStore;
        let mut numbers = self.store.enumerate_batches().unwrap();
        numbers.sort_unstable();
        numbers
    }

    pub fn sorted_paths(&self) -> Vec<String> {
        let mut paths = self.cache.paths();
        paths.sort();
        paths
    }
}
