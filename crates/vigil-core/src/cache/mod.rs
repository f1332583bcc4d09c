pub mod action;
pub mod action_log;
pub mod debug_log;
pub mod state_cache;
pub mod store;

pub use action::{ActionKind, CacheAction};
pub use action_log::CacheActionLog;
pub use state_cache::{
    enumerate_remote_batch_numbers, remote_batch_path, RemoteFileStateCache, REMOTE_STATE_PREFIX,
};
pub use store::{BatchStore, BatchWriter, DirectoryBatchStore};
