mod consolidation;
mod helpers;
mod snapshot_tracker;
