use std::collections::HashMap;
use std::io::BufRead;

use vigil_types::file_state::FileState;

use crate::cache::{BatchStore, CacheActionLog};
use crate::config::ACTION_QUEUE_DIR;

use super::helpers::{build_cache, TestCache};

/// Remote paths of all persisted actions, in ascending key order.
fn queued_remote_paths(t: &TestCache) -> Vec<String> {
    let log = CacheActionLog::new(t.dir.path().join(ACTION_QUEUE_DIR));
    let mut keys = log.enumerate_action_keys().unwrap();
    keys.sort_unstable();
    keys.iter()
        .map(|&key| {
            let action = log.rehydrate_action(key).unwrap();
            let verb = match &action.kind {
                crate::cache::ActionKind::UploadFile { .. } => "upload",
                crate::cache::ActionKind::DeleteFile { .. } => "delete",
            };
            format!("{verb} {}", action.kind.remote_path())
        })
        .collect()
}

fn batch_lines(t: &TestCache, number: i64) -> Vec<String> {
    t.store
        .open_batch_reader(number)
        .unwrap()
        .lines()
        .collect::<std::io::Result<_>>()
        .unwrap()
}

#[test]
fn more_than_three_batches_trigger_consolidation() {
    let t = build_cache();
    for i in 1..=4i64 {
        t.cache
            .update_file_state(
                &format!("/f{i}"),
                FileState::new(format!("/f{i}"), (i * 10) as u64, "aa"),
            )
            .unwrap();
        t.flush();
    }

    // Batch 1 was folded into batch 2 and removed locally.
    assert_eq!(t.sorted_batches(), vec![2, 3, 4]);
    assert_eq!(t.cache.current_batch_number(), 5);
    assert_eq!(batch_lines(&t, 2), vec!["10 aa /f1", "20 aa /f2"]);

    // Four seal uploads, then the re-upload of the merged batch and the
    // remote delete of the retired one.
    assert_eq!(
        queued_remote_paths(&t),
        vec![
            "upload /state/1",
            "upload /state/2",
            "upload /state/3",
            "upload /state/4",
            "upload /state/2",
            "delete /state/1",
        ]
    );
}

#[test]
fn merge_drops_entries_tombstoned_in_the_newer_batch() {
    let t = build_cache();
    t.cache
        .update_file_state("/p", FileState::new("/p", 1, "aa"))
        .unwrap();
    t.flush();
    assert!(t.cache.remove_file_state("/p").unwrap());
    t.flush();

    let retired = t.cache.consolidate_oldest_batch().unwrap();
    assert_eq!(retired, Some(1));

    // The merged batch carries neither the live entry nor the tombstone.
    assert_eq!(t.sorted_batches(), vec![2]);
    assert!(batch_lines(&t, 2).is_empty());

    let t = t.restart();
    assert!(t.cache.paths().is_empty());
    assert_eq!(t.cache.current_batch_number(), 3);
}

#[test]
fn merge_honors_tombstones_within_the_oldest_batch() {
    let t = build_cache();
    // Live entry and its tombstone land in the same batch: no flush
    // between the update and the removal.
    t.cache
        .update_file_state("/p", FileState::new("/p", 1, "aa"))
        .unwrap();
    assert!(t.cache.remove_file_state("/p").unwrap());
    t.cache
        .update_file_state("/q", FileState::new("/q", 2, "bb"))
        .unwrap();
    t.flush();
    t.cache
        .update_file_state("/r", FileState::new("/r", 3, "cc"))
        .unwrap();
    t.flush();

    assert_eq!(t.cache.consolidate_oldest_batch().unwrap(), Some(1));

    // The deleted path must not resurface in the merged batch.
    assert_eq!(batch_lines(&t, 2), vec!["2 bb /q", "3 cc /r"]);

    let t = t.restart();
    assert_eq!(t.sorted_paths(), vec!["/q", "/r"]);
    assert!(!t.cache.contains_path("/p"));
}

#[test]
fn merge_keeps_a_path_recreated_in_the_newer_batch() {
    let t = build_cache();
    t.cache
        .update_file_state("/p", FileState::new("/p", 1, "old"))
        .unwrap();
    assert!(t.cache.remove_file_state("/p").unwrap());
    t.flush();
    t.cache
        .update_file_state("/p", FileState::new("/p", 2, "new"))
        .unwrap();
    t.flush();

    assert_eq!(t.cache.consolidate_oldest_batch().unwrap(), Some(1));

    // The tombstone in the older batch must not erase the newer entry.
    assert_eq!(batch_lines(&t, 2), vec!["2 new /p"]);

    let t = t.restart();
    assert_eq!(
        t.cache.file_state("/p").unwrap(),
        FileState::new("/p", 2, "new")
    );
}

#[test]
fn merge_keeps_entries_unique_to_the_oldest_batch() {
    let t = build_cache();
    t.cache
        .update_file_state("/only-old", FileState::new("/only-old", 1, "aa"))
        .unwrap();
    t.cache
        .update_file_state("/both", FileState::new("/both", 2, "old"))
        .unwrap();
    t.flush();
    t.cache
        .update_file_state("/both", FileState::new("/both", 3, "new"))
        .unwrap();
    t.flush();

    assert_eq!(t.cache.consolidate_oldest_batch().unwrap(), Some(1));

    assert_eq!(batch_lines(&t, 2), vec!["3 new /both", "1 aa /only-old"]);
}

#[test]
fn consolidation_needs_two_sealed_batches() {
    let t = build_cache();
    t.cache
        .update_file_state("/a", FileState::new("/a", 1, "aa"))
        .unwrap();
    t.flush();

    assert_eq!(t.cache.consolidate_oldest_batch().unwrap(), None);
    assert_eq!(t.sorted_batches(), vec![1]);
}

#[test]
fn consolidation_never_touches_the_open_batch() {
    let t = build_cache();
    t.cache
        .update_file_state("/sealed", FileState::new("/sealed", 1, "aa"))
        .unwrap();
    t.flush();
    // Appended but not yet sealed.
    t.cache
        .update_file_state("/open", FileState::new("/open", 2, "bb"))
        .unwrap();

    assert_eq!(t.cache.consolidate_oldest_batch().unwrap(), None);
    assert_eq!(t.sorted_batches(), vec![1, 2]);
    assert_eq!(batch_lines(&t, 2), vec!["2 bb /open"]);
}

#[test]
fn consolidation_preserves_replay_semantics() {
    let t = build_cache();
    t.cache
        .update_file_state("/a", FileState::new("/a", 1, "a1"))
        .unwrap();
    t.cache
        .update_file_state("/b", FileState::new("/b", 2, "b1"))
        .unwrap();
    t.flush();
    t.cache
        .update_file_state("/a", FileState::new("/a", 3, "a2"))
        .unwrap();
    t.cache
        .update_file_state("/c", FileState::new("/c", 4, "c1"))
        .unwrap();
    t.flush();
    assert!(t.cache.remove_file_state("/b").unwrap());
    t.cache
        .update_file_state("/d", FileState::new("/d", 5, "d1"))
        .unwrap();
    t.flush();
    t.cache
        .update_file_state("/e", FileState::new("/e", 6, "e1"))
        .unwrap();
    t.flush();

    let expected: HashMap<String, FileState> = t
        .cache
        .paths()
        .into_iter()
        .map(|path| {
            let state = t.cache.file_state(&path).unwrap();
            (path, state)
        })
        .collect();

    // Fold everything down to a single sealed batch.
    while t.cache.consolidate_oldest_batch().unwrap().is_some() {}
    assert_eq!(t.sorted_batches().len(), 1);

    let t = t.restart();
    let replayed: HashMap<String, FileState> = t
        .cache
        .paths()
        .into_iter()
        .map(|path| {
            let state = t.cache.file_state(&path).unwrap();
            (path, state)
        })
        .collect();
    assert_eq!(replayed, expected);
}
