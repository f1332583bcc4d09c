use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::seq::SliceRandom;

use crate::report::ErrorReporter;
use crate::snapshot::{SnapshotReference, SnapshotReferenceTracker};
use crate::testutil::{CollectingReporter, TestSnapshot};

fn tracker() -> (
    Arc<SnapshotReferenceTracker>,
    Arc<AtomicUsize>,
    Arc<CollectingReporter>,
) {
    let disposals = Arc::new(AtomicUsize::new(0));
    let reporter = Arc::new(CollectingReporter::default());
    let tracker = SnapshotReferenceTracker::new(
        Box::new(TestSnapshot::new(Arc::clone(&disposals))),
        Arc::clone(&reporter) as Arc<dyn ErrorReporter>,
    );
    (tracker, disposals, reporter)
}

#[test]
fn ten_references_released_in_random_order_dispose_once() {
    let (tracker, disposals, reporter) = tracker();

    let mut references: Vec<SnapshotReference> = (0..10)
        .map(|i| tracker.add_reference(&format!("/data/file-{i}")))
        .collect();
    assert_eq!(tracker.reference_count(), 10);

    references.shuffle(&mut rand::thread_rng());
    while let Some(reference) = references.pop() {
        reference.release();
        let expected = if references.is_empty() { 1 } else { 0 };
        assert_eq!(disposals.load(Ordering::SeqCst), expected);
    }

    assert_eq!(tracker.reference_count(), 0);
    assert!(reporter.reports().is_empty());
}

#[test]
fn concurrent_releases_dispose_exactly_once() {
    let (tracker, disposals, _reporter) = tracker();

    let references: Vec<SnapshotReference> = (0..16)
        .map(|i| tracker.add_reference(&format!("/data/file-{i}")))
        .collect();

    let handles: Vec<_> = references
        .into_iter()
        .map(|reference| {
            std::thread::spawn(move || {
                reference.release();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(disposals.load(Ordering::SeqCst), 1);
    assert_eq!(tracker.reference_count(), 0);
}
