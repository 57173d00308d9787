//! Snapshot persistence across store backends

mod helpers;

use chrono::Duration;
use helpers::*;
use std::sync::Arc;
use tastesync_collector::store::{
    ArchiveRetention, FsObjectStore, MemoryObjectStore, ObjectStore, SnapshotWriter, SqliteObjectStore,
};
use tastesync_collector::SyncError;
use tempfile::TempDir;

async fn assert_round_trip(store: Arc<dyn ObjectStore>) {
    let writer = SnapshotWriter::new(store);
    let original = snapshot("alice", base_time(), 12);

    let report = writer.commit("alice", &original).await.unwrap();
    assert!(!report.is_partial());
    assert_eq!(report.metadata.counts.events, 12);

    let current = writer.read_current("alice").await.unwrap().unwrap();
    assert_eq!(current, original);

    let archived = writer.read_archive("alice", base_time()).await.unwrap().unwrap();
    assert_eq!(archived, original);
    assert_eq!(writer.list_archive("alice").await.unwrap(), vec![base_time()]);
}

#[tokio::test]
async fn test_round_trip_filesystem() {
    let temp = TempDir::new().unwrap();
    let store = FsObjectStore::new(temp.path().join("store")).unwrap();
    assert_round_trip(Arc::new(store)).await;
}

#[tokio::test]
async fn test_round_trip_sqlite() {
    let temp = TempDir::new().unwrap();
    let store = SqliteObjectStore::open(&temp.path().join("tastesync.db")).await.unwrap();
    assert_round_trip(Arc::new(store)).await;
}

#[tokio::test]
async fn test_round_trip_memory() {
    assert_round_trip(Arc::new(MemoryObjectStore::new())).await;
}

#[tokio::test]
async fn test_failed_current_write_leaves_previous_snapshot() {
    let store = Arc::new(FlakyStore::new());
    let writer = SnapshotWriter::new(store.clone());
    let previous = snapshot("alice", base_time(), 5);
    writer.commit("alice", &previous).await.unwrap();

    store.set_fail_current(true);
    let next = snapshot("alice", base_time() + Duration::hours(1), 8);
    let err = writer.commit("alice", &next).await.unwrap_err();

    assert!(matches!(err, SyncError::WriteConflict(_)));
    assert_eq!(writer.read_current("alice").await.unwrap().unwrap(), previous);
    assert_eq!(writer.list_archive("alice").await.unwrap(), vec![base_time()]);
}

#[tokio::test]
async fn test_archive_failure_is_partial_and_retryable() {
    let store = Arc::new(FlakyStore::new());
    let writer = SnapshotWriter::new(store.clone());
    store.set_fail_archive(true);

    let committed = snapshot("alice", base_time(), 5);
    let report = writer.commit("alice", &committed).await.unwrap();

    assert!(report.is_partial());
    assert!(report.archive_error.is_some());
    assert_eq!(writer.read_current("alice").await.unwrap().unwrap(), committed);
    assert!(writer.list_archive("alice").await.unwrap().is_empty());

    store.set_fail_archive(false);
    writer.retry_archive(&committed).await.unwrap();
    assert_eq!(
        writer.read_archive("alice", base_time()).await.unwrap().unwrap(),
        committed
    );
}

#[tokio::test]
async fn test_read_all_orders_archive_before_current() {
    let writer = SnapshotWriter::new(Arc::new(MemoryObjectStore::new()));
    for hours in [0, 2, 1] {
        writer
            .commit("alice", &snapshot("alice", base_time() + Duration::hours(hours), 2))
            .await
            .unwrap();
    }

    let all = writer.read_all("alice").await.unwrap();
    let stamps: Vec<_> = all.iter().map(|s| s.synced_at).collect();
    // The last commit (hour 1) is current but already archived
    assert_eq!(
        stamps,
        vec![
            base_time(),
            base_time() + Duration::hours(1),
            base_time() + Duration::hours(2),
        ]
    );
}

#[tokio::test]
async fn test_metadata_read_without_full_snapshot() {
    let writer = SnapshotWriter::new(Arc::new(MemoryObjectStore::new()));
    assert!(writer.read_current_metadata("alice").await.unwrap().is_none());

    writer.commit("alice", &snapshot("alice", base_time(), 7)).await.unwrap();
    let metadata = writer.read_current_metadata("alice").await.unwrap().unwrap();
    assert_eq!(metadata.synced_at, base_time());
    assert_eq!(metadata.counts.events, 7);
    assert_eq!(metadata.counts.top_tracks, 1);
}

#[tokio::test]
async fn test_commit_rejects_mismatched_user() {
    let writer = SnapshotWriter::new(Arc::new(MemoryObjectStore::new()));
    let err = writer
        .commit("bob", &snapshot("alice", base_time(), 1))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::WriteConflict(_)));
    assert!(writer.read_current("bob").await.unwrap().is_none());
}

#[tokio::test]
async fn test_retention_keeps_newest_entries() {
    let writer = SnapshotWriter::new(Arc::new(MemoryObjectStore::new()));
    for hours in 0..4 {
        writer
            .commit("alice", &snapshot("alice", base_time() + Duration::hours(hours), 1))
            .await
            .unwrap();
    }

    let deleted = ArchiveRetention::new(Some(2)).prune(&writer, "alice").await.unwrap();

    assert_eq!(deleted.len(), 2);
    assert_eq!(
        writer.list_archive("alice").await.unwrap(),
        vec![base_time() + Duration::hours(2), base_time() + Duration::hours(3)]
    );
    assert!(writer.read_current("alice").await.unwrap().is_some());
}

#[tokio::test]
async fn test_archive_entries_are_never_replaced() {
    let writer = SnapshotWriter::new(Arc::new(MemoryObjectStore::new()));
    let original = snapshot("alice", base_time(), 3);
    writer.commit("alice", &original).await.unwrap();

    // Same snapshot again is a no-op
    writer.retry_archive(&original).await.unwrap();

    // A different snapshot with the same timestamp does not overwrite the entry
    let other = snapshot("alice", base_time(), 6);
    let report = writer.commit("alice", &other).await.unwrap();
    assert!(report.is_partial());
    assert!(matches!(
        writer.retry_archive(&other).await.unwrap_err(),
        SyncError::WriteConflict(_)
    ));
    assert_eq!(
        writer.read_archive("alice", base_time()).await.unwrap().unwrap(),
        original
    );
}

#[tokio::test]
async fn test_archive_current_if_missing() {
    let store = Arc::new(FlakyStore::new());
    let writer = SnapshotWriter::new(store.clone());
    assert!(writer.archive_current_if_missing("alice").await.unwrap().is_none());

    store.set_fail_archive(true);
    let committed = snapshot("alice", base_time(), 4);
    writer.commit("alice", &committed).await.unwrap();
    store.set_fail_archive(false);

    assert!(writer.archive_current_if_missing("alice").await.unwrap().is_some());
    assert_eq!(writer.list_archive("alice").await.unwrap(), vec![base_time()]);
    assert!(writer.archive_current_if_missing("alice").await.unwrap().is_none());
}
