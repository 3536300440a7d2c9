//! Snapshot protocol tests at the store level: build on a populated replica,
//! install on a fresh one, and make sure corrupt streams change nothing.

mod support;

use std::io::Cursor;

use openraft::{RaftSnapshotBuilder, RaftStorage};
use vecraft::backend::{BackendClient, CollectionCatalog, CollectionSpec, DistanceFunction};
use vecraft::consensus::ReplicaStore;

const CHUNK_SIZE: u32 = 64;

async fn populated_store() -> (ReplicaStore, support::MockBackend, tempfile::TempDir) {
    let (addr, mock) = support::spawn_backend().await;
    let backend = BackendClient::connect_lazy(&addr).unwrap();

    backend
        .create_collection(&CollectionSpec {
            name: "users".to_string(),
            dimension: 3,
            distance: DistanceFunction::Cosine,
            payload_table_schema: String::new(),
        })
        .await
        .unwrap();
    for id in 0..10 {
        backend
            .insert("users", id, &[id as f32, 1.0, 0.5], "payload")
            .await
            .unwrap();
    }

    let dir = tempfile::tempdir().unwrap();
    let store = ReplicaStore::open(
        dir.path(),
        backend,
        CollectionCatalog::new(),
        CHUNK_SIZE,
    )
    .unwrap();
    (store, mock, dir)
}

async fn empty_store() -> (ReplicaStore, BackendClient, support::MockBackend, tempfile::TempDir) {
    let (addr, mock) = support::spawn_backend().await;
    let backend = BackendClient::connect_lazy(&addr).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let store = ReplicaStore::open(
        dir.path(),
        backend.clone(),
        CollectionCatalog::new(),
        CHUNK_SIZE,
    )
    .unwrap();
    (store, backend, mock, dir)
}

#[tokio::test]
async fn snapshot_round_trip_restores_backend_state() {
    let (mut source, _source_mock, _dir1) = populated_store().await;
    let snapshot = source.build_snapshot().await.unwrap();

    let (mut target, target_backend, target_mock, _dir2) = empty_store().await;
    assert!(!target_backend.collection_exists("users").await.unwrap());

    let meta = snapshot.meta.clone();
    let data = snapshot.snapshot.into_inner();
    target
        .install_snapshot(&meta, Box::new(Cursor::new(data)))
        .await
        .unwrap();

    // The restored replica answers reads like the source.
    assert!(target_backend.collection_exists("users").await.unwrap());
    assert_eq!(target_mock.point_count("users"), 10);
    let results = target_backend
        .search("users", &[2.0, 1.0, 0.5], 3, "")
        .await
        .unwrap();
    assert_eq!(results.results.len(), 3);
    assert_eq!(results.results[0].rowid, 2);

    // Installing again is harmless (restores are idempotent).
    let snapshot = source.build_snapshot().await.unwrap();
    let meta = snapshot.meta.clone();
    let data = snapshot.snapshot.into_inner();
    target
        .install_snapshot(&meta, Box::new(Cursor::new(data)))
        .await
        .unwrap();
    assert_eq!(target_mock.point_count("users"), 10);
}

#[tokio::test]
async fn current_snapshot_survives_reopen() {
    let (mut source, _mock, dir) = populated_store().await;
    let built = source.build_snapshot().await.unwrap();

    let current = source.get_current_snapshot().await.unwrap().unwrap();
    assert_eq!(current.meta.snapshot_id, built.meta.snapshot_id);

    // A store reopened over the same directory still serves it.
    drop(source);
    let backend = BackendClient::connect_lazy("http://127.0.0.1:1").unwrap();
    let mut reopened =
        ReplicaStore::open(dir.path(), backend, CollectionCatalog::new(), CHUNK_SIZE).unwrap();
    let current = reopened.get_current_snapshot().await.unwrap().unwrap();
    assert_eq!(current.meta.snapshot_id, built.meta.snapshot_id);
}

#[tokio::test]
async fn truncated_stream_fails_and_leaves_backend_untouched() {
    let (mut source, _source_mock, _dir1) = populated_store().await;
    let snapshot = source.build_snapshot().await.unwrap();

    let (mut target, target_backend, target_mock, _dir2) = empty_store().await;
    target_backend
        .create_collection(&CollectionSpec {
            name: "keep".to_string(),
            dimension: 2,
            distance: DistanceFunction::Euclidean,
            payload_table_schema: String::new(),
        })
        .await
        .unwrap();

    let meta = snapshot.meta.clone();
    let mut data = snapshot.snapshot.into_inner();
    data.truncate(data.len() - 1);

    let result = target
        .install_snapshot(&meta, Box::new(Cursor::new(data)))
        .await;
    assert!(result.is_err());

    // Pre-restore state is intact; nothing from the snapshot leaked in.
    assert!(target_backend.collection_exists("keep").await.unwrap());
    assert!(!target_backend.collection_exists("users").await.unwrap());
    assert_eq!(target_mock.point_count("users"), 0);
}

#[tokio::test]
async fn corrupted_frame_fails_verification() {
    let (mut source, _source_mock, _dir1) = populated_store().await;
    let snapshot = source.build_snapshot().await.unwrap();

    let (mut target, _backend, target_mock, _dir2) = empty_store().await;

    let meta = snapshot.meta.clone();
    let data = snapshot.snapshot.into_inner();

    // Flip one byte inside a frame payload. JSON framing may still decode;
    // checksum verification must catch whatever decoding does not.
    for position in (data.len() / 2)..data.len() {
        let mut corrupted = data.clone();
        corrupted[position] ^= 0x20;
        if corrupted == data {
            continue;
        }
        let result = target
            .install_snapshot(&meta, Box::new(Cursor::new(corrupted)))
            .await;
        assert!(result.is_err(), "corruption at byte {} went unnoticed", position);
        break;
    }
    assert_eq!(target_mock.point_count("users"), 0);
}
