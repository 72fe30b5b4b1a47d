//! Integration tests for the SQLite-backed snapshot store.
//!
//! Tests cover:
//! - Writing and reading back whole snapshots
//! - Persistence across reopen, including through a session
//! - Quota enforcement and corrupt records

mod common;

use anonymizer::core::db::{IMAGES_KEY, quota_pages};

use common::*;

async fn staged(count: usize) -> Vec<StagedImage> {
    let session = SessionStore::<ScriptedStore>::in_memory(count);
    session.add_files(png_blobs(count)).await;
    session.images().await
}

#[tokio::test]
async fn test_read_empty_store() -> anyhow::Result<()> {
    let (store, _temp_dir) = create_test_store(None).await;

    assert!(store.read_all().await?.is_empty());
    assert!(store.get(IMAGES_KEY).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_write_then_read_preserves_order_and_data() -> anyhow::Result<()> {
    let (store, _temp_dir) = create_test_store(None).await;
    let images = staged(3).await;

    store.write_all(&images).await?;
    let loaded = store.read_all().await?;

    assert_eq!(loaded.len(), 3);
    assert_eq!(names(&loaded), vec!["img1.png", "img2.png", "img3.png"]);
    assert_eq!(loaded, images);

    Ok(())
}

#[tokio::test]
async fn test_write_replaces_previous_snapshot() -> anyhow::Result<()> {
    let (store, _temp_dir) = create_test_store(None).await;
    let images = staged(3).await;

    store.write_all(&images).await?;
    store.write_all(&images[2..]).await?;

    assert_eq!(names(&store.read_all().await?), vec!["img3.png"]);

    store.clear().await?;
    assert!(store.read_all().await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_annotation_survives_round_trip() -> anyhow::Result<()> {
    let (store, _temp_dir) = create_test_store(None).await;
    let session = SessionStore::<ScriptedStore>::in_memory(10);
    session.add_files(png_blobs(1)).await;
    let overlay = DataUrl::encode("image/png", &png_bytes(64, 48));
    session
        .replace_annotation(0, overlay.clone(), vec![face_box(5.0, 6.0)])
        .await?;

    store.write_all(&session.images().await).await?;
    let loaded = store.read_all().await?;

    assert_eq!(loaded[0].annotated_data(), Some(&overlay));
    assert_eq!(loaded[0].annotations(), Some([face_box(5.0, 6.0)].as_slice()));

    Ok(())
}

#[tokio::test]
async fn test_session_persists_across_reopen() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("nested").join("session.db");

    // 1. Stage images through a persisted session
    let first = SessionStore::restore(10, SqliteSnapshotStore::open(&path, None)).await;
    assert!(first.persistence().await.available);
    first.add_files(png_blobs(4)).await;
    first.remove_at(0).await?;
    let expected = first.images().await;
    drop(first);

    // 2. A fresh session sees the same images in the same order
    let second = SessionStore::restore(10, SqliteSnapshotStore::open(&path, None)).await;
    assert_eq!(second.images().await, expected);
    assert_eq!(names(&expected), vec!["img2.png", "img3.png", "img4.png"]);

    Ok(())
}

#[tokio::test]
async fn test_open_failure_is_unavailable() -> anyhow::Result<()> {
    // A regular file where the parent directory should be
    let blocker = tempfile::NamedTempFile::new()?;
    let path = blocker.path().join("session.db");

    let result = SqliteSnapshotStore::open(&path, None).await;
    assert!(matches!(result, Err(StorageError::Unavailable(_))));

    let session = SessionStore::restore(10, SqliteSnapshotStore::open(&path, None)).await;
    assert!(!session.persistence().await.available);
    assert_eq!(session.add_files(png_blobs(1)).await, 1);

    Ok(())
}

#[tokio::test]
async fn test_corrupt_record_is_reported() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("session.db");
    let store = SqliteSnapshotStore::open(&path, None).await?;
    store.put(IMAGES_KEY, b"not a snapshot").await?;

    assert!(matches!(store.read_all().await, Err(StorageError::Corrupt(_))));
    store.close().await;

    // A session over the corrupt record starts empty and session-only
    let session = SessionStore::restore(10, SqliteSnapshotStore::open(&path, None)).await;
    assert!(session.is_empty().await);
    assert!(!session.persistence().await.available);

    Ok(())
}

#[tokio::test]
async fn test_quota_exceeded() -> anyhow::Result<()> {
    let (store, _temp_dir) = create_test_store(Some(64 * 1024)).await;

    // Small snapshots fit
    store.write_all(&staged(1).await).await?;

    // A few hundred kilobytes of incompressible pixels do not
    let blob = FileBlob::new("noise.png", None, noisy_png_bytes(256, 256));
    let big = vec![StagedImage::from_blob(&blob)];
    assert_eq!(store.write_all(&big).await, Err(StorageError::QuotaExceeded));

    // The previous snapshot is still intact
    assert_eq!(names(&store.read_all().await?), vec!["img1.png"]);

    Ok(())
}

#[tokio::test]
async fn test_quota_exhaustion_through_session() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("session.db");
    let session = SessionStore::restore(10, SqliteSnapshotStore::open(&path, Some(64 * 1024))).await;
    let mut events = session.subscribe();

    let noisy = (1..=3).map(|i| FileBlob::new(format!("noise{i}.png"), None, noisy_png_bytes(256, 256)));
    assert_eq!(session.add_files(noisy).await, 3);

    let state = session.persistence().await;
    assert!(!state.available);
    assert!(state.warned_once);
    let warnings = drain(&mut events)
        .into_iter()
        .filter(|event| *event == SessionEvent::QuotaWarning)
        .count();
    assert_eq!(warnings, 1);
    assert_eq!(session.len().await, 3);

    Ok(())
}

#[test]
fn test_quota_pages() {
    assert_eq!(quota_pages(4096 * 100), 100);
    assert_eq!(quota_pages(4096 * 100 + 10), 100);
    // Never below what the schema itself needs
    assert_eq!(quota_pages(0), 8);
}
