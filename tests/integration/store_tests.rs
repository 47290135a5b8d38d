//! Persistent store integration tests.
//!
//! Tests verify:
//! - Records survive closing and reopening the database file
//! - insert_or_update replaces records in place
//! - LRU eviction is global across layers, oldest first
//! - Concurrent access through the connection pool

use std::sync::Arc;

use bytes::Bytes;

use tilekeep::store::{SqliteTileStore, StoreLimits, TileStore};
use tilekeep::tile::TileId;

use super::test_utils::{png_bytes, temp_store};

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test]
async fn test_records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tiles.sqlite");
    let id_a = TileId::new("low", 0, 0);
    let id_b = TileId::new("high", 3, 5);

    let store = SqliteTileStore::open(&path).unwrap();
    store
        .insert(&id_a, 1, Bytes::from_static(b"alpha"))
        .await
        .unwrap();
    store
        .insert(&id_b, 2, Bytes::from_static(b"beta"))
        .await
        .unwrap();
    drop(store);

    let reopened = SqliteTileStore::open(&path).unwrap();
    assert_eq!(reopened.count().await.unwrap(), 2);

    let record = reopened.read(&id_a).await.unwrap().unwrap();
    assert_eq!(record.last_used, 1);
    assert_eq!(record.image, Bytes::from_static(b"alpha"));

    let record = reopened.read(&id_b).await.unwrap().unwrap();
    assert_eq!(record.image, Bytes::from_static(b"beta"));
}

#[tokio::test]
async fn test_insert_or_update_replaces_in_place() {
    let (_dir, store) = temp_store();
    let id = TileId::new("low", 4, 2);

    store
        .insert_or_update(&id, 100, Bytes::from_static(b"old"), StoreLimits::default())
        .await
        .unwrap();
    store
        .insert_or_update(&id, 200, png_bytes(), StoreLimits::default())
        .await
        .unwrap();

    assert_eq!(store.count().await.unwrap(), 1);
    let record = store.read(&id).await.unwrap().unwrap();
    assert_eq!(record.last_used, 200);
    assert_eq!(record.image, png_bytes());
}

// =============================================================================
// Eviction
// =============================================================================

#[tokio::test]
async fn test_eviction_is_global_across_layers() {
    let (_dir, store) = temp_store();
    let body = png_bytes();

    // interleave layers so age, not layer, decides the order
    store
        .insert(&TileId::new("low", 0, 0), 10, body.clone())
        .await
        .unwrap();
    store
        .insert(&TileId::new("high", 0, 0), 20, body.clone())
        .await
        .unwrap();
    store
        .insert(&TileId::new("low", 1, 0), 30, body.clone())
        .await
        .unwrap();
    store
        .insert(&TileId::new("high", 1, 0), 40, body.clone())
        .await
        .unwrap();

    let deleted = store.delete_least_recently_used(3).await.unwrap();
    assert_eq!(deleted, 3);

    assert!(!store.exists(&TileId::new("low", 0, 0)).await.unwrap());
    assert!(!store.exists(&TileId::new("high", 0, 0)).await.unwrap());
    assert!(!store.exists(&TileId::new("low", 1, 0)).await.unwrap());
    assert!(store.exists(&TileId::new("high", 1, 0)).await.unwrap());
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn test_concurrent_inserts_through_the_pool() {
    let (_dir, store) = temp_store();

    let mut tasks = Vec::new();
    for x in 0..8u32 {
        let store = Arc::clone(&store);
        tasks.push(tokio::spawn(async move {
            let id = TileId::new("low", x, 0);
            store.insert(&id, u64::from(x), png_bytes()).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(store.count().await.unwrap(), 8);
}
