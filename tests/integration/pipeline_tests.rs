//! Load pipeline integration tests.
//!
//! Tests verify:
//! - Network loads mark tiles ready and persist the fetched bytes
//! - Store hits resolve without touching the network
//! - Failures mark tiles failed and write nothing
//! - Unreadable store records fall back to the network
//! - Stale store hits refresh `last_used`, fresh hits keep it
//! - High priority orders dispatch before low priority ones, FIFO within
//! - Cancellation before dispatch and in flight
//! - The store stays bounded through batched eviction

use std::sync::Arc;
use std::time::Duration;

use tilekeep::cache::LoadHandler;
use tilekeep::loader::{LoaderOptions, TileLoader};
use tilekeep::map::Map;
use tilekeep::store::{StoreLimits, TileStore};
use tilekeep::tile::{now_millis, LoadKind, Priority, Tile};

use super::test_utils::{
    assert_no_event, await_count, garbage_bytes, next_event, png_bytes, temp_store, test_map,
    GatedFetcher, ScriptedFetcher,
};

fn order(map: &Arc<Map>, layer_id: &str, x: u32, y: u32) -> Arc<Tile> {
    let layer = Arc::clone(map.layer_by_id(layer_id).unwrap());
    Arc::new(Tile::new(layer, x, y))
}

// =============================================================================
// Two-Stage Loading
// =============================================================================

#[tokio::test]
async fn test_network_load_marks_ready_and_persists() {
    let map = test_map();
    let (_dir, store) = temp_store();
    let fetcher = Arc::new(ScriptedFetcher::new());
    let (loader, mut events) = TileLoader::spawn(
        store.clone(),
        fetcher.clone(),
        LoaderOptions::default(),
    );

    let tile = order(&map, "low", 3, 4);
    loader.handle().order_load(Arc::clone(&tile), Priority::High);

    let event = next_event(&mut events).await;
    assert_eq!(event.kind, LoadKind::LoadedFromNetwork);
    assert_eq!(event.tile.id(), tile.id());
    assert!(tile.is_ready());
    assert_eq!(fetcher.fetch_count(), 1);
    assert_eq!(
        fetcher.fetched().await,
        vec!["https://tiles.test/low/4/3.png".to_string()]
    );

    // a follower through the network stage sequences the persist
    let follower = order(&map, "low", 4, 4);
    loader
        .handle()
        .order_load(Arc::clone(&follower), Priority::High);
    next_event(&mut events).await;

    let record = store.read(tile.id()).await.unwrap().unwrap();
    assert_eq!(record.image, png_bytes());
}

#[tokio::test]
async fn test_store_hit_skips_network() {
    let map = test_map();
    let (_dir, store) = temp_store();
    let tile = order(&map, "low", 1, 1);
    store
        .insert(tile.id(), now_millis(), png_bytes())
        .await
        .unwrap();

    let fetcher = Arc::new(ScriptedFetcher::new());
    let (loader, mut events) = TileLoader::spawn(
        store.clone(),
        fetcher.clone(),
        LoaderOptions::default(),
    );

    loader.handle().order_load(Arc::clone(&tile), Priority::High);

    let event = next_event(&mut events).await;
    assert_eq!(event.kind, LoadKind::LoadedFromStore);
    assert!(tile.is_ready());
    assert_eq!(fetcher.fetch_count(), 0);
}

#[tokio::test]
async fn test_failed_fetch_marks_failed_and_stores_nothing() {
    let map = test_map();
    let (_dir, store) = temp_store();
    let fetcher = Arc::new(ScriptedFetcher::new().with_failure("https://tiles.test/low/0/5.png"));
    let (loader, mut events) = TileLoader::spawn(
        store.clone(),
        fetcher.clone(),
        LoaderOptions::default(),
    );

    let tile = order(&map, "low", 5, 0);
    loader.handle().order_load(Arc::clone(&tile), Priority::High);

    let event = next_event(&mut events).await;
    assert_eq!(event.kind, LoadKind::LoadFailed);
    assert!(tile.is_failed());
    assert!(!store.exists(tile.id()).await.unwrap());
}

#[tokio::test]
async fn test_undecodable_body_fails_without_persisting() {
    let map = test_map();
    let (_dir, store) = temp_store();
    let fetcher = Arc::new(
        ScriptedFetcher::new().with_body("https://tiles.test/low/2/2.png", garbage_bytes()),
    );
    let (loader, mut events) = TileLoader::spawn(
        store.clone(),
        fetcher.clone(),
        LoaderOptions::default(),
    );

    let tile = order(&map, "low", 2, 2);
    loader.handle().order_load(Arc::clone(&tile), Priority::High);

    let event = next_event(&mut events).await;
    assert_eq!(event.kind, LoadKind::LoadFailed);
    assert!(tile.is_failed());
    assert!(!store.exists(tile.id()).await.unwrap());
}

#[tokio::test]
async fn test_corrupt_store_record_replaced_from_network() {
    let map = test_map();
    let (_dir, store) = temp_store();
    let tile = order(&map, "low", 7, 3);
    store
        .insert(tile.id(), now_millis(), garbage_bytes())
        .await
        .unwrap();

    let fetcher = Arc::new(ScriptedFetcher::new());
    let (loader, mut events) = TileLoader::spawn(
        store.clone(),
        fetcher.clone(),
        LoaderOptions::default(),
    );

    // the unreadable record falls through to the network stage
    loader.handle().order_load(Arc::clone(&tile), Priority::High);
    let event = next_event(&mut events).await;
    assert_eq!(event.kind, LoadKind::LoadedFromNetwork);
    assert_eq!(fetcher.fetch_count(), 1);

    let follower = order(&map, "low", 8, 3);
    loader
        .handle()
        .order_load(Arc::clone(&follower), Priority::High);
    next_event(&mut events).await;

    // the record now holds the fetched bytes
    let record = store.read(tile.id()).await.unwrap().unwrap();
    assert_eq!(record.image, png_bytes());
}

// =============================================================================
// Staleness
// =============================================================================

#[tokio::test]
async fn test_stale_store_hit_refreshes_last_used() {
    let map = test_map();
    let (_dir, store) = temp_store();
    let stale_ms = now_millis() - 25 * 60 * 60 * 1000;
    let tile = order(&map, "low", 0, 0);
    store
        .insert(tile.id(), stale_ms, png_bytes())
        .await
        .unwrap();

    // a second hit sequences the refresh of the first
    let follower = order(&map, "low", 1, 0);
    store
        .insert(follower.id(), now_millis(), png_bytes())
        .await
        .unwrap();

    let fetcher = Arc::new(ScriptedFetcher::new());
    let (loader, mut events) = TileLoader::spawn(store.clone(), fetcher, LoaderOptions::default());
    let handle = loader.handle();

    let before = now_millis();
    handle.order_load(Arc::clone(&tile), Priority::High);
    handle.order_load(Arc::clone(&follower), Priority::High);

    assert_eq!(next_event(&mut events).await.kind, LoadKind::LoadedFromStore);
    assert_eq!(next_event(&mut events).await.kind, LoadKind::LoadedFromStore);

    let record = store.read(tile.id()).await.unwrap().unwrap();
    assert!(record.last_used >= before);
}

#[tokio::test]
async fn test_fresh_store_hit_keeps_last_used() {
    let map = test_map();
    let (_dir, store) = temp_store();
    let fresh_ms = now_millis() - 1000;
    let tile = order(&map, "low", 0, 0);
    store
        .insert(tile.id(), fresh_ms, png_bytes())
        .await
        .unwrap();

    let fetcher = Arc::new(ScriptedFetcher::new());
    let (loader, mut events) = TileLoader::spawn(store.clone(), fetcher, LoaderOptions::default());

    loader.handle().order_load(Arc::clone(&tile), Priority::High);
    assert_eq!(next_event(&mut events).await.kind, LoadKind::LoadedFromStore);

    // below the staleness threshold nothing is written back
    let record = store.read(tile.id()).await.unwrap().unwrap();
    assert_eq!(record.last_used, fresh_ms);
}

// =============================================================================
// Priority and Cancellation
// =============================================================================

#[tokio::test]
async fn test_high_priority_orders_dispatch_first() {
    let map = test_map();
    let (_dir, store) = temp_store();
    let fetcher = Arc::new(ScriptedFetcher::new());
    let (loader, mut events) = TileLoader::spawn(
        store.clone(),
        fetcher.clone(),
        LoaderOptions::default(),
    );
    let handle = loader.handle();

    loader.pause();

    let low_a = order(&map, "low", 0, 1);
    let high_a = order(&map, "low", 1, 1);
    let low_b = order(&map, "low", 2, 1);
    let high_b = order(&map, "low", 3, 1);
    handle.order_load(Arc::clone(&low_a), Priority::Low);
    handle.order_load(Arc::clone(&high_a), Priority::High);
    handle.order_load(Arc::clone(&low_b), Priority::Low);
    handle.order_load(Arc::clone(&high_b), Priority::High);

    loader.resume();

    let mut seen = Vec::new();
    for _ in 0..4 {
        seen.push(next_event(&mut events).await.tile.id().clone());
    }
    assert_eq!(
        seen,
        vec![
            high_a.id().clone(),
            high_b.id().clone(),
            low_a.id().clone(),
            low_b.id().clone(),
        ]
    );
}

#[tokio::test]
async fn test_cancelled_queued_order_is_skipped() {
    let map = test_map();
    let (_dir, store) = temp_store();
    let fetcher = Arc::new(ScriptedFetcher::new());
    let (loader, mut events) = TileLoader::spawn(
        store.clone(),
        fetcher.clone(),
        LoaderOptions::default(),
    );
    let handle = loader.handle();

    loader.pause();

    let cancelled = order(&map, "low", 4, 4);
    handle.order_load(Arc::clone(&cancelled), Priority::High);
    handle.cancel_load(&cancelled);

    let kept = order(&map, "low", 5, 4);
    handle.order_load(Arc::clone(&kept), Priority::High);

    loader.resume();

    let event = next_event(&mut events).await;
    assert_eq!(event.tile.id(), kept.id());
    assert_eq!(fetcher.fetch_count(), 1);
    assert!(!cancelled.is_ready());
    assert_no_event(&mut events).await;
}

#[tokio::test]
async fn test_cancelled_in_flight_result_discarded_but_persisted() {
    let map = test_map();
    let (_dir, store) = temp_store();
    let (fetcher, started, release) = GatedFetcher::new();
    let (loader, mut events) = TileLoader::spawn(store.clone(), fetcher, LoaderOptions::default());
    let handle = loader.handle();

    let tile = order(&map, "low", 6, 6);
    handle.order_load(Arc::clone(&tile), Priority::High);

    // wait until the fetch is in flight, then cancel
    started.notified().await;
    handle.cancel_load(&tile);
    release.notify_one();

    // a follower sequences the persist of the cancelled result
    let follower = order(&map, "low", 7, 6);
    handle.order_load(Arc::clone(&follower), Priority::High);
    let event = next_event(&mut events).await;
    assert_eq!(event.tile.id(), follower.id());

    // the cancelled tile was never published, but its bytes were kept
    assert!(!tile.is_ready());
    assert!(store.exists(tile.id()).await.unwrap());
    assert_no_event(&mut events).await;
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_pause_holds_orders_until_resume() {
    let map = test_map();
    let (_dir, store) = temp_store();
    let fetcher = Arc::new(ScriptedFetcher::new());
    let (loader, mut events) = TileLoader::spawn(
        store.clone(),
        fetcher.clone(),
        LoaderOptions::default(),
    );

    loader.pause();

    let tile = order(&map, "low", 3, 3);
    loader.handle().order_load(Arc::clone(&tile), Priority::High);
    assert_no_event(&mut events).await;
    assert_eq!(fetcher.fetch_count(), 0);

    loader.resume();
    let event = next_event(&mut events).await;
    assert_eq!(event.kind, LoadKind::LoadedFromNetwork);
}

#[tokio::test]
async fn test_dropping_the_loader_closes_the_event_channel() {
    let map = test_map();
    let (_dir, store) = temp_store();
    let fetcher = Arc::new(ScriptedFetcher::new());
    let (loader, mut events) = TileLoader::spawn(
        store.clone(),
        fetcher.clone(),
        LoaderOptions::default(),
    );

    let tile = order(&map, "low", 0, 2);
    loader.handle().order_load(Arc::clone(&tile), Priority::High);
    next_event(&mut events).await;

    drop(loader);
    let closed = tokio::time::timeout(Duration::from_secs(5), events.recv()).await;
    assert!(closed.unwrap().is_none());
}

// =============================================================================
// Eviction
// =============================================================================

#[tokio::test]
async fn test_store_is_bounded_by_batched_eviction() {
    let map = test_map();
    let (_dir, store) = temp_store();
    let fetcher = Arc::new(ScriptedFetcher::new());
    let options = LoaderOptions {
        limits: StoreLimits {
            max_records: 3,
            evict_chunk: 2,
        },
        ..LoaderOptions::default()
    };
    let (loader, mut events) = TileLoader::spawn(store.clone(), fetcher, options);
    let handle = loader.handle();

    let tiles: Vec<_> = (0..5).map(|x| order(&map, "low", x, 0)).collect();
    for tile in &tiles {
        handle.order_load(Arc::clone(tile), Priority::High);
    }
    for _ in 0..5 {
        assert_eq!(
            next_event(&mut events).await.kind,
            LoadKind::LoadedFromNetwork
        );
    }

    // the fifth insert found four records, evicted a batch of two, then wrote
    await_count(&store, 3).await;
    assert!(!store.exists(tiles[0].id()).await.unwrap());
    assert!(!store.exists(tiles[1].id()).await.unwrap());
    assert!(store.exists(tiles[2].id()).await.unwrap());
    assert!(store.exists(tiles[3].id()).await.unwrap());
    assert!(store.exists(tiles[4].id()).await.unwrap());
}
