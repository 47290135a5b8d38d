//! # tilekeep
//!
//! An offline tile warehouse for pyramid maps.
//!
//! This library implements the loading pipeline of a tiled map viewer that
//! keeps working without connectivity. Tiles come out of a bounded in-memory
//! cache; misses are looked up in a persistent SQLite store, and only store
//! misses touch the network. Everything fetched from the network is written
//! back to the store, so any tile is downloaded at most once.
//!
//! ## Features
//!
//! - **Offline first**: fetched tiles land in a SQLite store and are served
//!   from there when connectivity is gone
//! - **Two-stage loading**: every order checks the persistent store before
//!   touching the network
//! - **Prioritized orders**: visible tiles jump ahead of bulk work, strictly
//!   FIFO within a priority
//! - **Bounded everywhere**: the in-memory cache recycles a fixed grid of
//!   slots per layer, the store evicts least recently used tiles in batches
//! - **Cancellation**: superseded orders are dropped before they cost a
//!   request; results that arrive after cancellation are discarded
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`map`] - map and layer geometry, scale ranges, tile URL templates
//! - [`tile`] - tile identity, state and load events
//! - [`cache`] - bounded per-layer tile grids handed to the renderer
//! - [`loader`] - the two-stage loading pipeline
//! - [`fetch`] - HTTP tile fetching
//! - [`store`] - the persistent SQLite tile store
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use tilekeep::{
//!     HttpTileFetcher, LoaderOptions, Map, MapDefinition, SqliteTileStore, TileCache, TileLoader,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let map = Arc::new(Map::from_definition(&MapDefinition::swisstopo())?);
//!
//!     let store = Arc::new(SqliteTileStore::open("tiles.sqlite")?);
//!     let fetcher = Arc::new(HttpTileFetcher::new()?);
//!     let (loader, mut events) = TileLoader::spawn(store, fetcher, LoaderOptions::default());
//!
//!     // The cache hands out tiles and orders loads for the misses.
//!     let mut cache = TileCache::new(Arc::clone(&map), Arc::new(loader.handle()), 1024, 768);
//!
//!     let layer = Arc::clone(map.layer_by_id("CH18").ok_or("no such layer")?);
//!     let _tile = cache.get_tile(&layer, 10, 7);
//!
//!     if let Some(event) = events.recv().await {
//!         println!("{}: {:?}", event.tile.id(), event.kind);
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod loader;
pub mod map;
pub mod store;
pub mod tile;

// Re-export commonly used types
pub use cache::{LoadHandler, TileCache, PRELOAD_MARGIN};
pub use config::{Cli, Command, PruneConfig, SeedConfig, StatusConfig};
pub use error::{FetchError, MapError, StoreError};
pub use fetch::{HttpTileFetcher, TileFetcher, DEFAULT_REFERER, DEFAULT_TIMEOUT};
pub use loader::{LoaderHandle, LoaderOptions, OrderQueue, TileLoader, DEFAULT_STALE_AFTER};
pub use map::{Layer, LayerDefinition, Map, MapDefinition};
pub use store::{
    SqliteTileStore, StoreLimits, StoredTile, TileStore, DEFAULT_EVICT_CHUNK, DEFAULT_MAX_RECORDS,
};
pub use tile::{now_millis, LayerId, LoadEvent, LoadKind, Priority, Tile, TileId, TileState};
