//! Persistent tile store.
//!
//! Tiles fetched from the network are kept in a SQLite database so already
//! visited regions render without connectivity. The store is soft-bounded:
//! before a fresh insert would grow the database past the configured maximum,
//! a batch of the least recently used records is evicted.
//!
//! [`TileStore`] is the seam the loader pipeline works against; the one real
//! implementation is [`SqliteTileStore`]. The pipeline owns its store as an
//! injected `Arc<dyn TileStore>`, so tests substitute their own.

mod sqlite;

pub use sqlite::SqliteTileStore;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::error::StoreError;
use crate::tile::TileId;

/// Default soft bound on the number of stored tiles.
pub const DEFAULT_MAX_RECORDS: u64 = 10_000;

/// Default number of records evicted in one batch.
pub const DEFAULT_EVICT_CHUNK: u32 = 25;

/// Soft bound and eviction batch size of a store.
#[derive(Debug, Clone, Copy)]
pub struct StoreLimits {
    /// Record count above which an insert evicts first
    pub max_records: u64,

    /// Number of least recently used records removed per eviction
    pub evict_chunk: u32,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_records: DEFAULT_MAX_RECORDS,
            evict_chunk: DEFAULT_EVICT_CHUNK,
        }
    }
}

/// One stored tile record.
#[derive(Debug, Clone)]
pub struct StoredTile {
    /// Epoch milliseconds of the last insert, update or refresh
    pub last_used: u64,

    /// Encoded image bytes exactly as fetched
    pub image: Bytes,
}

/// Persistent key-value store for encoded tiles, keyed by [`TileId`].
#[async_trait]
pub trait TileStore: Send + Sync {
    /// Whether a record exists for `id`.
    async fn exists(&self, id: &TileId) -> Result<bool, StoreError>;

    /// Read the record for `id`, if any.
    async fn read(&self, id: &TileId) -> Result<Option<StoredTile>, StoreError>;

    /// Insert a new record. The key must not be present yet.
    async fn insert(&self, id: &TileId, last_used: u64, image: Bytes) -> Result<(), StoreError>;

    /// Replace the image and timestamp of an existing record.
    async fn update_image(
        &self,
        id: &TileId,
        last_used: u64,
        image: Bytes,
    ) -> Result<(), StoreError>;

    /// Refresh only the timestamp of an existing record.
    async fn update_last_used(&self, id: &TileId, last_used: u64) -> Result<(), StoreError>;

    /// Delete up to `count` records, globally oldest `last_used` first.
    /// Ties are broken by key so repeated runs delete in a stable order.
    /// Returns the number of records deleted.
    async fn delete_least_recently_used(&self, count: u32) -> Result<u32, StoreError>;

    /// Number of stored records.
    async fn count(&self) -> Result<u64, StoreError>;

    /// Insert a record or refresh an existing one.
    ///
    /// A fresh insert first evicts a batch of the least recently used records
    /// when the store is over its soft bound, so the bound is enforced in
    /// chunks rather than per record.
    async fn insert_or_update(
        &self,
        id: &TileId,
        last_used: u64,
        image: Bytes,
        limits: StoreLimits,
    ) -> Result<(), StoreError> {
        if self.exists(id).await? {
            return self.update_image(id, last_used, image).await;
        }

        if self.count().await? > limits.max_records {
            let deleted = self.delete_least_recently_used(limits.evict_chunk).await?;
            debug!(deleted, "evicted least recently used tiles");
        }

        self.insert(id, last_used, image).await
    }
}
