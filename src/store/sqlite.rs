//! SQLite-backed tile store.
//!
//! One `tiles` table keyed by `(layer_id, x, y)` plus an index on `last_used`
//! so batched LRU eviction does not scan. Connections come from an r2d2 pool;
//! every query runs on the blocking thread pool to keep loader workers
//! responsive.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use r2d2::Pool;
use r2d2_sqlite::rusqlite::{params, Connection, OptionalExtension};
use r2d2_sqlite::SqliteConnectionManager;
use tokio::task;
use tracing::info;

use crate::error::StoreError;
use crate::store::{StoredTile, TileStore};
use crate::tile::TileId;

const POOL_SIZE: u32 = 4;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS tiles (
        layer_id  TEXT    NOT NULL,
        x         INTEGER NOT NULL,
        y         INTEGER NOT NULL,
        last_used INTEGER NOT NULL,
        image     BLOB    NOT NULL,
        PRIMARY KEY (layer_id, x, y)
    );
    CREATE INDEX IF NOT EXISTS tiles_last_used ON tiles (last_used);
";

/// Tile store backed by a SQLite database file.
pub struct SqliteTileStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteTileStore {
    /// Open or create the database at `path`.
    ///
    /// The schema is created if missing. Concurrent access is left to
    /// SQLite's own locking with a busy timeout.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the database cannot be opened or the schema
    /// cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let manager = SqliteConnectionManager::file(path)
            .with_init(|conn| conn.busy_timeout(BUSY_TIMEOUT));
        let store = Self::build(manager, POOL_SIZE)?;
        info!(path = %path.display(), "opened tile store");
        Ok(store)
    }

    /// Open a fresh in-memory database.
    ///
    /// The pool is pinned to a single connection: each in-memory connection
    /// would otherwise see its own private database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::build(SqliteConnectionManager::memory(), 1)
    }

    fn build(manager: SqliteConnectionManager, max_size: u32) -> Result<Self, StoreError> {
        let pool = Pool::builder().max_size(max_size).build(manager)?;
        pool.get()?.execute_batch(SCHEMA)?;
        Ok(Self { pool })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await?
    }
}

#[async_trait]
impl TileStore for SqliteTileStore {
    async fn exists(&self, id: &TileId) -> Result<bool, StoreError> {
        let id = id.clone();
        self.with_conn(move |conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM tiles WHERE layer_id = ?1 AND x = ?2 AND y = ?3",
                    params![id.layer.as_ref(), id.x, id.y],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn read(&self, id: &TileId) -> Result<Option<StoredTile>, StoreError> {
        let id = id.clone();
        self.with_conn(move |conn| {
            let record = conn
                .query_row(
                    "SELECT last_used, image FROM tiles
                     WHERE layer_id = ?1 AND x = ?2 AND y = ?3",
                    params![id.layer.as_ref(), id.x, id.y],
                    |row| {
                        let last_used: i64 = row.get(0)?;
                        let image: Vec<u8> = row.get(1)?;
                        Ok(StoredTile {
                            last_used: last_used as u64,
                            image: Bytes::from(image),
                        })
                    },
                )
                .optional()?;
            Ok(record)
        })
        .await
    }

    async fn insert(&self, id: &TileId, last_used: u64, image: Bytes) -> Result<(), StoreError> {
        let id = id.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO tiles (layer_id, x, y, last_used, image)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id.layer.as_ref(), id.x, id.y, last_used as i64, image.as_ref()],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_image(
        &self,
        id: &TileId,
        last_used: u64,
        image: Bytes,
    ) -> Result<(), StoreError> {
        let id = id.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE tiles SET last_used = ?4, image = ?5
                 WHERE layer_id = ?1 AND x = ?2 AND y = ?3",
                params![id.layer.as_ref(), id.x, id.y, last_used as i64, image.as_ref()],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_last_used(&self, id: &TileId, last_used: u64) -> Result<(), StoreError> {
        let id = id.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE tiles SET last_used = ?4
                 WHERE layer_id = ?1 AND x = ?2 AND y = ?3",
                params![id.layer.as_ref(), id.x, id.y, last_used as i64],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_least_recently_used(&self, count: u32) -> Result<u32, StoreError> {
        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM tiles WHERE rowid IN (
                     SELECT rowid FROM tiles
                     ORDER BY last_used, layer_id, x, y
                     LIMIT ?1
                 )",
                params![count],
            )?;
            Ok(deleted as u32)
        })
        .await
    }

    async fn count(&self) -> Result<u64, StoreError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM tiles", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }
}
