//! Tile identity and lifecycle.
//!
//! A tile is one image in a layer's grid, addressed by `(layer, x, y)`.
//! Every occupancy of a cache slot is a fresh [`Tile`] shared as `Arc<Tile>`
//! between the cache, the loader queues, and the renderer.
//!
//! # States
//!
//! ```text
//! Pending ──▶ Loading ──▶ Ready { image, last_used }
//!                   └────▶ Failed
//! ```
//!
//! `Pending` means the tile sits in a loader queue. `Loading` means a worker
//! picked it up. `Ready` and `Failed` are terminal until the tile is evicted
//! or explicitly retried.
//!
//! # Cancellation
//!
//! Each tile carries its own cancellation token. Cancelling never removes the
//! tile from a queue; workers skip cancelled tiles at dequeue time and check
//! the token again before applying a completed result, so a cancelled tile
//! can neither start loading nor publish a stale state.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use image::DynamicImage;

use crate::map::Layer;

/// Interned layer identifier, cheap to clone and hash.
pub type LayerId = Arc<str>;

/// Current time as milliseconds since the Unix epoch.
///
/// Timestamps drive the persistent store's LRU ordering. A clock before the
/// epoch degrades to 0 instead of panicking.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// =============================================================================
// Identity
// =============================================================================

/// Unique identity of a tile: the layer it belongs to plus grid coordinates.
///
/// This is the key of the persistent store and the equality the in-memory
/// cache compares slot occupants by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileId {
    /// Identifier of the owning layer
    pub layer: LayerId,

    /// Tile column, 0-indexed from the left edge of the layer
    pub x: u32,

    /// Tile row, 0-indexed from the top edge of the layer
    pub y: u32,
}

impl TileId {
    /// Create a new tile identity.
    pub fn new(layer: impl Into<LayerId>, x: u32, y: u32) -> Self {
        Self {
            layer: layer.into(),
            x,
            y,
        }
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.layer, self.x, self.y)
    }
}

// =============================================================================
// State
// =============================================================================

/// Lifecycle state of a tile.
#[derive(Debug, Clone)]
pub enum TileState {
    /// Ordered but not yet picked up by a loader worker
    Pending,

    /// A loader worker is resolving this tile
    Loading,

    /// Image is available for rendering
    Ready {
        /// Decoded pixels, shared with the renderer
        image: Arc<DynamicImage>,

        /// Epoch milliseconds of the last load or store access
        last_used: u64,
    },

    /// Both loader stages failed; stays failed until retried
    Failed,
}

impl TileState {
    /// Short name for log fields.
    pub fn name(&self) -> &'static str {
        match self {
            TileState::Pending => "pending",
            TileState::Loading => "loading",
            TileState::Ready { .. } => "ready",
            TileState::Failed => "failed",
        }
    }
}

// =============================================================================
// Tile
// =============================================================================

/// A tile shared between the cache, the loader pipeline, and the renderer.
///
/// Identity and layer are immutable; the state sits behind its own mutex so
/// loader workers can transition it without touching the cache, and the
/// cancellation token is a plain atomic readable from any stage.
pub struct Tile {
    layer: Arc<Layer>,
    id: TileId,
    state: Mutex<TileState>,
    cancelled: AtomicBool,
}

impl Tile {
    /// Create a tile in the `Pending` state.
    pub fn new(layer: Arc<Layer>, x: u32, y: u32) -> Self {
        let id = TileId::new(layer.id_arc(), x, y);
        Self {
            layer,
            id,
            state: Mutex::new(TileState::Pending),
            cancelled: AtomicBool::new(false),
        }
    }

    /// The tile's identity.
    pub fn id(&self) -> &TileId {
        &self.id
    }

    /// The layer this tile belongs to.
    pub fn layer(&self) -> &Arc<Layer> {
        &self.layer
    }

    /// Tile column within the layer.
    pub fn x(&self) -> u32 {
        self.id.x
    }

    /// Tile row within the layer.
    pub fn y(&self) -> u32 {
        self.id.y
    }

    /// Snapshot of the current state. `Ready` images are `Arc`-shared, so the
    /// clone is cheap.
    pub fn state(&self) -> TileState {
        self.lock_state().clone()
    }

    /// True while the tile is `Pending` or `Loading`.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            *self.lock_state(),
            TileState::Pending | TileState::Loading
        )
    }

    /// True once the tile reached `Ready`.
    pub fn is_ready(&self) -> bool {
        matches!(*self.lock_state(), TileState::Ready { .. })
    }

    /// True once the tile reached `Failed`.
    pub fn is_failed(&self) -> bool {
        matches!(*self.lock_state(), TileState::Failed)
    }

    /// The decoded image, if the tile is `Ready`.
    pub fn image(&self) -> Option<Arc<DynamicImage>> {
        match &*self.lock_state() {
            TileState::Ready { image, .. } => Some(Arc::clone(image)),
            _ => None,
        }
    }

    /// Mark the tile as picked up by a worker.
    pub fn set_loading(&self) {
        *self.lock_state() = TileState::Loading;
    }

    /// Publish a decoded image.
    pub fn set_ready(&self, image: Arc<DynamicImage>, last_used: u64) {
        *self.lock_state() = TileState::Ready { image, last_used };
    }

    /// Mark the tile as failed.
    pub fn set_failed(&self) {
        *self.lock_state() = TileState::Failed;
    }

    /// Reset a tile to `Pending` so it can be ordered again.
    pub fn reset_pending(&self) {
        *self.lock_state() = TileState::Pending;
    }

    /// Set the cancellation token. Workers skip this tile from now on and
    /// discard any result already in flight for it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether the cancellation token is set.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TileState> {
        // The mutex only guards plain assignments; a poisoned lock means a
        // panic mid-assignment, which cannot leave a torn TileState behind.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl fmt::Debug for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tile")
            .field("id", &self.id)
            .field("state", &self.state().name())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// =============================================================================
// Priority and events
// =============================================================================

/// Scheduling class of a load order.
///
/// `High` orders always dequeue before `Low` orders; within one class orders
/// dequeue in FIFO submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Visible and preload-margin tiles requested by the renderer
    High,

    /// Bulk background loads, e.g. seeding a region for offline use
    Low,
}

/// How a finished load completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    /// Served from the persistent store
    LoadedFromStore,

    /// Fetched from the network (and persisted)
    LoadedFromNetwork,

    /// Both stages failed
    LoadFailed,
}

/// Terminal notification for one load order, delivered exactly once per
/// non-cancelled order.
#[derive(Debug, Clone)]
pub struct LoadEvent {
    /// The tile the order was for
    pub tile: Arc<Tile>,

    /// How the load completed
    pub kind: LoadKind,
}
