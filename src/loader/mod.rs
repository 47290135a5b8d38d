//! Two-stage tile loading pipeline.
//!
//! Load orders flow through two long-lived worker tasks, one per stage:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │               TileCache                 │
//! │        order_load / cancel_load         │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │        order queue (High / Low)         │
//! └────────────────────┬────────────────────┘
//!                      ▼
//! ┌─────────────────────────────────────────┐     hit
//! │           store stage task              │──────────▶ Ready
//! └────────────────────┬────────────────────┘        LoadedFromStore
//!                      │ miss
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │             network queue               │
//! └────────────────────┬────────────────────┘
//!                      ▼
//! ┌─────────────────────────────────────────┐   success   Ready + persist
//! │          network stage task             │──────────▶ LoadedFromNetwork
//! └────────────────────┬────────────────────┘
//!                      │ failure
//!                      ▼
//!              Failed + LoadFailed
//! ```
//!
//! Workers park on their queue when idle and exit on shutdown. Completion is
//! reported through an unbounded event channel, so workers never block on a
//! slow listener, and each non-cancelled order produces exactly one event.
//!
//! The pipeline owns its collaborators: the persistent store and the fetcher
//! are injected once at [`TileLoader::spawn`] and shared by both stages.

mod net_stage;
mod queue;
mod store_stage;

pub use queue::OrderQueue;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::LoadHandler;
use crate::fetch::TileFetcher;
use crate::store::{StoreLimits, TileStore};
use crate::tile::{LoadEvent, LoadKind, Priority, Tile};

/// Store records older than this get their `last_used` refreshed when read.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Tuning knobs of the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct LoaderOptions {
    /// Soft bound and eviction batch size of the persistent store
    pub limits: StoreLimits,

    /// Age after which a store hit refreshes the record's `last_used`
    pub stale_after: Duration,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            limits: StoreLimits::default(),
            stale_after: DEFAULT_STALE_AFTER,
        }
    }
}

/// State shared between the pipeline handle and its worker tasks.
pub(crate) struct PipelineShared {
    pub(crate) store_queue: OrderQueue,
    pub(crate) net_queue: OrderQueue,
    pub(crate) store: Arc<dyn TileStore>,
    pub(crate) fetcher: Arc<dyn TileFetcher>,
    pub(crate) events: mpsc::UnboundedSender<LoadEvent>,
    pub(crate) limits: StoreLimits,
    pub(crate) stale_after_ms: u64,
}

impl PipelineShared {
    /// Deliver a completion event. A dropped receiver is not an error; the
    /// listener side may already be gone during shutdown.
    pub(crate) fn emit(&self, tile: &Arc<Tile>, kind: LoadKind) {
        let _ = self.events.send(LoadEvent {
            tile: Arc::clone(tile),
            kind,
        });
    }

    /// Hand an order from the store stage to the network stage.
    pub(crate) fn forward_to_network(&self, tile: Arc<Tile>) {
        let id = tile.id().clone();
        if !self.net_queue.push(tile, Priority::High) {
            debug!(tile = %id, "dropping order, network queue is shut down");
        }
    }
}

/// The two-stage tile loading pipeline.
///
/// Spawning starts both worker tasks. Orders arrive through a
/// [`LoaderHandle`]; completions leave through the event receiver returned by
/// [`TileLoader::spawn`]. The pipeline stops permanently on
/// [`TileLoader::shutdown`] or when the loader is dropped.
pub struct TileLoader {
    shared: Arc<PipelineShared>,
}

impl TileLoader {
    /// Start the pipeline on the current tokio runtime.
    ///
    /// Returns the loader and the receiving end of the completion events.
    pub fn spawn(
        store: Arc<dyn TileStore>,
        fetcher: Arc<dyn TileFetcher>,
        options: LoaderOptions,
    ) -> (Self, mpsc::UnboundedReceiver<LoadEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(PipelineShared {
            store_queue: OrderQueue::new(),
            net_queue: OrderQueue::new(),
            store,
            fetcher,
            events,
            limits: options.limits,
            stale_after_ms: options.stale_after.as_millis() as u64,
        });

        tokio::spawn(store_stage::run(Arc::clone(&shared)));
        tokio::spawn(net_stage::run(Arc::clone(&shared)));
        info!("tile loader started");

        (Self { shared }, receiver)
    }

    /// A cloneable handle for ordering and cancelling loads.
    pub fn handle(&self) -> LoaderHandle {
        LoaderHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Hold back all queued orders. In-flight loads still complete.
    pub fn pause(&self) {
        self.shared.store_queue.pause();
        self.shared.net_queue.pause();
        info!("tile loader paused");
    }

    /// Resume delivery of queued orders.
    pub fn resume(&self) {
        self.shared.store_queue.resume();
        self.shared.net_queue.resume();
        info!("tile loader resumed");
    }

    /// Stop the pipeline permanently. Queued orders are dropped, both worker
    /// tasks exit, and further orders are rejected.
    pub fn shutdown(&self) {
        self.shared.store_queue.shutdown();
        self.shared.net_queue.shutdown();
        info!("tile loader shut down");
    }
}

impl Drop for TileLoader {
    fn drop(&mut self) {
        self.shared.store_queue.shutdown();
        self.shared.net_queue.shutdown();
    }
}

/// Order entry point of the pipeline, the loader side of [`LoadHandler`].
#[derive(Clone)]
pub struct LoaderHandle {
    shared: Arc<PipelineShared>,
}

impl LoadHandler for LoaderHandle {
    fn order_load(&self, tile: Arc<Tile>, priority: Priority) {
        let id = tile.id().clone();
        if !self.shared.store_queue.push(tile, priority) {
            warn!(tile = %id, "load ordered after shutdown");
        }
    }

    fn cancel_load(&self, tile: &Tile) {
        tile.cancel();
    }
}
