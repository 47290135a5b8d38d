//! In-memory tile cache.
//!
//! One fixed-size grid per layer, sized once from the viewport so the visible
//! rectangle plus the preload margin always fits. A tile `(x, y)` lives in
//! slot `(x mod size_x, y mod size_y)`; walking off the viewed region reuses
//! the slots of tiles that scrolled out the other side, so eviction is purely
//! by slot collision. Recency plays no part.
//!
//! The cache never loads anything itself. Slots are filled with `Pending`
//! tiles and handed to a [`LoadHandler`]; cancellations flow through the same
//! seam when a slot is reused or a preload narrows the region of interest.
//!
//! All methods take `&mut self`: the cache belongs to the orchestration
//! thread, tiles themselves are the shared objects.

use std::sync::Arc;

use tracing::debug;

use crate::map::{Layer, Map};
use crate::tile::{Priority, Tile};

/// Width of the preload ring around the visible rectangle, in tiles.
pub const PRELOAD_MARGIN: u32 = 1;

/// Receiver of load orders and cancellations issued by the cache.
///
/// Implemented by the loader pipeline's handle; tests substitute recording
/// fakes to observe the cache's ordering behavior.
pub trait LoadHandler: Send + Sync {
    /// A fresh `Pending` tile entered the cache and wants loading.
    fn order_load(&self, tile: Arc<Tile>, priority: Priority);

    /// The cache lost interest in an in-flight tile.
    fn cancel_load(&self, tile: &Tile);
}

struct Grid {
    size_x: u32,
    size_y: u32,
    slots: Vec<Option<Arc<Tile>>>,
}

impl Grid {
    fn slot_index(&self, x: u32, y: u32) -> usize {
        let sx = (x % self.size_x) as usize;
        let sy = (y % self.size_y) as usize;
        sy * self.size_x as usize + sx
    }
}

/// Bounded in-memory cache of the tiles around the viewed region.
pub struct TileCache {
    map: Arc<Map>,
    handler: Arc<dyn LoadHandler>,
    grids: Vec<Grid>,
    margin: u32,
}

impl TileCache {
    /// Create a cache for `map` sized to a viewport of
    /// `view_width` x `view_height` pixels, with the default preload margin.
    pub fn new(
        map: Arc<Map>,
        handler: Arc<dyn LoadHandler>,
        view_width: u32,
        view_height: u32,
    ) -> Self {
        Self::with_margin(map, handler, PRELOAD_MARGIN, view_width, view_height)
    }

    /// Create a cache with an explicit preload margin.
    ///
    /// Each layer's grid covers the tiles the viewport can show at the
    /// layer's smallest display scale, plus the margin on every side and one
    /// extra tile per axis for partial overlap, clamped to the layer's actual
    /// tile counts.
    pub fn with_margin(
        map: Arc<Map>,
        handler: Arc<dyn LoadHandler>,
        margin: u32,
        view_width: u32,
        view_height: u32,
    ) -> Self {
        let grids = map
            .layers()
            .iter()
            .map(|layer| {
                let size_x = grid_span(view_width, layer.tile_size_x(), layer.min_scale(), margin)
                    .min(layer.tiles_x());
                let size_y = grid_span(view_height, layer.tile_size_y(), layer.min_scale(), margin)
                    .min(layer.tiles_y());
                debug!(layer = %layer.id(), size_x, size_y, "created tile grid");
                Grid {
                    size_x,
                    size_y,
                    slots: vec![None; size_x as usize * size_y as usize],
                }
            })
            .collect();

        Self {
            map,
            handler,
            grids,
            margin,
        }
    }

    /// The map this cache serves.
    pub fn map(&self) -> &Arc<Map> {
        &self.map
    }

    /// Look up the tile `(x, y)` of `layer`, ordering a load if needed.
    ///
    /// Returns `None` when the layer does not belong to this cache's map or
    /// the coordinates lie outside the layer's grid; no load is ordered then.
    /// A matching occupant is returned in whatever state it is in. A slot
    /// held by a different tile is reused: the occupant is cancelled if still
    /// in flight, and a fresh `Pending` tile takes the slot and is ordered at
    /// high priority.
    pub fn get_tile(&mut self, layer: &Arc<Layer>, x: u32, y: u32) -> Option<Arc<Tile>> {
        if !self.is_own_layer(layer) || !layer.has_tile(x, y) {
            return None;
        }

        let grid = &mut self.grids[layer.index()];
        let slot = grid.slot_index(x, y);

        if let Some(existing) = &grid.slots[slot] {
            if existing.x() == x && existing.y() == y {
                return Some(Arc::clone(existing));
            }
            if existing.is_in_flight() {
                self.handler.cancel_load(existing);
            }
        }

        let tile = Arc::new(Tile::new(Arc::clone(layer), x, y));
        grid.slots[slot] = Some(Arc::clone(&tile));
        self.handler.order_load(Arc::clone(&tile), Priority::High);
        Some(tile)
    }

    /// Focus loading on the rectangle `min_x..=max_x` x `min_y..=max_y` of
    /// `layer`.
    ///
    /// First cancels every in-flight tile the region no longer wants: all of
    /// other layers, and those of `layer` outside the rectangle. Then orders
    /// the rectangle's tiles, then the surrounding preload ring, so the
    /// visible tiles sit ahead of the ring in the loader's FIFO order.
    pub fn preload_region(
        &mut self,
        layer: &Arc<Layer>,
        min_x: u32,
        max_x: u32,
        min_y: u32,
        max_y: u32,
    ) {
        if !self.is_own_layer(layer) {
            return;
        }

        debug!(
            layer = %layer.id(),
            min_x, max_x, min_y, max_y,
            "preloading region"
        );

        let layer_index = layer.index();
        for (index, grid) in self.grids.iter_mut().enumerate() {
            let same_layer = index == layer_index;
            for slot in grid.slots.iter_mut() {
                let cancel = match slot {
                    Some(tile) if tile.is_in_flight() => {
                        let outside = tile.x() < min_x
                            || tile.x() > max_x
                            || tile.y() < min_y
                            || tile.y() > max_y;
                        !same_layer || outside
                    }
                    _ => false,
                };
                if cancel {
                    if let Some(tile) = slot.take() {
                        self.handler.cancel_load(&tile);
                    }
                }
            }
        }

        for y in min_y..=max_y {
            for x in min_x..=max_x {
                self.get_tile(layer, x, y);
            }
        }

        let margin = self.margin as i64;
        let (min_x, max_x) = (min_x as i64, max_x as i64);
        let (min_y, max_y) = (min_y as i64, max_y as i64);
        for y in (min_y - margin)..=(max_y + margin) {
            if y < min_y || y > max_y {
                for x in (min_x - margin)..=(max_x + margin) {
                    self.preload_probe(layer, x, y);
                }
            } else {
                for x in (min_x - margin)..min_x {
                    self.preload_probe(layer, x, y);
                }
                for x in (max_x + 1)..=(max_x + margin) {
                    self.preload_probe(layer, x, y);
                }
            }
        }
    }

    /// Order a failed tile again.
    ///
    /// If the slot holds the matching tile in the `Failed` state it is reset
    /// to `Pending` and re-ordered at high priority. In every other case this
    /// behaves exactly like [`TileCache::get_tile`].
    pub fn retry(&mut self, layer: &Arc<Layer>, x: u32, y: u32) -> Option<Arc<Tile>> {
        if !self.is_own_layer(layer) || !layer.has_tile(x, y) {
            return None;
        }

        let grid = &mut self.grids[layer.index()];
        let slot = grid.slot_index(x, y);

        if let Some(existing) = &grid.slots[slot] {
            if existing.x() == x && existing.y() == y {
                if existing.is_failed() {
                    existing.reset_pending();
                    self.handler
                        .order_load(Arc::clone(existing), Priority::High);
                }
                return Some(Arc::clone(existing));
            }
        }

        self.get_tile(layer, x, y)
    }

    fn preload_probe(&mut self, layer: &Arc<Layer>, x: i64, y: i64) {
        // the ring may reach past the grid edges
        if (0..=u32::MAX as i64).contains(&x) && (0..=u32::MAX as i64).contains(&y) {
            self.get_tile(layer, x as u32, y as u32);
        }
    }

    fn is_own_layer(&self, layer: &Arc<Layer>) -> bool {
        self.map
            .layer(layer.index())
            .is_some_and(|own| Arc::ptr_eq(own, layer))
    }
}

fn grid_span(view_pixels: u32, tile_pixels: u32, min_scale: f32, margin: u32) -> u32 {
    // the float cast saturates to u32::MAX for tiny scales
    let span = ((1.0 / min_scale) * view_pixels as f32 / tile_pixels as f32) as u32;
    span.saturating_add(2 * margin + 2)
}
