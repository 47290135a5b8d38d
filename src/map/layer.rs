use serde::Deserialize;

use crate::tile::LayerId;

fn default_tile_size() -> u32 {
    256
}

/// Declarative description of one layer, as found in a map definition file.
///
/// Tile grid bounds are given as the URL indexes of the four corner tiles.
/// This keeps definitions in the numbering scheme of the tile server: grids
/// whose URL indexes run right-to-left or bottom-to-top are expressed by
/// swapping the corner values, and the layer translates grid coordinates
/// accordingly when building URLs.
#[derive(Debug, Clone, Deserialize)]
pub struct LayerDefinition {
    /// Layer identity, also the key tiles are stored under
    pub id: String,

    /// Value substituted for `{layer}` in the URL template
    pub url_name: String,

    /// Tile URL template with `{layer}`, `{x}` and `{y}` placeholders
    pub url_template: String,

    /// Ground resolution of this layer
    pub meters_per_pixel: f32,

    /// Tile width in pixels
    #[serde(default = "default_tile_size")]
    pub tile_size_x: u32,

    /// Tile height in pixels
    #[serde(default = "default_tile_size")]
    pub tile_size_y: u32,

    /// URL index of the leftmost tile column
    #[serde(default)]
    pub left_tile: i32,

    /// URL index of the topmost tile row
    #[serde(default)]
    pub top_tile: i32,

    /// URL index of the rightmost tile column
    pub right_tile: i32,

    /// URL index of the bottommost tile row
    pub bottom_tile: i32,
}

/// One resolution level of a [`crate::map::Map`].
///
/// Grid coordinates are always 0-indexed from the top-left corner regardless
/// of the server's URL numbering; [`Layer::tile_url`] translates. The scale
/// validity range is assigned by the map at construction.
#[derive(Debug)]
pub struct Layer {
    id: LayerId,
    url_name: String,
    url_template: String,
    meters_per_pixel: f32,
    tile_size_x: u32,
    tile_size_y: u32,
    left_tile: i32,
    top_tile: i32,
    right_tile: i32,
    bottom_tile: i32,
    tiles_x: u32,
    tiles_y: u32,
    min_scale: f32,
    max_scale: f32,
    index: usize,
}

impl Layer {
    pub(crate) fn from_definition(
        def: &LayerDefinition,
        index: usize,
        min_scale: f32,
        max_scale: f32,
    ) -> Self {
        let tiles_x = def.left_tile.abs_diff(def.right_tile) + 1;
        let tiles_y = def.top_tile.abs_diff(def.bottom_tile) + 1;
        Self {
            id: def.id.as_str().into(),
            url_name: def.url_name.clone(),
            url_template: def.url_template.clone(),
            meters_per_pixel: def.meters_per_pixel,
            tile_size_x: def.tile_size_x,
            tile_size_y: def.tile_size_y,
            left_tile: def.left_tile,
            top_tile: def.top_tile,
            right_tile: def.right_tile,
            bottom_tile: def.bottom_tile,
            tiles_x,
            tiles_y,
            min_scale,
            max_scale,
            index,
        }
    }

    /// Layer identity.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Layer identity as the interned id used in tile keys.
    pub fn id_arc(&self) -> LayerId {
        LayerId::clone(&self.id)
    }

    /// Position of this layer in its map, coarsest first.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Ground resolution of this layer.
    pub fn meters_per_pixel(&self) -> f32 {
        self.meters_per_pixel
    }

    /// Tile width in pixels.
    pub fn tile_size_x(&self) -> u32 {
        self.tile_size_x
    }

    /// Tile height in pixels.
    pub fn tile_size_y(&self) -> u32 {
        self.tile_size_y
    }

    /// Number of tile columns.
    pub fn tiles_x(&self) -> u32 {
        self.tiles_x
    }

    /// Number of tile rows.
    pub fn tiles_y(&self) -> u32 {
        self.tiles_y
    }

    /// Smallest scale this layer should be displayed at.
    pub fn min_scale(&self) -> f32 {
        self.min_scale
    }

    /// Largest scale this layer should be displayed at.
    pub fn max_scale(&self) -> f32 {
        self.max_scale
    }

    /// Whether `scale` falls into this layer's validity range.
    pub fn matches_scale(&self, scale: f32) -> bool {
        scale >= self.min_scale && scale <= self.max_scale
    }

    /// Whether `(x, y)` lies inside this layer's tile grid.
    pub fn has_tile(&self, x: u32, y: u32) -> bool {
        x < self.tiles_x && y < self.tiles_y
    }

    /// Build the URL for tile `(x, y)` from the layer's template.
    ///
    /// Pure string substitution; the coordinates are translated into the
    /// server's URL numbering first.
    pub fn tile_url(&self, x: u32, y: u32) -> String {
        self.url_template
            .replace("{layer}", &self.url_name)
            .replace("{x}", &self.url_x(x).to_string())
            .replace("{y}", &self.url_y(y).to_string())
    }

    pub(crate) fn url_template(&self) -> &str {
        &self.url_template
    }

    fn url_x(&self, x: u32) -> i64 {
        if self.left_tile < self.right_tile {
            self.left_tile as i64 + x as i64
        } else {
            self.left_tile as i64 - x as i64
        }
    }

    fn url_y(&self, y: u32) -> i64 {
        if self.top_tile < self.bottom_tile {
            self.top_tile as i64 + y as i64
        } else {
            self.top_tile as i64 - y as i64
        }
    }
}

#[cfg(test)]
impl Layer {
    /// Bare layer for unit tests that do not need a full map.
    pub(crate) fn for_tests(id: &str, tiles_x: u32, tiles_y: u32) -> Self {
        Self {
            id: id.into(),
            url_name: id.to_string(),
            url_template: "https://tiles.test/{layer}/{y}/{x}.png".to_string(),
            meters_per_pixel: 1.0,
            tile_size_x: 256,
            tile_size_y: 256,
            left_tile: 0,
            top_tile: 0,
            right_tile: tiles_x.saturating_sub(1) as i32,
            bottom_tile: tiles_y.saturating_sub(1) as i32,
            tiles_x,
            tiles_y,
            min_scale: 0.5,
            max_scale: 2.0,
            index: 0,
        }
    }
}
