use std::sync::Arc;

use serde::Deserialize;
use url::Url;

use crate::error::MapError;
use crate::map::layer::{Layer, LayerDefinition};

/// Declarative description of a map, deserializable from JSON.
///
/// Scale thresholds control when the display switches between layers: within
/// the stack a layer is valid from `min_scale_threshold` up to
/// `max_scale_threshold` times the resolution ratio to the next finer layer;
/// the coarsest layer opens at `min_scale` and the finest closes at
/// `max_scale`.
#[derive(Debug, Clone, Deserialize)]
pub struct MapDefinition {
    /// Map name, informational only
    pub name: String,

    /// Smallest scale of the coarsest layer
    pub min_scale: f32,

    /// Largest scale of the finest layer
    pub max_scale: f32,

    /// Lower validity bound of every non-coarsest layer
    pub min_scale_threshold: f32,

    /// Factor for the upper validity bound between adjacent layers
    pub max_scale_threshold: f32,

    /// Layers ordered coarsest to finest
    pub layers: Vec<LayerDefinition>,
}

impl MapDefinition {
    /// The built-in national pyramid: eight layers from 250 m/px down to
    /// 1 m/px, 256 px tiles.
    pub fn swisstopo() -> Self {
        const TEMPLATE: &str =
            "https://wmts.geo.admin.ch/1.0.0/ch.swisstopo.pixelkarte-farbe/default/20140106/21781/{layer}/{y}/{x}.jpeg";

        let layer = |id: &str, url_name: &str, mpp: f32, right: i32, bottom: i32| LayerDefinition {
            id: id.to_string(),
            url_name: url_name.to_string(),
            url_template: TEMPLATE.to_string(),
            meters_per_pixel: mpp,
            tile_size_x: 256,
            tile_size_y: 256,
            left_tile: 0,
            top_tile: 0,
            right_tile: right,
            bottom_tile: bottom,
        };

        Self {
            name: "CH".to_string(),
            min_scale: 0.5,
            max_scale: 10.0,
            min_scale_threshold: 1.5,
            max_scale_threshold: 1.5,
            layers: vec![
                layer("CH16", "16", 250.0, 7, 4),
                layer("CH17", "17", 100.0, 18, 12),
                layer("CH18", "18", 50.0, 37, 24),
                layer("CH19", "19", 20.0, 93, 62),
                layer("CH20", "20", 10.0, 187, 124),
                layer("CH21", "21", 5.0, 374, 249),
                layer("CH23", "23", 2.0, 937, 624),
                layer("CH25", "25", 1.0, 1875, 1249),
            ],
        }
    }
}

/// An ordered stack of layers covering the same area, coarsest first.
#[derive(Debug)]
pub struct Map {
    name: String,
    layers: Vec<Arc<Layer>>,
}

impl Map {
    /// Build a map from its definition.
    ///
    /// Assigns layer indexes and scale validity ranges, and validates each
    /// layer's geometry and URL template.
    ///
    /// # Errors
    ///
    /// Returns [`MapError`] if the definition has no layers, a layer declares
    /// an empty grid, zero-sized tiles or a scale range that is not positive
    /// and finite, or a URL template does not produce a parseable URL.
    pub fn from_definition(def: &MapDefinition) -> Result<Self, MapError> {
        if def.layers.is_empty() {
            return Err(MapError::Empty(def.name.clone()));
        }

        let count = def.layers.len();
        let mut scales = Vec::with_capacity(count);
        for i in 0..count {
            if i + 1 < count {
                let ratio =
                    def.layers[i].meters_per_pixel / def.layers[i + 1].meters_per_pixel;
                scales.push((def.min_scale_threshold, def.max_scale_threshold * ratio));
            } else {
                scales.push((def.min_scale_threshold, def.max_scale));
            }
        }
        scales[0].0 = def.min_scale;

        let mut layers = Vec::with_capacity(count);
        for (index, layer_def) in def.layers.iter().enumerate() {
            let (min_scale, max_scale) = scales[index];
            let layer = Layer::from_definition(layer_def, index, min_scale, max_scale);
            validate_layer(&layer)?;
            layers.push(Arc::new(layer));
        }

        Ok(Self {
            name: def.name.clone(),
            layers,
        })
    }

    /// Map name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of layers.
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Layer at `index`, coarsest first.
    pub fn layer(&self, index: usize) -> Option<&Arc<Layer>> {
        self.layers.get(index)
    }

    /// Layer with the given identity.
    pub fn layer_by_id(&self, id: &str) -> Option<&Arc<Layer>> {
        self.layers.iter().find(|layer| layer.id() == id)
    }

    /// All layers, coarsest first.
    pub fn layers(&self) -> &[Arc<Layer>] {
        &self.layers
    }

    /// Pick the layer to display at a view resolution of `meters_per_pixel`.
    ///
    /// The current layer wins while its validity range still contains the
    /// resulting scale; otherwise the coarsest matching layer is returned.
    /// If no layer matches at all the current one is kept.
    pub fn matching_layer(&self, current: &Arc<Layer>, meters_per_pixel: f32) -> Arc<Layer> {
        let scale = current.meters_per_pixel() / meters_per_pixel;
        if current.matches_scale(scale) {
            return Arc::clone(current);
        }

        for layer in &self.layers {
            let scale = layer.meters_per_pixel() / meters_per_pixel;
            if layer.matches_scale(scale) {
                return Arc::clone(layer);
            }
        }

        Arc::clone(current)
    }
}

fn validate_layer(layer: &Layer) -> Result<(), MapError> {
    let positive = |v: f32| v.is_finite() && v > 0.0;
    if layer.tile_size_x() == 0 || layer.tile_size_y() == 0 {
        return Err(MapError::InvalidGeometry {
            layer: layer.id().to_string(),
            message: "tile size must be positive".to_string(),
        });
    }
    if layer.tiles_x() == 0 || layer.tiles_y() == 0 {
        return Err(MapError::InvalidGeometry {
            layer: layer.id().to_string(),
            message: "tile grid must not be empty".to_string(),
        });
    }
    if !positive(layer.meters_per_pixel()) {
        return Err(MapError::InvalidGeometry {
            layer: layer.id().to_string(),
            message: "meters per pixel must be positive and finite".to_string(),
        });
    }
    if !positive(layer.min_scale()) || !positive(layer.max_scale()) {
        return Err(MapError::InvalidGeometry {
            layer: layer.id().to_string(),
            message: "scale range must be positive and finite".to_string(),
        });
    }
    if !layer.url_template().contains("{x}") || !layer.url_template().contains("{y}") {
        return Err(MapError::InvalidGeometry {
            layer: layer.id().to_string(),
            message: "URL template must contain {x} and {y}".to_string(),
        });
    }
    let probe = layer.tile_url(0, 0);
    Url::parse(&probe).map_err(|source| MapError::InvalidUrlTemplate {
        layer: layer.id().to_string(),
        source,
    })?;
    Ok(())
}
