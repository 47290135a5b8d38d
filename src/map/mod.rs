//! Map and layer geometry.
//!
//! A [`Map`] is an ordered stack of [`Layer`]s covering the same area at
//! increasing resolution. Layers know their tile grid bounds, their tile URL
//! template, and the scale range they should be displayed at. Maps are built
//! from a [`MapDefinition`], either the built-in one or one loaded from JSON.

mod layer;
mod map;

pub use layer::{Layer, LayerDefinition};
pub use map::{Map, MapDefinition};
