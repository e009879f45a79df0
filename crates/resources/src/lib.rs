//! Asset loading for the deferred renderer.
//!
//! Produces CPU-side data only; GPU upload happens in the renderer.
//! - glTF models merged into one vertex/index set with per-range materials
//! - RGBA8 textures
//! - Procedural fallback geometry

mod error;

pub mod material;
pub mod model;
pub mod primitives;
pub mod texture;

pub use error::{ResourceError, ResourceResult};
pub use material::{Material, MaterialRecord};
pub use model::{MeshRange, ModelData};
pub use texture::TextureData;
