//! Scene components consumed by the renderer:
//! - Camera and its fixed orbit
//! - Sun light with the shadow projection fit
//! - Transforms and bounds

pub mod camera;
pub mod light;
pub mod transform;

pub use camera::{Camera, Orbit};
pub use light::SunLight;
pub use transform::{Aabb, Transform};
