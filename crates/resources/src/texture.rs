//! Image loading into tightly packed RGBA8.

use std::path::Path;

use tracing::info;

use crate::error::{ResourceError, ResourceResult};

/// Decoded RGBA8 pixels, row-major, no padding.
#[derive(Clone, Debug)]
pub struct TextureData {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    pub fn load(path: &Path) -> ResourceResult<Self> {
        if !path.exists() {
            return Err(ResourceError::FileNotFound(path.to_path_buf()));
        }

        let image = image::open(path)
            .map_err(|source| ResourceError::Image {
                path: path.to_path_buf(),
                source,
            })?
            .to_rgba8();
        let (width, height) = image.dimensions();
        info!("Loaded texture {} ({}x{})", path.display(), width, height);

        Ok(Self {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            width,
            height,
            pixels: image.into_raw(),
        })
    }

    /// 1x1 opaque white, bound when a model has no albedo texture.
    pub fn white() -> Self {
        Self::solid("white", [255, 255, 255, 255])
    }

    pub fn solid(name: &str, rgba: [u8; 4]) -> Self {
        Self {
            name: name.to_string(),
            width: 1,
            height: 1,
            pixels: rgba.to_vec(),
        }
    }
}
