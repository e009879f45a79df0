//! Error types for asset loading.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("Failed to load glTF file '{path}': {message}")]
    GltfLoad { path: PathBuf, message: String },

    #[error("glTF file '{0}' contains no meshes")]
    NoMeshes(PathBuf),

    #[error("Mesh primitive {primitive} of mesh {mesh} has no position data")]
    NoPositionData { mesh: usize, primitive: usize },

    #[error("Failed to load image '{path}': {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ResourceResult<T> = Result<T, ResourceError>;
