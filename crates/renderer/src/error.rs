//! Errors surfaced while building the renderer.

use thiserror::Error;

use deferred_resources::ResourceError;
use deferred_rhi::RhiError;

/// Startup failures. Per-frame work reports [`RhiError`] directly.
#[derive(Error, Debug)]
pub enum RendererError {
    #[error(transparent)]
    Rhi(#[from] RhiError),

    #[error("Asset loading failed: {0}")]
    Resource(#[from] ResourceError),

    #[error("Platform error: {0}")]
    Platform(#[from] deferred_core::Error),
}

pub type RendererResult<T> = Result<T, RendererError>;
