//! RHI-specific error types.

use thiserror::Error;

use crate::barrier::ResourceState;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// Failed to load Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// The allocator mutex was poisoned by a panicking thread
    #[error("Allocator lock poisoned")]
    AllocatorPoisoned,

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// No depth format with the required usage is supported
    #[error("No supported depth format among {0:?}")]
    NoDepthFormat(Vec<ash::vk::Format>),

    /// Shader loading error
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Surface creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Invalid handle or argument
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// A state pair absent from the transition table was requested
    #[error("Unsupported resource transition {from:?} -> {to:?} for '{resource}'")]
    UnsupportedTransition {
        resource: String,
        from: ResourceState,
        to: ResourceState,
    },

    /// A registry slot was used before a resource was added to it
    #[error("Resource '{0}' was never registered")]
    ResourceNotRegistered(String),

    /// A pass was drawn before init or after cleanup
    #[error("Pass '{0}' is not initialized")]
    PassNotInitialized(&'static str),

    /// The validation layer reported one or more errors
    #[error("Validation layer reported {count} error(s), last: {last}")]
    ValidationFailed { count: u32, last: String },
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
