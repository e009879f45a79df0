//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! Thin RAII wrappers over `ash` for the deferred renderer:
//! - Instance, device and queue selection (with validation escalation)
//! - Swapchain selection policy, acquisition and presentation
//! - Command buffers with debug labels and one-shot submits
//! - Buffers, images and samplers backed by `gpu-allocator`
//! - The resource state table and barrier recording
//! - Descriptor layouts/pools and graphics pipelines for dynamic rendering
//! - Frame synchronization primitives

mod error;

pub mod barrier;
pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod rendering;
pub mod sampler;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod vertex;

pub use error::{RhiError, RhiResult};

pub use ash::vk;
