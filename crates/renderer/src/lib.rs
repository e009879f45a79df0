//! Deferred rendering core.
//!
//! This crate orchestrates the rendering process:
//! - Render targets and their layout states
//! - Per-pass binding tables and pipelines
//! - The geometry, shadow, sky, lighting, debug and composite passes
//! - Frame pacing with two frames in flight

pub mod binding_table;
pub mod context;
pub mod debug_lines;
mod error;
pub mod frame_manager;
pub mod gpu_scene;
pub mod pass_pipeline;
pub mod passes;
mod renderer;
pub mod resource_registry;

pub use error::{RendererError, RendererResult};
pub use frame_manager::FrameOutcome;
pub use renderer::Renderer;
