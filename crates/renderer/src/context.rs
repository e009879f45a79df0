//! Device-level handles shared by every pass, plus the per-frame state.
//!
//! [`GraphicsContext`] is built once after the device exists and is handed
//! to passes by reference. Only [`FrameState`] changes after construction:
//! the frame loop sets it once per frame, and the shadow pass overrides the
//! render resolution for the duration of its draw.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use deferred_rhi::{RhiError, RhiResult};
use deferred_rhi::command::{CommandBuffer, CommandPool};
use deferred_rhi::device::Device;
use deferred_rhi::sampler::{Sampler, SamplerKind};

/// Mutable per-frame values.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameState {
    frame_index: usize,
    image_index: u32,
    delta_time: f32,
    render_resolution: vk::Extent2D,
}

impl FrameState {
    pub fn new(render_resolution: vk::Extent2D) -> Self {
        Self {
            frame_index: 0,
            image_index: 0,
            delta_time: 0.0,
            render_resolution,
        }
    }

    #[inline]
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    #[inline]
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    #[inline]
    pub fn delta_time(&self) -> f32 {
        self.delta_time
    }

    #[inline]
    pub fn render_resolution(&self) -> vk::Extent2D {
        self.render_resolution
    }

    pub fn set_frame_index(&mut self, frame_index: usize) {
        self.frame_index = frame_index;
    }

    pub fn set_image_index(&mut self, image_index: u32) {
        self.image_index = image_index;
    }

    pub fn set_delta_time(&mut self, delta_time: f32) {
        self.delta_time = delta_time;
    }

    pub fn set_render_resolution(&mut self, extent: vk::Extent2D) {
        self.render_resolution = extent;
    }

    /// Replaces the render resolution and returns the previous one, to be
    /// handed back to [`set_render_resolution`](Self::set_render_resolution).
    pub fn override_render_resolution(&mut self, extent: vk::Extent2D) -> vk::Extent2D {
        std::mem::replace(&mut self.render_resolution, extent)
    }

    #[inline]
    pub fn aspect_ratio(&self) -> f32 {
        self.render_resolution.width as f32 / self.render_resolution.height.max(1) as f32
    }
}

/// Immutable-after-init handles: device, command pool, shared samplers and
/// the formats and paths passes build against.
pub struct GraphicsContext {
    device: Arc<Device>,
    command_pool: CommandPool,
    linear_clamp: Sampler,
    linear_repeat: Sampler,
    depth_format: vk::Format,
    shadow_map_size: u32,
    shader_dir: PathBuf,
    generate_mipmaps: bool,
    frame: FrameState,
}

impl GraphicsContext {
    pub fn new(
        device: Arc<Device>,
        depth_format: vk::Format,
        shadow_map_size: u32,
        shader_dir: &Path,
        generate_mipmaps: bool,
        render_resolution: vk::Extent2D,
    ) -> RhiResult<Self> {
        let (graphics_family, _) = device.queue_families().resolved().ok_or_else(|| {
            RhiError::InvalidHandle("Graphics queue family unresolved".to_string())
        })?;
        let command_pool = CommandPool::new(device.clone(), graphics_family)?;
        let linear_clamp = Sampler::new(device.clone(), SamplerKind::LinearClampWhiteBorder)?;
        let linear_repeat = Sampler::new(device.clone(), SamplerKind::LinearRepeat)?;

        info!(
            "Graphics context ready: depth format {:?}, shadow map {}x{}, shaders in {}",
            depth_format,
            shadow_map_size,
            shadow_map_size,
            shader_dir.display()
        );

        Ok(Self {
            device,
            command_pool,
            linear_clamp,
            linear_repeat,
            depth_format,
            shadow_map_size,
            shader_dir: shader_dir.to_path_buf(),
            generate_mipmaps,
            frame: FrameState::new(render_resolution),
        })
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    pub fn command_pool(&self) -> &CommandPool {
        &self.command_pool
    }

    /// Linear filtering, clamp-to-border with a white border. Used for every
    /// render target read back by a later pass.
    #[inline]
    pub fn linear_clamp_sampler(&self) -> vk::Sampler {
        self.linear_clamp.handle()
    }

    /// Linear filtering with repeat addressing, for model textures.
    #[inline]
    pub fn linear_repeat_sampler(&self) -> vk::Sampler {
        self.linear_repeat.handle()
    }

    #[inline]
    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    #[inline]
    pub fn shadow_map_extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.shadow_map_size,
            height: self.shadow_map_size,
        }
    }

    #[inline]
    pub fn shader_dir(&self) -> &Path {
        &self.shader_dir
    }

    #[inline]
    pub fn generate_mipmaps(&self) -> bool {
        self.generate_mipmaps
    }

    #[inline]
    pub fn frame(&self) -> &FrameState {
        &self.frame
    }

    #[inline]
    pub fn frame_mut(&mut self) -> &mut FrameState {
        &mut self.frame
    }

    /// Records `record` into a throwaway command buffer, submits it and
    /// blocks until the graphics queue is idle.
    pub fn submit_one_time<R>(
        &self,
        record: impl FnOnce(&mut CommandBuffer) -> RhiResult<R>,
    ) -> RhiResult<R> {
        debug!("One-shot submission on the graphics queue");
        self.command_pool
            .submit_one_time(self.device.graphics_queue(), record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_override_returns_previous_resolution() {
        let mut frame = FrameState::new(extent(1280, 720));
        let previous = frame.override_render_resolution(extent(4096, 4096));
        assert_eq!(previous, extent(1280, 720));
        assert_eq!(frame.render_resolution(), extent(4096, 4096));

        frame.set_render_resolution(previous);
        assert_eq!(frame.render_resolution(), extent(1280, 720));
    }

    #[test]
    fn test_setters() {
        let mut frame = FrameState::new(extent(800, 600));
        frame.set_frame_index(1);
        frame.set_image_index(2);
        frame.set_delta_time(0.016);
        assert_eq!(frame.frame_index(), 1);
        assert_eq!(frame.image_index(), 2);
        assert_eq!(frame.delta_time(), 0.016);
        assert!((frame.aspect_ratio() - 800.0 / 600.0).abs() < 1e-6);
    }

    #[test]
    fn test_aspect_ratio_with_zero_height() {
        let frame = FrameState::new(extent(800, 0));
        assert_eq!(frame.aspect_ratio(), 800.0);
    }
}
