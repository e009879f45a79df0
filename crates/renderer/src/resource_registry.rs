//! Fixed table of render targets shared between passes.
//!
//! The registry is the single owner of every image that flows from one pass
//! to another. Each entry pairs the image with a [`StateTracker`]; passes
//! refer to entries by [`ResourceId`] and change their state only through
//! [`ResourceRegistry::transition`]. There is no locking: all transitions of
//! a frame are recorded in program order on that frame's command buffer.
//!
//! The registry is generic over the image type so the state bookkeeping can
//! be tested without a device.

use ash::vk;
use tracing::{debug, info};

use deferred_rhi::barrier::{BarrierRecorder, ResourceState, StateTracker};
use deferred_rhi::image::{GpuImage, ImageDesc};
use deferred_rhi::{RhiError, RhiResult};

use crate::context::GraphicsContext;

/// Depth formats tried in order for the scene depth buffer.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Format of the shadow map.
pub const SHADOW_MAP_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Index of a registry entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceId {
    Positions,
    Normals,
    Albedo,
    Depth,
    ShadowMap,
    Atmospherics,
    SceneColor,
}

/// Which extent an entry is allocated at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetSize {
    /// The current render resolution; rebuilt on swapchain recreation.
    Render,
    /// The configured shadow-map resolution; constant for the run.
    Shadow,
}

impl ResourceId {
    pub const COUNT: usize = 7;

    pub const ALL: [ResourceId; Self::COUNT] = [
        ResourceId::Positions,
        ResourceId::Normals,
        ResourceId::Albedo,
        ResourceId::Depth,
        ResourceId::ShadowMap,
        ResourceId::Atmospherics,
        ResourceId::SceneColor,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            ResourceId::Positions => "gbuffer positions",
            ResourceId::Normals => "gbuffer normals",
            ResourceId::Albedo => "gbuffer albedo",
            ResourceId::Depth => "scene depth",
            ResourceId::ShadowMap => "shadow map",
            ResourceId::Atmospherics => "atmospherics",
            ResourceId::SceneColor => "scene color",
        }
    }

    /// Pixel format; the scene depth format is chosen at runtime.
    pub const fn format(self, depth_format: vk::Format) -> vk::Format {
        match self {
            ResourceId::Positions | ResourceId::Normals => vk::Format::R16G16B16A16_SFLOAT,
            ResourceId::Albedo | ResourceId::Atmospherics | ResourceId::SceneColor => {
                vk::Format::R8G8B8A8_UNORM
            }
            ResourceId::Depth => depth_format,
            ResourceId::ShadowMap => SHADOW_MAP_FORMAT,
        }
    }

    pub fn usage(self) -> vk::ImageUsageFlags {
        match self {
            ResourceId::Depth | ResourceId::ShadowMap => {
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED
            }
            _ => vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
        }
    }

    pub const fn initial_state(self) -> ResourceState {
        match self {
            ResourceId::Depth | ResourceId::ShadowMap => ResourceState::DepthTarget,
            ResourceId::SceneColor => ResourceState::ShaderReadOnly,
            _ => ResourceState::ColorTarget,
        }
    }

    pub const fn size(self) -> TargetSize {
        match self {
            ResourceId::ShadowMap => TargetSize::Shadow,
            _ => TargetSize::Render,
        }
    }
}

/// What the registry needs from an image.
pub trait RegistryImage {
    fn handle(&self) -> vk::Image;
    fn view(&self) -> vk::ImageView;
    fn format(&self) -> vk::Format;
    fn extent(&self) -> vk::Extent2D;
}

impl RegistryImage for GpuImage {
    fn handle(&self) -> vk::Image {
        GpuImage::handle(self)
    }

    fn view(&self) -> vk::ImageView {
        GpuImage::view(self)
    }

    fn format(&self) -> vk::Format {
        GpuImage::format(self)
    }

    fn extent(&self) -> vk::Extent2D {
        GpuImage::extent(self)
    }
}

struct Entry<I> {
    image: I,
    tracker: StateTracker,
}

/// Owner of every shared render target and its current state.
pub struct ResourceRegistry<I: RegistryImage = GpuImage> {
    entries: [Option<Entry<I>>; ResourceId::COUNT],
}

impl<I: RegistryImage> Default for ResourceRegistry<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: RegistryImage> ResourceRegistry<I> {
    pub fn new() -> Self {
        Self {
            entries: std::array::from_fn(|_| None),
        }
    }

    /// Registers `image` under `id` and records its move from undefined into
    /// `initial`. Replaces (and drops) any previous image under `id`.
    pub fn insert(
        &mut self,
        id: ResourceId,
        image: I,
        recorder: &mut dyn BarrierRecorder,
        initial: ResourceState,
    ) -> RhiResult<()> {
        let mut tracker = StateTracker::new(id.name(), image.handle(), image.format());
        tracker.transition(recorder, initial)?;

        debug!(
            "Registered {} ({:?}, {}x{}) in {:?}",
            id.name(),
            image.format(),
            image.extent().width,
            image.extent().height,
            initial
        );
        self.entries[id.index()] = Some(Entry { image, tracker });
        Ok(())
    }

    /// Moves `id` to `to`. Records one barrier, or none when it is already
    /// there; returns whether a barrier was recorded.
    pub fn transition(
        &mut self,
        recorder: &mut dyn BarrierRecorder,
        id: ResourceId,
        to: ResourceState,
    ) -> RhiResult<bool> {
        let entry = self.entries[id.index()]
            .as_mut()
            .ok_or_else(|| RhiError::ResourceNotRegistered(id.name().to_string()))?;
        entry.tracker.transition(recorder, to)
    }

    /// Applies a pass's declared accesses in order.
    pub fn apply_accesses(
        &mut self,
        recorder: &mut dyn BarrierRecorder,
        accesses: &[(ResourceId, ResourceState)],
    ) -> RhiResult<()> {
        for &(id, state) in accesses {
            self.transition(recorder, id, state)?;
        }
        Ok(())
    }

    pub fn image(&self, id: ResourceId) -> RhiResult<&I> {
        self.entries[id.index()]
            .as_ref()
            .map(|entry| &entry.image)
            .ok_or_else(|| RhiError::ResourceNotRegistered(id.name().to_string()))
    }

    pub fn view(&self, id: ResourceId) -> RhiResult<vk::ImageView> {
        self.image(id).map(RegistryImage::view)
    }

    pub fn format(&self, id: ResourceId) -> RhiResult<vk::Format> {
        self.image(id).map(RegistryImage::format)
    }

    pub fn state(&self, id: ResourceId) -> Option<ResourceState> {
        self.entries[id.index()]
            .as_ref()
            .map(|entry| entry.tracker.state())
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.entries[id.index()].is_some()
    }

    pub fn remove(&mut self, id: ResourceId) -> Option<I> {
        self.entries[id.index()].take().map(|entry| entry.image)
    }
}

impl ResourceRegistry<GpuImage> {
    /// Allocates the image for `id` at `extent`, names it, and moves it into
    /// `initial` with a blocking one-shot submission.
    pub fn add_resource(
        &mut self,
        ctx: &GraphicsContext,
        id: ResourceId,
        extent: vk::Extent2D,
        initial: ResourceState,
    ) -> RhiResult<()> {
        let desc = ImageDesc::target(
            id.name(),
            id.format(ctx.depth_format()),
            id.usage(),
            extent,
        );
        let image = GpuImage::new(ctx.device().clone(), &desc)?;
        ctx.submit_one_time(|cmd| self.insert(id, image, cmd, initial))
    }

    /// Creates every entry of the fixed table.
    pub fn create_targets(&mut self, ctx: &GraphicsContext) -> RhiResult<()> {
        for id in ResourceId::ALL {
            self.add_resource(ctx, id, Self::extent_for(ctx, id), id.initial_state())?;
        }
        info!(
            "Resource registry created {} targets at {}x{}",
            ResourceId::COUNT,
            ctx.frame().render_resolution().width,
            ctx.frame().render_resolution().height
        );
        Ok(())
    }

    /// Recreates the render-resolution entries after a resize. The device
    /// must be idle.
    pub fn rebuild_render_targets(&mut self, ctx: &GraphicsContext) -> RhiResult<()> {
        for id in ResourceId::ALL {
            if id.size() == TargetSize::Render {
                self.remove(id);
                self.add_resource(ctx, id, Self::extent_for(ctx, id), id.initial_state())?;
            }
        }
        debug!(
            "Rebuilt render-resolution targets at {}x{}",
            ctx.frame().render_resolution().width,
            ctx.frame().render_resolution().height
        );
        Ok(())
    }

    fn extent_for(ctx: &GraphicsContext, id: ResourceId) -> vk::Extent2D {
        match id.size() {
            TargetSize::Render => ctx.frame().render_resolution(),
            TargetSize::Shadow => ctx.shadow_map_extent(),
        }
    }
}
