//! Draw passes and their shared contract.
//!
//! Every pass implements [`DrawPass`]. The renderer runs them in
//! [`PassKind::ORDER`] each frame; a pass declares the registry resources it
//! touches in [`PassKind::accesses`] and moves them into the declared states
//! before it begins rendering.
//!
//! # Lifecycle
//!
//! `Uninitialized -> init -> Initialized -> (update, draw)* -> cleanup ->
//! CleanedUp`, and back to `Initialized` through `init` after a swapchain
//! recreation. Drawing anything but an initialized pass fails with
//! [`RhiError::PassNotInitialized`].

pub mod composite;
pub mod debug;
pub mod geometry;
pub mod lighting;
pub mod shadow;
pub mod sky;

pub use composite::CompositePass;
pub use debug::DebugPass;
pub use geometry::GeometryPass;
pub use lighting::LightingPass;
pub use shadow::ShadowPass;
pub use sky::SkyPass;

use ash::vk;

use deferred_rhi::barrier::ResourceState;
use deferred_rhi::command::CommandBuffer;
use deferred_rhi::rendering::RenderingConfig;
use deferred_rhi::{RhiError, RhiResult};

use crate::context::GraphicsContext;
use crate::debug_lines::DebugLines;
use crate::gpu_scene::{GpuScene, SceneView};
use crate::resource_registry::{RegistryImage, ResourceId, ResourceRegistry};

/// Identity of a pass, its place in the frame and its declared accesses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PassKind {
    Geometry,
    Shadow,
    Sky,
    Lighting,
    Debug,
    Composite,
}

impl PassKind {
    /// Execution order within a frame.
    pub const ORDER: [PassKind; 6] = [
        PassKind::Geometry,
        PassKind::Shadow,
        PassKind::Sky,
        PassKind::Lighting,
        PassKind::Debug,
        PassKind::Composite,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            PassKind::Geometry => "Geometry",
            PassKind::Shadow => "Shadow",
            PassKind::Sky => "Sky",
            PassKind::Lighting => "Lighting",
            PassKind::Debug => "Debug",
            PassKind::Composite => "Composite",
        }
    }

    /// Debug label color.
    pub const fn label_color(self) -> [f32; 4] {
        match self {
            PassKind::Geometry => [0.2, 0.6, 0.9, 1.0],
            PassKind::Shadow => [0.3, 0.3, 0.3, 1.0],
            PassKind::Sky => [0.4, 0.7, 1.0, 1.0],
            PassKind::Lighting => [1.0, 0.8, 0.3, 1.0],
            PassKind::Debug => [1.0, 0.2, 0.2, 1.0],
            PassKind::Composite => [0.6, 0.9, 0.4, 1.0],
        }
    }

    /// Registry resources the pass reads or writes, with the state each must
    /// be in, in the order the transitions are recorded.
    pub const fn accesses(self) -> &'static [(ResourceId, ResourceState)] {
        use ResourceId::*;
        use ResourceState::*;
        match self {
            PassKind::Geometry => &[
                (Positions, ColorTarget),
                (Normals, ColorTarget),
                (Albedo, ColorTarget),
                (Depth, DepthTarget),
            ],
            PassKind::Shadow => &[(ShadowMap, DepthTarget)],
            PassKind::Sky => &[(Depth, DepthReadOnly), (Atmospherics, ColorTarget)],
            PassKind::Lighting => &[
                (Positions, ShaderReadOnly),
                (Normals, ShaderReadOnly),
                (Albedo, ShaderReadOnly),
                (Atmospherics, ShaderReadOnly),
                (Depth, DepthReadOnly),
                (ShadowMap, DepthReadOnly),
                (SceneColor, ColorTarget),
            ],
            PassKind::Debug => &[(SceneColor, ColorTarget), (Depth, DepthTarget)],
            PassKind::Composite => &[(SceneColor, ShaderReadOnly)],
        }
    }
}

/// Init-time inputs shared by all passes.
pub struct PassSetup<'a> {
    pub context: &'a GraphicsContext,
    pub registry: &'a ResourceRegistry,
    pub scene: &'a GpuScene,
    pub present_format: vk::Format,
}

/// The acquired swapchain image of this frame.
#[derive(Clone, Copy, Debug)]
pub struct PresentTarget {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

/// Everything a pass reads or mutates while drawing one frame.
pub struct FrameResources<'a> {
    pub context: &'a mut GraphicsContext,
    pub registry: &'a mut ResourceRegistry,
    pub scene: &'a GpuScene,
    pub view: &'a SceneView,
    pub debug_lines: &'a DebugLines,
    pub target: PresentTarget,
}

impl FrameResources<'_> {
    #[inline]
    pub fn frame_index(&self) -> usize {
        self.context.frame().frame_index()
    }

    #[inline]
    pub fn render_resolution(&self) -> vk::Extent2D {
        self.context.frame().render_resolution()
    }
}

/// The four-step contract every pass implements.
pub trait DrawPass {
    fn kind(&self) -> PassKind;

    /// Creates pipelines, binding tables and pass-local buffers.
    fn init(&mut self, setup: &PassSetup<'_>) -> RhiResult<()>;

    /// Copies this frame's uniform data into the frame-indexed copy.
    fn update(&mut self, frame: &FrameResources<'_>) -> RhiResult<()>;

    /// Records the pass into `cmd`.
    fn draw(&mut self, cmd: &mut CommandBuffer, frame: &mut FrameResources<'_>) -> RhiResult<()>;

    /// Releases everything `init` created. The device must be idle.
    fn cleanup(&mut self);
}

/// Lifecycle state of a pass holding its initialized resources `T`.
#[derive(Debug)]
pub enum PassState<T> {
    Uninitialized,
    Initialized(T),
    CleanedUp,
}

impl<T> Default for PassState<T> {
    fn default() -> Self {
        PassState::Uninitialized
    }
}

impl<T> PassState<T> {
    pub fn is_initialized(&self) -> bool {
        matches!(self, PassState::Initialized(_))
    }

    pub fn set(&mut self, resources: T) {
        *self = PassState::Initialized(resources);
    }

    pub fn get(&self, kind: PassKind) -> RhiResult<&T> {
        match self {
            PassState::Initialized(resources) => Ok(resources),
            _ => Err(RhiError::PassNotInitialized(kind.name())),
        }
    }

    pub fn get_mut(&mut self, kind: PassKind) -> RhiResult<&mut T> {
        match self {
            PassState::Initialized(resources) => Ok(resources),
            _ => Err(RhiError::PassNotInitialized(kind.name())),
        }
    }

    /// Drops the resources. A pass never initialized stays uninitialized.
    pub fn clean_up(&mut self) {
        if self.is_initialized() {
            *self = PassState::CleanedUp;
        }
    }
}

/// Moves the pass's declared accesses into place and opens a labelled
/// rendering scope over `rendering`.
pub(crate) fn begin_pass<I: RegistryImage>(
    cmd: &mut CommandBuffer,
    kind: PassKind,
    registry: &mut ResourceRegistry<I>,
    rendering: &RenderingConfig,
) -> RhiResult<()> {
    registry.apply_accesses(cmd, kind.accesses())?;
    open_rendering(cmd, kind, rendering);
    Ok(())
}

/// Opens the labelled rendering scope without touching the registry.
pub(crate) fn open_rendering(cmd: &CommandBuffer, kind: PassKind, rendering: &RenderingConfig) {
    cmd.begin_label(kind.name(), kind.label_color());
    let bundle = rendering.build();
    cmd.begin_rendering(&bundle.info());
    cmd.set_viewport_and_scissor(rendering.extent());
}

pub(crate) fn end_pass(cmd: &CommandBuffer) {
    cmd.end_rendering();
    cmd.end_label();
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;
    use crate::resource_registry::tests::{Recorded, populated};

    fn run_frame(
        registry: &mut ResourceRegistry<crate::resource_registry::tests::FakeImage>,
        recorder: &mut Recorded,
        debug_enabled: bool,
    ) -> Vec<(PassKind, std::ops::Range<usize>)> {
        let mut spans = Vec::new();
        for kind in PassKind::ORDER {
            if kind == PassKind::Debug && !debug_enabled {
                continue;
            }
            let start = recorder.0.len();
            registry
                .apply_accesses(recorder, kind.accesses())
                .unwrap_or_else(|e| panic!("{} pass: {}", kind.name(), e));
            spans.push((kind, start..recorder.0.len()));
        }
        spans
    }

    #[test]
    fn test_frame_sequence_is_legal_across_frames() {
        for debug_enabled in [false, true] {
            let mut recorder = Recorded::default();
            let mut registry = populated(&mut recorder);
            for _ in 0..3 {
                run_frame(&mut registry, &mut recorder, debug_enabled);
            }
        }
    }

    #[test]
    fn test_lighting_reads_follow_geometry_writes() {
        let mut recorder = Recorded::default();
        let mut registry = populated(&mut recorder);
        // Second frame, so geometry has real transitions to record.
        run_frame(&mut registry, &mut recorder, true);
        recorder.0.clear();
        let spans = run_frame(&mut registry, &mut recorder, true);

        let span_of = |kind| {
            spans
                .iter()
                .find(|(k, _)| *k == kind)
                .map(|(_, span)| span.clone())
                .unwrap()
        };
        let geometry = span_of(PassKind::Geometry);
        let lighting = span_of(PassKind::Lighting);

        for id in [ResourceId::Positions, ResourceId::Normals, ResourceId::Albedo] {
            let image = vk::Image::from_raw(id.index() as u64 + 1);
            let write = recorder.0[geometry.clone()]
                .iter()
                .position(|b| b.image == image && b.to == ResourceState::ColorTarget)
                .map(|i| i + geometry.start)
                .unwrap();
            let read = recorder.0[lighting.clone()]
                .iter()
                .position(|b| b.image == image && b.to == ResourceState::ShaderReadOnly)
                .map(|i| i + lighting.start)
                .unwrap();
            assert!(write < read, "{:?}", id);
        }
    }

    #[test]
    fn test_first_frame_geometry_records_nothing() {
        let mut recorder = Recorded::default();
        let mut registry = populated(&mut recorder);
        recorder.0.clear();

        let spans = run_frame(&mut registry, &mut recorder, false);
        // Initial states already match the geometry targets.
        assert!(spans[0].1.is_empty());
    }

    #[test]
    fn test_pass_state_lifecycle() {
        let mut state: PassState<u32> = PassState::default();
        assert!(matches!(
            state.get(PassKind::Sky),
            Err(RhiError::PassNotInitialized("Sky"))
        ));

        state.set(7);
        assert_eq!(*state.get_mut(PassKind::Sky).unwrap(), 7);

        state.clean_up();
        assert!(matches!(state, PassState::CleanedUp));
        assert!(state.get(PassKind::Sky).is_err());

        state.set(8);
        assert!(state.is_initialized());
    }

    #[test]
    fn test_order_starts_with_geometry_and_ends_with_composite() {
        assert_eq!(PassKind::ORDER[0], PassKind::Geometry);
        assert_eq!(PassKind::ORDER[5], PassKind::Composite);
        let lighting = PassKind::ORDER
            .iter()
            .position(|k| *k == PassKind::Lighting)
            .unwrap();
        for producer in [PassKind::Geometry, PassKind::Shadow, PassKind::Sky] {
            assert!(PassKind::ORDER.iter().position(|k| *k == producer).unwrap() < lighting);
        }
    }
}
