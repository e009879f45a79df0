//! Line overlay drawn over scene color, depth-tested against the scene.

use ash::vk;
use glam::Mat4;
use tracing::debug;

use deferred_rhi::RhiResult;
use deferred_rhi::buffer::{Buffer, BufferUsage};
use deferred_rhi::command::CommandBuffer;
use deferred_rhi::pipeline::{CullMode, FrontFace, PrimitiveTopology};
use deferred_rhi::rendering::{ColorAttachment, DepthAttachment, RenderingConfig};
use deferred_rhi::sync::FRAMES_IN_FLIGHT;
use deferred_rhi::vertex::DebugVertex;

use super::{DrawPass, FrameResources, PassKind, PassSetup, PassState, begin_pass, end_pass};
use crate::binding_table::PerFrame;
use crate::pass_pipeline::{PassPipeline, PipelineDesc, push_range};
use crate::resource_registry::ResourceId;

const MIN_VERTEX_CAPACITY: usize = 64;

/// Vertex capacity to allocate for `count` vertices.
fn vertex_capacity(count: usize) -> usize {
    count.next_power_of_two().max(MIN_VERTEX_CAPACITY)
}

struct VertexRing {
    buffer: Buffer,
    capacity: usize,
}

struct Resources {
    pipeline: PassPipeline,
    vertices: PerFrame<Option<VertexRing>>,
}

#[derive(Default)]
pub struct DebugPass {
    state: PassState<Resources>,
    /// Vertices uploaded for each frame slot by the last `update`.
    uploaded: [u32; FRAMES_IN_FLIGHT],
}

impl DebugPass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DrawPass for DebugPass {
    fn kind(&self) -> PassKind {
        PassKind::Debug
    }

    fn init(&mut self, setup: &PassSetup<'_>) -> RhiResult<()> {
        let ctx = setup.context;
        let desc = PipelineDesc {
            name: "Debug",
            vertex_shader: "debug.vert.spv",
            fragment_shader: "debug.frag.spv",
            vertex_layout: Some(DebugVertex::layout()),
            topology: PrimitiveTopology::LineList,
            cull_mode: CullMode::None,
            front_face: FrontFace::CounterClockwise,
            push_constants: Some(push_range::<Mat4>(vk::ShaderStageFlags::VERTEX)),
            color_formats: vec![ResourceId::SceneColor.format(ctx.depth_format())],
            depth_format: Some(ctx.depth_format()),
        };
        let pipeline = PassPipeline::create(ctx.device().clone(), ctx.shader_dir(), &desc, &[])?;

        self.state.set(Resources {
            pipeline,
            vertices: PerFrame::from_fn(|_| None),
        });
        self.uploaded = [0; FRAMES_IN_FLIGHT];
        Ok(())
    }

    fn update(&mut self, frame: &FrameResources<'_>) -> RhiResult<()> {
        let kind = self.kind();
        let resources = self.state.get_mut(kind)?;
        let frame_index = frame.frame_index();
        let lines = frame.debug_lines.vertices();
        self.uploaded[frame_index] = 0;
        if lines.is_empty() {
            return Ok(());
        }

        let slot = resources.vertices.get_mut(frame_index);
        if slot.as_ref().is_none_or(|ring| ring.capacity < lines.len()) {
            let capacity = vertex_capacity(lines.len());
            debug!("Debug line buffer {} grows to {} vertices", frame_index, capacity);
            *slot = Some(VertexRing {
                buffer: Buffer::new(
                    frame.context.device().clone(),
                    BufferUsage::StreamVertex,
                    &format!("debug lines {}", frame_index),
                    (capacity * std::mem::size_of::<DebugVertex>()) as vk::DeviceSize,
                )?,
                capacity,
            });
        }
        if let Some(ring) = slot {
            ring.buffer.write_data(0, bytemuck::cast_slice(lines))?;
            self.uploaded[frame_index] = lines.len() as u32;
        }
        Ok(())
    }

    fn draw(&mut self, cmd: &mut CommandBuffer, frame: &mut FrameResources<'_>) -> RhiResult<()> {
        let kind = self.kind();
        let resources = self.state.get(kind)?;
        let frame_index = frame.frame_index();

        let rendering = RenderingConfig::from_extent(frame.render_resolution())
            .with_color_attachment(
                ColorAttachment::new(frame.registry.view(ResourceId::SceneColor)?).load(),
            )
            .with_depth_attachment(
                DepthAttachment::new(frame.registry.view(ResourceId::Depth)?).load(),
            );
        begin_pass(cmd, kind, frame.registry, &rendering)?;

        let count = self.uploaded[frame_index];
        if let (Some(ring), true) = (resources.vertices.get(frame_index), count > 0) {
            let layout = resources.pipeline.layout();
            cmd.bind_graphics_pipeline(resources.pipeline.handle());
            cmd.push_constants(
                layout,
                resources.pipeline.push_stages(),
                &(frame.view.projection * frame.view.view),
            );
            cmd.bind_vertex_buffer(ring.buffer.handle(), 0);
            cmd.draw(count, 0);
        }

        end_pass(cmd);
        Ok(())
    }

    fn cleanup(&mut self) {
        self.state.clean_up();
        self.uploaded = [0; FRAMES_IN_FLIGHT];
    }
}

#[cfg(test)]
mod tests {
    use deferred_rhi::barrier::ResourceState;

    use super::*;

    #[test]
    fn test_vertex_capacity_grows_in_powers_of_two() {
        assert_eq!(vertex_capacity(1), MIN_VERTEX_CAPACITY);
        assert_eq!(vertex_capacity(64), 64);
        assert_eq!(vertex_capacity(65), 128);
        assert_eq!(vertex_capacity(1000), 1024);
    }

    #[test]
    fn test_overlay_writes_scene_color_and_depth() {
        let accesses = PassKind::Debug.accesses();
        assert!(accesses.contains(&(ResourceId::SceneColor, ResourceState::ColorTarget)));
        assert!(accesses.contains(&(ResourceId::Depth, ResourceState::DepthTarget)));
    }
}
