//! Depth-only pass rendering the scene from the sun into the shadow map.
//!
//! The light projection is an orthographic box fit around the scene bounds
//! in light space. That fit is loose for scenes whose bounds are much larger
//! than what the camera sees, trading resolution for stability.
//!
//! The pass renders at the shadow-map resolution: it overrides the context's
//! render resolution while drawing and restores it afterwards.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use deferred_rhi::RhiResult;
use deferred_rhi::buffer::{Buffer, BufferUsage};
use deferred_rhi::command::CommandBuffer;
use deferred_rhi::descriptor::DescriptorSetLayout;
use deferred_rhi::pipeline::{CullMode, FrontFace, PrimitiveTopology};
use deferred_rhi::rendering::{DepthAttachment, RenderingConfig};
use deferred_rhi::vertex::Vertex;

use super::{DrawPass, FrameResources, PassKind, PassSetup, PassState, begin_pass, end_pass};
use crate::binding_table::{BindingLayout, BindingTable, PerFrame};
use crate::pass_pipeline::{PassPipeline, PipelineDesc};
use crate::resource_registry::{ResourceId, SHADOW_MAP_FORMAT};

/// Per-model light-space transform.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ShadowUniforms {
    pub light_mvp: Mat4,
}

fn model_bindings(uniforms: PerFrame<vk::Buffer>) -> BindingLayout {
    BindingLayout::new().add_uniform_buffer(
        0,
        vk::ShaderStageFlags::VERTEX,
        uniforms,
        std::mem::size_of::<ShadowUniforms>() as vk::DeviceSize,
    )
}

struct ModelBindings {
    table: BindingTable,
    uniforms: PerFrame<Buffer>,
}

struct Resources {
    pipeline: PassPipeline,
    _set_layout: DescriptorSetLayout,
    models: Vec<ModelBindings>,
}

#[derive(Default)]
pub struct ShadowPass {
    state: PassState<Resources>,
}

impl ShadowPass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DrawPass for ShadowPass {
    fn kind(&self) -> PassKind {
        PassKind::Shadow
    }

    fn init(&mut self, setup: &PassSetup<'_>) -> RhiResult<()> {
        let ctx = setup.context;
        let device = ctx.device();

        let set_layout = DescriptorSetLayout::new(
            device.clone(),
            &model_bindings(PerFrame::splat(vk::Buffer::null())).descriptor_bindings(),
        )?;

        // Both faces cast.
        let desc = PipelineDesc {
            name: "Shadow",
            vertex_shader: "shadow.vert.spv",
            fragment_shader: "shadow.frag.spv",
            vertex_layout: Some(Vertex::position_only_layout()),
            topology: PrimitiveTopology::TriangleList,
            cull_mode: CullMode::None,
            front_face: FrontFace::CounterClockwise,
            push_constants: None,
            color_formats: Vec::new(),
            depth_format: Some(SHADOW_MAP_FORMAT),
        };
        let pipeline =
            PassPipeline::create(device.clone(), ctx.shader_dir(), &desc, &[set_layout.handle()])?;

        let models = setup
            .scene
            .models()
            .iter()
            .map(|model| -> RhiResult<ModelBindings> {
                let uniforms = PerFrame::try_from_fn(|f| {
                    Buffer::new(
                        device.clone(),
                        BufferUsage::Uniform,
                        &format!("{} shadow uniforms {}", model.name(), f),
                        std::mem::size_of::<ShadowUniforms>() as vk::DeviceSize,
                    )
                })?;
                let table = BindingTable::create(
                    device.clone(),
                    &model_bindings(PerFrame::from_fn(|f| uniforms.get(f).handle())),
                )?;
                Ok(ModelBindings { table, uniforms })
            })
            .collect::<RhiResult<Vec<_>>>()?;

        self.state.set(Resources {
            pipeline,
            _set_layout: set_layout,
            models,
        });
        Ok(())
    }

    fn update(&mut self, frame: &FrameResources<'_>) -> RhiResult<()> {
        let resources = self.state.get(self.kind())?;
        let frame_index = frame.frame_index();

        for (model, bindings) in frame.scene.models().iter().zip(&resources.models) {
            let uniforms = ShadowUniforms {
                light_mvp: frame.view.light_matrix * model.world_matrix(),
            };
            bindings.uniforms.get(frame_index).write_pod(&uniforms)?;
        }
        Ok(())
    }

    fn draw(&mut self, cmd: &mut CommandBuffer, frame: &mut FrameResources<'_>) -> RhiResult<()> {
        let kind = self.kind();
        let resources = self.state.get(kind)?;
        let frame_index = frame.frame_index();

        let shadow_view = frame.registry.view(ResourceId::ShadowMap)?;
        let shadow_extent = frame.context.shadow_map_extent();
        let previous = frame
            .context
            .frame_mut()
            .override_render_resolution(shadow_extent);

        let rendering = RenderingConfig::from_extent(frame.render_resolution())
            .with_depth_attachment(DepthAttachment::new(shadow_view));
        let result = begin_pass(cmd, kind, frame.registry, &rendering).map(|()| {
            cmd.bind_graphics_pipeline(resources.pipeline.handle());
            let layout = resources.pipeline.layout();
            for (model, bindings) in frame.scene.models().iter().zip(&resources.models) {
                bindings.table.bind(cmd, layout, frame_index);
                cmd.bind_vertex_buffer(model.vertex_buffer(), 0);
                cmd.bind_index_buffer(model.index_buffer(), vk::IndexType::UINT32);
                for range in model.ranges() {
                    cmd.draw_indexed(range.index_count, range.start_index);
                }
            }
            end_pass(cmd);
        });

        frame.context.frame_mut().set_render_resolution(previous);
        result
    }

    fn cleanup(&mut self) {
        self.state.clean_up();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_vertex_uniform_slot() {
        let bindings = model_bindings(PerFrame::splat(vk::Buffer::null())).descriptor_bindings();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].stage_flags, vk::ShaderStageFlags::VERTEX);
        assert_eq!(std::mem::size_of::<ShadowUniforms>(), 64);
    }

    #[test]
    fn test_cleanup_before_init_keeps_uninitialized() {
        let mut pass = ShadowPass::new();
        pass.cleanup();
        assert!(matches!(pass.state, PassState::Uninitialized));
    }
}
