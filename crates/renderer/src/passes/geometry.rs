//! G-buffer pass: world positions, normals, albedo and scene depth.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use tracing::debug;

use deferred_rhi::RhiResult;
use deferred_rhi::buffer::{Buffer, BufferUsage};
use deferred_rhi::command::CommandBuffer;
use deferred_rhi::descriptor::DescriptorSetLayout;
use deferred_rhi::pipeline::{CullMode, FrontFace, PrimitiveTopology};
use deferred_rhi::rendering::{ColorAttachment, DepthAttachment, RenderingConfig};
use deferred_rhi::vertex::Vertex;
use deferred_resources::MaterialRecord;

use super::{DrawPass, FrameResources, PassKind, PassSetup, PassState, begin_pass, end_pass};
use crate::binding_table::{BindingLayout, BindingTable, PerFrame};
use crate::pass_pipeline::{PassPipeline, PipelineDesc, push_range};
use crate::resource_registry::ResourceId;

/// Per-model vertex uniform.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GeometryUniforms {
    pub model: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
    pub normal: Mat4,
}

/// Slot 0: the model's uniform copies. Slot 1: its albedo texture.
fn model_bindings(
    uniforms: PerFrame<vk::Buffer>,
    albedo_view: vk::ImageView,
    sampler: vk::Sampler,
    albedo_format: vk::Format,
) -> BindingLayout {
    BindingLayout::new()
        .add_uniform_buffer(
            0,
            vk::ShaderStageFlags::VERTEX,
            uniforms,
            std::mem::size_of::<GeometryUniforms>() as vk::DeviceSize,
        )
        .add_sampled_image(
            1,
            vk::ShaderStageFlags::FRAGMENT,
            albedo_view,
            sampler,
            albedo_format,
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
pub struct GeometryPass {
    state: PassState<Resources>,
}

impl GeometryPass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DrawPass for GeometryPass {
    fn kind(&self) -> PassKind {
        PassKind::Geometry
    }

    fn init(&mut self, setup: &PassSetup<'_>) -> RhiResult<()> {
        let ctx = setup.context;
        let device = ctx.device();

        let template = model_bindings(
            PerFrame::splat(vk::Buffer::null()),
            vk::ImageView::null(),
            vk::Sampler::null(),
            vk::Format::R8G8B8A8_UNORM,
        );
        let set_layout = DescriptorSetLayout::new(device.clone(), &template.descriptor_bindings())?;

        let desc = PipelineDesc {
            name: "Geometry",
            vertex_shader: "geometry.vert.spv",
            fragment_shader: "geometry.frag.spv",
            vertex_layout: Some(Vertex::layout()),
            topology: PrimitiveTopology::TriangleList,
            cull_mode: CullMode::Back,
            front_face: FrontFace::CounterClockwise,
            push_constants: Some(push_range::<MaterialRecord>(vk::ShaderStageFlags::FRAGMENT)),
            color_formats: [ResourceId::Positions, ResourceId::Normals, ResourceId::Albedo]
                .map(|id| id.format(ctx.depth_format()))
                .to_vec(),
            depth_format: Some(ctx.depth_format()),
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
                        &format!("{} geometry uniforms {}", model.name(), f),
                        std::mem::size_of::<GeometryUniforms>() as vk::DeviceSize,
                    )
                })?;
                let table = BindingTable::create(
                    device.clone(),
                    &model_bindings(
                        PerFrame::from_fn(|f| uniforms.get(f).handle()),
                        model.albedo_view(),
                        ctx.linear_repeat_sampler(),
                        model.albedo_format(),
                    ),
                )?;
                Ok(ModelBindings { table, uniforms })
            })
            .collect::<RhiResult<Vec<_>>>()?;

        debug!("Geometry pass bound {} model(s)", models.len());
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
            let uniforms = GeometryUniforms {
                model: model.world_matrix(),
                view: frame.view.view,
                projection: frame.view.projection,
                normal: model.transform.normal_matrix(),
            };
            bindings.uniforms.get(frame_index).write_pod(&uniforms)?;
        }
        Ok(())
    }

    fn draw(&mut self, cmd: &mut CommandBuffer, frame: &mut FrameResources<'_>) -> RhiResult<()> {
        let kind = self.kind();
        let resources = self.state.get(kind)?;
        let frame_index = frame.frame_index();

        let rendering = RenderingConfig::from_extent(frame.render_resolution())
            .with_color_attachment(
                ColorAttachment::new(frame.registry.view(ResourceId::Positions)?)
                    .with_clear_color([0.0; 4]),
            )
            .with_color_attachment(
                ColorAttachment::new(frame.registry.view(ResourceId::Normals)?)
                    .with_clear_color([0.0; 4]),
            )
            .with_color_attachment(ColorAttachment::new(
                frame.registry.view(ResourceId::Albedo)?,
            ))
            .with_depth_attachment(DepthAttachment::new(
                frame.registry.view(ResourceId::Depth)?,
            ));

        begin_pass(cmd, kind, frame.registry, &rendering)?;
        cmd.bind_graphics_pipeline(resources.pipeline.handle());

        let layout = resources.pipeline.layout();
        for (model, bindings) in frame.scene.models().iter().zip(&resources.models) {
            bindings.table.bind(cmd, layout, frame_index);
            cmd.bind_vertex_buffer(model.vertex_buffer(), 0);
            cmd.bind_index_buffer(model.index_buffer(), vk::IndexType::UINT32);

            for range in model.ranges() {
                cmd.push_constants(layout, resources.pipeline.push_stages(), &range.material);
                cmd.draw_indexed(range.index_count, range.start_index);
            }
        }

        end_pass(cmd);
        Ok(())
    }

    fn cleanup(&mut self) {
        self.state.clean_up();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_block_is_four_matrices() {
        assert_eq!(std::mem::size_of::<GeometryUniforms>(), 256);
    }

    #[test]
    fn test_model_bindings_slots() {
        let layout = model_bindings(
            PerFrame::splat(vk::Buffer::null()),
            vk::ImageView::null(),
            vk::Sampler::null(),
            vk::Format::R8G8B8A8_UNORM,
        );
        let bindings = layout.descriptor_bindings();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].binding, 0);
        assert_eq!(bindings[0].stage_flags, vk::ShaderStageFlags::VERTEX);
        assert_eq!(
            bindings[1].descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
    }

    #[test]
    fn test_draw_before_init_is_rejected() {
        let pass = GeometryPass::new();
        assert!(pass.state.get(PassKind::Geometry).is_err());
    }
}
