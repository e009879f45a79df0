//! Full-screen resolve of the G-buffer into scene color.
//!
//! Samples positions, normals, albedo, depth, the shadow map and the
//! atmospherics target, then shades every pixel with the sun.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

use deferred_rhi::RhiResult;
use deferred_rhi::buffer::{Buffer, BufferUsage};
use deferred_rhi::command::CommandBuffer;
use deferred_rhi::rendering::{ColorAttachment, RenderingConfig};

use super::{DrawPass, FrameResources, PassKind, PassSetup, PassState, begin_pass, end_pass};
use crate::binding_table::{BindingLayout, BindingTable, PerFrame};
use crate::gpu_scene::SceneView;
use crate::pass_pipeline::{PassPipeline, PipelineDesc};
use crate::resource_registry::{RegistryImage, ResourceId, ResourceRegistry};

/// Sampled inputs, in binding order.
pub const INPUTS: [ResourceId; 6] = [
    ResourceId::Positions,
    ResourceId::Normals,
    ResourceId::Albedo,
    ResourceId::Depth,
    ResourceId::ShadowMap,
    ResourceId::Atmospherics,
];

/// Binding of [`LightingUniforms`], after the sampled inputs.
pub const UNIFORM_BINDING: u32 = INPUTS.len() as u32;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct LightingUniforms {
    pub light_matrix: Mat4,
    /// xyz: sun position. w: attenuation radius.
    pub light_position: Vec4,
    /// xyz: sun color. w: intensity.
    pub light_color: Vec4,
    pub view_position: Vec4,
}

impl LightingUniforms {
    pub fn new(view: &SceneView) -> Self {
        Self {
            light_matrix: view.light_matrix,
            light_position: view.light.position.extend(view.light.radius),
            light_color: view.light.color.extend(view.light.intensity),
            view_position: view.camera_position.extend(1.0),
        }
    }
}

fn bindings<I: RegistryImage>(
    registry: &ResourceRegistry<I>,
    sampler: vk::Sampler,
    uniforms: PerFrame<vk::Buffer>,
) -> RhiResult<BindingLayout> {
    let mut layout = BindingLayout::new();
    for (binding, id) in INPUTS.into_iter().enumerate() {
        layout = layout.add_sampled_image(
            binding as u32,
            vk::ShaderStageFlags::FRAGMENT,
            registry.view(id)?,
            sampler,
            registry.format(id)?,
        );
    }
    Ok(layout.add_uniform_buffer(
        UNIFORM_BINDING,
        vk::ShaderStageFlags::FRAGMENT,
        uniforms,
        std::mem::size_of::<LightingUniforms>() as vk::DeviceSize,
    ))
}

struct Resources {
    pipeline: PassPipeline,
    table: BindingTable,
    uniforms: PerFrame<Buffer>,
}

#[derive(Default)]
pub struct LightingPass {
    state: PassState<Resources>,
}

impl LightingPass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DrawPass for LightingPass {
    fn kind(&self) -> PassKind {
        PassKind::Lighting
    }

    fn init(&mut self, setup: &PassSetup<'_>) -> RhiResult<()> {
        let ctx = setup.context;
        let device = ctx.device();

        let uniforms = PerFrame::try_from_fn(|f| {
            Buffer::new(
                device.clone(),
                BufferUsage::Uniform,
                &format!("lighting uniforms {}", f),
                std::mem::size_of::<LightingUniforms>() as vk::DeviceSize,
            )
        })?;
        let table = BindingTable::create(
            device.clone(),
            &bindings(
                setup.registry,
                ctx.linear_clamp_sampler(),
                PerFrame::from_fn(|f| uniforms.get(f).handle()),
            )?,
        )?;

        let desc = PipelineDesc::fullscreen(
            "Lighting",
            "fullscreen.vert.spv",
            "lighting.frag.spv",
            vec![ResourceId::SceneColor.format(ctx.depth_format())],
        );
        let pipeline =
            PassPipeline::create(device.clone(), ctx.shader_dir(), &desc, &[table.layout()])?;

        self.state.set(Resources {
            pipeline,
            table,
            uniforms,
        });
        Ok(())
    }

    fn update(&mut self, frame: &FrameResources<'_>) -> RhiResult<()> {
        let resources = self.state.get(self.kind())?;
        resources
            .uniforms
            .get(frame.frame_index())
            .write_pod(&LightingUniforms::new(frame.view))
    }

    fn draw(&mut self, cmd: &mut CommandBuffer, frame: &mut FrameResources<'_>) -> RhiResult<()> {
        let kind = self.kind();
        let resources = self.state.get(kind)?;

        let rendering = RenderingConfig::from_extent(frame.render_resolution())
            .with_color_attachment(ColorAttachment::new(
                frame.registry.view(ResourceId::SceneColor)?,
            ));
        begin_pass(cmd, kind, frame.registry, &rendering)?;

        cmd.bind_graphics_pipeline(resources.pipeline.handle());
        resources
            .table
            .bind(cmd, resources.pipeline.layout(), frame.frame_index());
        cmd.draw(3, 0);

        end_pass(cmd);
        Ok(())
    }

    fn cleanup(&mut self) {
        self.state.clean_up();
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;
    use deferred_rhi::barrier::ResourceState;

    use super::*;
    use crate::binding_table::WriteTarget;
    use crate::resource_registry::tests::{Recorded, populated};

    #[test]
    fn test_every_input_is_read_by_the_pass() {
        let reads: Vec<ResourceId> = PassKind::Lighting
            .accesses()
            .iter()
            .filter(|(_, state)| *state != ResourceState::ColorTarget)
            .map(|(id, _)| *id)
            .collect();
        for id in INPUTS {
            assert!(reads.contains(&id), "{:?}", id);
        }
    }

    #[test]
    fn test_bindings_sample_depth_read_only() {
        let mut recorder = Recorded::default();
        let registry = populated(&mut recorder);
        let layout = bindings(
            &registry,
            vk::Sampler::from_raw(9),
            PerFrame::splat(vk::Buffer::from_raw(10)),
        )
        .unwrap();

        assert_eq!(layout.slots().len(), INPUTS.len() + 1);
        let writes = layout.planned_writes();
        let layout_of = |binding: u32| match writes
            .iter()
            .find(|w| w.set_index == 0 && w.binding == binding)
            .map(|w| w.target)
        {
            Some(WriteTarget::Image { layout, .. }) => layout,
            other => panic!("binding {} is {:?}", binding, other),
        };
        assert_eq!(layout_of(0), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(layout_of(3), vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL);
        assert_eq!(layout_of(4), vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn test_uniform_packing() {
        assert_eq!(std::mem::size_of::<LightingUniforms>(), 112);
    }
}
