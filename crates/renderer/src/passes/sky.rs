//! Atmospheric scattering into the atmospherics target.
//!
//! One full-screen triangle ray-marches a single-scattering atmosphere
//! (Rayleigh, Mie and an ozone-like absorption layer) around a planet whose
//! surface sits at the world origin's height. The scene depth is sampled to
//! stop rays at opaque geometry.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, UVec4, Vec3, Vec4};

use deferred_rhi::RhiResult;
use deferred_rhi::buffer::{Buffer, BufferUsage};
use deferred_rhi::command::CommandBuffer;
use deferred_rhi::rendering::{ColorAttachment, RenderingConfig};

use super::{DrawPass, FrameResources, PassKind, PassSetup, PassState, begin_pass, end_pass};
use crate::binding_table::{BindingLayout, BindingTable, PerFrame};
use crate::gpu_scene::SceneView;
use crate::pass_pipeline::{PassPipeline, PipelineDesc, push_range};
use crate::resource_registry::ResourceId;

pub const PLANET_RADIUS: f32 = 6340e3;
/// Atmosphere thickness as a fraction of the planet radius.
pub const ATMOSPHERE_SCALE: f32 = 0.015;
pub const RAYLEIGH_BETA: Vec3 = Vec3::new(5.5e-6, 13.0e-6, 22.4e-6);
pub const RAYLEIGH_HEIGHT: f32 = 8e3;
pub const MIE_BETA: Vec3 = Vec3::splat(21e-6);
pub const MIE_HEIGHT: f32 = 1.2e3;
pub const ABSORPTION_BETA: Vec3 = Vec3::new(2.04e-5, 4.97e-5, 1.95e-6);
pub const ABSORPTION_HEIGHT: f32 = 30e3;
pub const ABSORPTION_FALLOFF: f32 = 4e3;
pub const SCATTERING_INTENSITY: f32 = 40.0;
pub const IN_SCATTERING_POINTS: u32 = 16;
pub const OPTICAL_DEPTH_POINTS: u32 = 8;

/// Vertex push constants: camera orientation and projection.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct SkyPushConstants {
    pub view: Mat4,
    pub projection: Mat4,
}

/// Fragment uniform, std140.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct AtmosphereUniforms {
    /// xyz: camera relative to the planet center. w: camera near.
    pub camera_position: Vec4,
    /// xyz: planet center. w: camera far.
    pub planet_center: Vec4,
    /// xyz: direction toward the sun. w: planet radius.
    pub sun_direction: Vec4,
    /// xyz: absorption coefficients. w: absorption layer height.
    pub absorption_beta: Vec4,
    /// xyz: Rayleigh coefficients. w: Rayleigh scale height.
    pub rayleigh_beta: Vec4,
    /// xyz: Mie coefficients. w: Mie scale height.
    pub mie_beta: Vec4,
    /// x: atmosphere radius, y: absorption falloff, z: intensity.
    pub params: Vec4,
    /// x: in-scattering samples, y: optical depth samples.
    pub sample_counts: UVec4,
}

impl AtmosphereUniforms {
    pub fn new(view: &SceneView) -> Self {
        Self {
            camera_position: Vec3::new(0.0, PLANET_RADIUS + view.camera_position.y, 0.0)
                .extend(view.camera_near),
            planet_center: Vec3::ZERO.extend(view.camera_far),
            sun_direction: (-view.light.direction()).extend(PLANET_RADIUS),
            absorption_beta: ABSORPTION_BETA.extend(ABSORPTION_HEIGHT),
            rayleigh_beta: RAYLEIGH_BETA.extend(RAYLEIGH_HEIGHT),
            mie_beta: MIE_BETA.extend(MIE_HEIGHT),
            params: Vec4::new(
                (1.0 + ATMOSPHERE_SCALE) * PLANET_RADIUS,
                ABSORPTION_FALLOFF,
                SCATTERING_INTENSITY,
                0.0,
            ),
            sample_counts: UVec4::new(IN_SCATTERING_POINTS, OPTICAL_DEPTH_POINTS, 0, 0),
        }
    }
}

struct Resources {
    pipeline: PassPipeline,
    table: BindingTable,
    uniforms: PerFrame<Buffer>,
}

#[derive(Default)]
pub struct SkyPass {
    state: PassState<Resources>,
}

impl SkyPass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DrawPass for SkyPass {
    fn kind(&self) -> PassKind {
        PassKind::Sky
    }

    fn init(&mut self, setup: &PassSetup<'_>) -> RhiResult<()> {
        let ctx = setup.context;
        let device = ctx.device();
        let uniform_size = std::mem::size_of::<AtmosphereUniforms>() as vk::DeviceSize;

        let uniforms = PerFrame::try_from_fn(|f| {
            Buffer::new(
                device.clone(),
                BufferUsage::Uniform,
                &format!("atmosphere uniforms {}", f),
                uniform_size,
            )
        })?;
        let table = BindingTable::create(
            device.clone(),
            &BindingLayout::new()
                .add_sampled_image(
                    0,
                    vk::ShaderStageFlags::FRAGMENT,
                    setup.registry.view(ResourceId::Depth)?,
                    ctx.linear_clamp_sampler(),
                    setup.registry.format(ResourceId::Depth)?,
                )
                .add_uniform_buffer(
                    1,
                    vk::ShaderStageFlags::FRAGMENT,
                    PerFrame::from_fn(|f| uniforms.get(f).handle()),
                    uniform_size,
                ),
        )?;

        let desc = PipelineDesc {
            push_constants: Some(push_range::<SkyPushConstants>(vk::ShaderStageFlags::VERTEX)),
            ..PipelineDesc::fullscreen(
                "Sky",
                "sky.vert.spv",
                "sky.frag.spv",
                vec![ResourceId::Atmospherics.format(ctx.depth_format())],
            )
        };
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
            .write_pod(&AtmosphereUniforms::new(frame.view))
    }

    fn draw(&mut self, cmd: &mut CommandBuffer, frame: &mut FrameResources<'_>) -> RhiResult<()> {
        let kind = self.kind();
        let resources = self.state.get(kind)?;

        let rendering = RenderingConfig::from_extent(frame.render_resolution())
            .with_color_attachment(
                ColorAttachment::new(frame.registry.view(ResourceId::Atmospherics)?)
                    .with_clear_color([0.0; 4]),
            );
        begin_pass(cmd, kind, frame.registry, &rendering)?;

        let layout = resources.pipeline.layout();
        cmd.bind_graphics_pipeline(resources.pipeline.handle());
        resources.table.bind(cmd, layout, frame.frame_index());
        cmd.push_constants(
            layout,
            resources.pipeline.push_stages(),
            &SkyPushConstants {
                view: frame.view.rotation_view,
                projection: frame.view.projection,
            },
        );
        cmd.draw(3, 0);

        end_pass(cmd);
        Ok(())
    }

    fn cleanup(&mut self) {
        self.state.clean_up();
    }
}
