//! GPU copies of the loaded models and the per-frame view of the scene.

use ash::vk;
use glam::{Mat4, Vec3};
use tracing::{debug, info};

use deferred_resources::{MaterialRecord, ModelData, TextureData};
use deferred_rhi::RhiResult;
use deferred_rhi::buffer::{Buffer, BufferUsage};
use deferred_rhi::image::GpuImage;
use deferred_rhi::vertex::Vertex;
use deferred_scene::{Aabb, Camera, SunLight, Transform};

use crate::context::GraphicsContext;

/// One index range and the material it is drawn with.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawRange {
    pub start_index: u32,
    pub index_count: u32,
    pub material: MaterialRecord,
}

/// A model uploaded into one vertex and one index buffer.
///
/// Models without a texture get a 1x1 white albedo so every model binds the
/// same slots; their material records carry `uses_albedo_texture = 0`.
pub struct GpuModel {
    name: String,
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    ranges: Vec<DrawRange>,
    albedo: GpuImage,
    pub transform: Transform,
    local_bounds: Aabb,
}

impl GpuModel {
    pub fn upload(
        ctx: &GraphicsContext,
        model: &ModelData,
        texture: Option<&TextureData>,
        transform: Transform,
    ) -> RhiResult<Self> {
        let vertices: Vec<Vertex> = (0..model.vertex_count())
            .map(|i| Vertex {
                tangent: model.tangents[i],
                ..Vertex::new(model.positions[i], model.normals[i], model.tex_coords[i])
            })
            .collect();

        let vertex_buffer = Buffer::upload_device_local(
            ctx.device().clone(),
            ctx.command_pool(),
            BufferUsage::Vertex,
            &format!("{} vertices", model.name),
            bytemuck::cast_slice(&vertices),
        )?;
        let index_buffer = Buffer::upload_device_local(
            ctx.device().clone(),
            ctx.command_pool(),
            BufferUsage::Index,
            &format!("{} indices", model.name),
            bytemuck::cast_slice(&model.indices),
        )?;

        let has_texture = texture.is_some();
        let fallback;
        let albedo_data = match texture {
            Some(texture) => texture,
            None => {
                fallback = TextureData::white();
                &fallback
            }
        };
        let albedo = GpuImage::upload_rgba8(
            ctx.device().clone(),
            ctx.command_pool(),
            &format!("{} albedo ({})", model.name, albedo_data.name),
            vk::Extent2D {
                width: albedo_data.width,
                height: albedo_data.height,
            },
            &albedo_data.pixels,
            has_texture && ctx.generate_mipmaps(),
        )?;

        let ranges = model
            .meshes
            .iter()
            .map(|mesh| DrawRange {
                start_index: mesh.start_index,
                index_count: mesh.index_count,
                material: model.material(mesh.material_id).to_record(has_texture),
            })
            .collect::<Vec<_>>();

        info!(
            "Uploaded model '{}': {} vertices, {} indices, {} range(s), textured: {}",
            model.name,
            vertices.len(),
            model.indices.len(),
            ranges.len(),
            has_texture
        );

        Ok(Self {
            name: model.name.clone(),
            vertex_buffer,
            index_buffer,
            ranges,
            albedo,
            transform,
            local_bounds: Aabb::new(model.aabb_min, model.aabb_max),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertex_buffer.handle()
    }

    #[inline]
    pub fn index_buffer(&self) -> vk::Buffer {
        self.index_buffer.handle()
    }

    #[inline]
    pub fn ranges(&self) -> &[DrawRange] {
        &self.ranges
    }

    #[inline]
    pub fn albedo_view(&self) -> vk::ImageView {
        self.albedo.view()
    }

    #[inline]
    pub fn albedo_format(&self) -> vk::Format {
        self.albedo.format()
    }

    pub fn world_matrix(&self) -> Mat4 {
        self.transform.matrix()
    }

    pub fn world_bounds(&self) -> Aabb {
        self.local_bounds.transformed(&self.world_matrix())
    }
}

/// Every model drawn this run.
#[derive(Default)]
pub struct GpuScene {
    models: Vec<GpuModel>,
}

impl GpuScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, model: GpuModel) {
        debug!("Scene model {}: {}", self.models.len(), model.name());
        self.models.push(model);
    }

    #[inline]
    pub fn models(&self) -> &[GpuModel] {
        &self.models
    }

    /// Union of all model bounds in world space.
    pub fn bounds(&self) -> Option<Aabb> {
        self.models
            .iter()
            .map(GpuModel::world_bounds)
            .reduce(|a, b| a.union(&b))
    }
}

/// Camera and light values derived once per frame.
#[derive(Clone, Copy, Debug)]
pub struct SceneView {
    pub view: Mat4,
    pub projection: Mat4,
    /// View with the translation removed, for the sky.
    pub rotation_view: Mat4,
    pub camera_position: Vec3,
    pub camera_near: f32,
    pub camera_far: f32,
    pub light: SunLight,
    /// World to shadow-map clip space.
    pub light_matrix: Mat4,
}

impl SceneView {
    pub fn new(camera: &Camera, light: &SunLight, scene_bounds: &Aabb) -> Self {
        Self {
            view: camera.view_matrix(),
            projection: camera.projection_matrix(),
            rotation_view: camera.rotation_only_view(),
            camera_position: camera.position,
            camera_near: camera.near,
            camera_far: camera.far,
            light: *light,
            light_matrix: light.light_matrix(scene_bounds),
        }
    }
}
