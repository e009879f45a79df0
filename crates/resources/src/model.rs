//! Model loading from glTF files.
//!
//! Every primitive of every mesh is appended to one shared vertex/index set
//! and described by a [`MeshRange`]. The renderer uploads the arrays into one
//! vertex and one index buffer and draws each range with its material.

use std::path::Path;

use glam::{Vec2, Vec3, Vec4};
use tracing::{debug, info, warn};

use crate::error::{ResourceError, ResourceResult};
use crate::material::Material;

/// A contiguous index range drawn with one material.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeshRange {
    pub material_id: u32,
    pub start_index: u32,
    pub index_count: u32,
}

/// CPU-side model: merged vertex attributes, indices, ranges and materials.
#[derive(Debug, Default, Clone)]
pub struct ModelData {
    pub name: String,
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub tex_coords: Vec<Vec2>,
    pub tangents: Vec<Vec4>,
    pub indices: Vec<u32>,
    pub meshes: Vec<MeshRange>,
    pub materials: Vec<Material>,
    pub aabb_min: Vec3,
    pub aabb_max: Vec3,
}

impl ModelData {
    /// Loads a `.gltf` or `.glb` file.
    pub fn load(path: &Path) -> ResourceResult<Self> {
        if !path.exists() {
            return Err(ResourceError::FileNotFound(path.to_path_buf()));
        }

        info!("Loading model: {}", path.display());
        let (document, buffers, _images) =
            gltf::import(path).map_err(|e| ResourceError::GltfLoad {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let mut model = ModelData {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            materials: document
                .materials()
                .map(|m| {
                    let pbr = m.pbr_metallic_roughness();
                    Material::from_metallic_roughness(
                        pbr.base_color_factor(),
                        pbr.metallic_factor(),
                        pbr.roughness_factor(),
                        m.emissive_factor(),
                    )
                })
                .collect(),
            ..Default::default()
        };
        let mut default_material = None;

        for (mesh_index, mesh) in document.meshes().enumerate() {
            for (primitive_index, primitive) in mesh.primitives().enumerate() {
                if primitive.mode() != gltf::mesh::Mode::Triangles {
                    warn!(
                        "Skipping non-triangle primitive {} of mesh {}",
                        primitive_index, mesh_index
                    );
                    continue;
                }

                let reader = primitive
                    .reader(|buffer| buffers.get(buffer.index()).map(|data| data.0.as_slice()));

                let positions: Vec<Vec3> = reader
                    .read_positions()
                    .ok_or(ResourceError::NoPositionData {
                        mesh: mesh_index,
                        primitive: primitive_index,
                    })?
                    .map(Vec3::from_array)
                    .collect();
                let vertex_count = positions.len();

                let normals: Vec<Vec3> = match reader.read_normals() {
                    Some(normals) => normals.map(Vec3::from_array).collect(),
                    None => vec![Vec3::Y; vertex_count],
                };
                let tex_coords: Vec<Vec2> = match reader.read_tex_coords(0) {
                    Some(coords) => coords.into_f32().map(Vec2::from_array).collect(),
                    None => vec![Vec2::ZERO; vertex_count],
                };
                let tangents: Vec<Vec4> = match reader.read_tangents() {
                    Some(tangents) => tangents.map(Vec4::from_array).collect(),
                    None => vec![Vec4::new(1.0, 0.0, 0.0, 1.0); vertex_count],
                };
                let local_indices: Vec<u32> = match reader.read_indices() {
                    Some(indices) => indices.into_u32().collect(),
                    None => (0..vertex_count as u32).collect(),
                };

                let material_id = match primitive.material().index() {
                    Some(index) => index as u32,
                    None => *default_material.get_or_insert_with(|| {
                        model.materials.push(Material::default());
                        (model.materials.len() - 1) as u32
                    }),
                };

                model.append(
                    material_id,
                    &positions,
                    &normals,
                    &tex_coords,
                    &tangents,
                    &local_indices,
                );
            }
        }

        if model.meshes.is_empty() {
            return Err(ResourceError::NoMeshes(path.to_path_buf()));
        }

        info!(
            "Model '{}' loaded: {} ranges, {} vertices, {} triangles, {} materials",
            model.name,
            model.meshes.len(),
            model.vertex_count(),
            model.triangle_count(),
            model.materials.len()
        );
        Ok(model)
    }

    /// Appends one primitive, rebasing its indices onto the shared arrays.
    pub fn append(
        &mut self,
        material_id: u32,
        positions: &[Vec3],
        normals: &[Vec3],
        tex_coords: &[Vec2],
        tangents: &[Vec4],
        indices: &[u32],
    ) {
        let base_vertex = self.positions.len() as u32;
        let start_index = self.indices.len() as u32;

        self.update_bounds(positions);
        self.positions.extend_from_slice(positions);
        self.normals.extend_from_slice(normals);
        self.tex_coords.extend_from_slice(tex_coords);
        self.tangents.extend_from_slice(tangents);
        self.indices.extend(indices.iter().map(|i| i + base_vertex));

        debug!(
            "Range {}: material {}, {} vertices, {} indices",
            self.meshes.len(),
            material_id,
            positions.len(),
            indices.len()
        );
        self.meshes.push(MeshRange {
            material_id,
            start_index,
            index_count: indices.len() as u32,
        });
    }

    fn update_bounds(&mut self, positions: &[Vec3]) {
        let first = self.positions.is_empty();
        for (i, &p) in positions.iter().enumerate() {
            if first && i == 0 {
                self.aabb_min = p;
                self.aabb_max = p;
            } else {
                self.aabb_min = self.aabb_min.min(p);
                self.aabb_max = self.aabb_max.max(p);
            }
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn center(&self) -> Vec3 {
        (self.aabb_min + self.aabb_max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.aabb_max - self.aabb_min
    }

    /// Material for a range; out-of-range ids fall back to the default.
    pub fn material(&self, material_id: u32) -> Material {
        self.materials
            .get(material_id as usize)
            .copied()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle(offset: f32) -> Vec<Vec3> {
        vec![
            Vec3::new(offset, 0.0, 0.0),
            Vec3::new(offset + 1.0, 0.0, 0.0),
            Vec3::new(offset, 1.0, 0.0),
        ]
    }

    fn append_triangle(model: &mut ModelData, material_id: u32, offset: f32) {
        model.append(
            material_id,
            &triangle(offset),
            &[Vec3::Z; 3],
            &[Vec2::ZERO; 3],
            &[Vec4::X; 3],
            &[0, 1, 2],
        );
    }

    #[test]
    fn test_append_rebases_indices_and_ranges() {
        let mut model = ModelData::default();
        append_triangle(&mut model, 0, 0.0);
        append_triangle(&mut model, 1, 5.0);

        assert_eq!(model.indices, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(
            model.meshes[1],
            MeshRange {
                material_id: 1,
                start_index: 3,
                index_count: 3
            }
        );
        assert_eq!(model.vertex_count(), 6);
        assert_eq!(model.triangle_count(), 2);
    }

    #[test]
    fn test_bounds_cover_all_ranges() {
        let mut model = ModelData::default();
        append_triangle(&mut model, 0, 2.0);
        append_triangle(&mut model, 0, -3.0);

        assert_eq!(model.aabb_min, Vec3::new(-3.0, 0.0, 0.0));
        assert_eq!(model.aabb_max, Vec3::new(3.0, 1.0, 0.0));
        assert_eq!(model.center(), Vec3::new(0.0, 0.5, 0.0));
    }

    #[test]
    fn test_unknown_material_falls_back_to_default() {
        let model = ModelData::default();
        assert_eq!(model.material(7), Material::default());
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = ModelData::load(Path::new("does/not/exist.gltf")).unwrap_err();
        assert!(matches!(err, ResourceError::FileNotFound(_)));
    }
}
