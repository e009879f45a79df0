//! Procedural models used when no asset is configured.

use glam::{Vec2, Vec3, Vec4};

use crate::material::Material;
use crate::model::ModelData;

/// Flat square on the XZ plane centered at the origin, facing +Y.
pub fn ground_plane(half_extent: f32, material: Material) -> ModelData {
    let h = half_extent;
    let positions = [
        Vec3::new(-h, 0.0, -h),
        Vec3::new(h, 0.0, -h),
        Vec3::new(h, 0.0, h),
        Vec3::new(-h, 0.0, h),
    ];
    let tex_coords = [
        Vec2::new(0.0, 0.0),
        Vec2::new(1.0, 0.0),
        Vec2::new(1.0, 1.0),
        Vec2::new(0.0, 1.0),
    ];

    let mut model = named("ground plane", material);
    model.append(
        0,
        &positions,
        &[Vec3::Y; 4],
        &tex_coords,
        &[Vec4::new(1.0, 0.0, 0.0, 1.0); 4],
        // Counter-clockwise seen from above.
        &[0, 2, 1, 0, 3, 2],
    );
    model
}

/// Axis-aligned cube with the given half extent, one quad per face.
pub fn cube(half_extent: f32, material: Material) -> ModelData {
    let faces: [(Vec3, Vec3, Vec3); 6] = [
        (Vec3::X, Vec3::NEG_Z, Vec3::Y),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        (Vec3::Y, Vec3::X, Vec3::NEG_Z),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        (Vec3::Z, Vec3::X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
    ];

    let mut positions = Vec::with_capacity(24);
    let mut normals = Vec::with_capacity(24);
    let mut tex_coords = Vec::with_capacity(24);
    let mut tangents = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    for (normal, right, up) in faces {
        let base = positions.len() as u32;
        let center = normal * half_extent;
        for (u, v) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            positions.push(center + (right * u + up * v) * half_extent);
            normals.push(normal);
            tex_coords.push(Vec2::new((u + 1.0) * 0.5, (1.0 - v) * 0.5));
            tangents.push(right.extend(1.0));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    let mut model = named("cube", material);
    model.append(0, &positions, &normals, &tex_coords, &tangents, &indices);
    model
}

fn named(name: &str, material: Material) -> ModelData {
    ModelData {
        name: name.to_string(),
        materials: vec![material],
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ground_plane() {
        let plane = ground_plane(10.0, Material::default());
        assert_eq!(plane.vertex_count(), 4);
        assert_eq!(plane.triangle_count(), 2);
        assert_eq!(plane.aabb_min, Vec3::new(-10.0, 0.0, -10.0));
        assert_eq!(plane.aabb_max, Vec3::new(10.0, 0.0, 10.0));
    }

    #[test]
    fn test_cube_faces_wind_outward() {
        let cube = cube(1.0, Material::default());
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.triangle_count(), 12);
        assert_eq!(cube.size(), Vec3::splat(2.0));

        for tri in cube.indices.chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|i| cube.positions[tri[i] as usize]);
            let face_normal = (b - a).cross(c - a).normalize();
            let vertex_normal = cube.normals[tri[0] as usize];
            assert!(face_normal.dot(vertex_normal) > 0.99);
        }
    }

    #[test]
    fn test_plane_winds_upward() {
        let plane = ground_plane(1.0, Material::default());
        let tri = &plane.indices[0..3];
        let [a, b, c] = [0, 1, 2].map(|i| plane.positions[tri[i] as usize]);
        assert!((b - a).cross(c - a).normalize().dot(Vec3::Y) > 0.99);
    }
}
