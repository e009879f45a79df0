//! Sun light and its shadow projection.

use glam::{Mat4, Vec3};

use crate::transform::Aabb;

/// Directional sun light positioned in the world for shadow mapping.
///
/// The sun looks from `position` toward `target`. The orthographic shadow
/// frustum is fit around scene bounds in light space, so it is only as tight
/// as those bounds are.
#[derive(Clone, Copy, Debug)]
pub struct SunLight {
    pub position: Vec3,
    pub target: Vec3,
    pub color: Vec3,
    /// Attenuation radius used by the lighting shader.
    pub radius: f32,
    pub intensity: f32,
}

impl Default for SunLight {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 1000.0, 30.0),
            target: Vec3::ZERO,
            color: Vec3::ONE,
            radius: 1500.0,
            intensity: 100.0,
        }
    }
}

impl SunLight {
    pub fn direction(&self) -> Vec3 {
        (self.target - self.position).normalize_or(Vec3::NEG_Y)
    }

    pub fn view_matrix(&self) -> Mat4 {
        let direction = self.direction();
        // Y is degenerate as an up vector when the sun is straight overhead.
        let up = if direction.abs().dot(Vec3::Y) > 0.99 {
            Vec3::Z
        } else {
            Vec3::Y
        };
        Mat4::look_at_rh(self.position, self.position + direction, up)
    }

    /// Orthographic projection enclosing `bounds` as seen from the sun.
    pub fn projection_matrix(&self, bounds: &Aabb) -> Mat4 {
        let light_space = bounds.transformed(&self.view_matrix());
        let (left, right) = padded(light_space.min.x, light_space.max.x);
        let (bottom, top) = padded(light_space.min.y, light_space.max.y);
        // Right-handed view space looks down -Z.
        let (near, far) = padded(-light_space.max.z, -light_space.min.z);
        let mut proj = Mat4::orthographic_rh(left, right, bottom, top, near, far);
        proj.y_axis.y *= -1.0;
        proj
    }

    /// World to shadow clip space.
    pub fn light_matrix(&self, bounds: &Aabb) -> Mat4 {
        self.projection_matrix(bounds) * self.view_matrix()
    }
}

/// Widens a light-space extent so flat bounds never collapse the frustum.
fn padded(min: f32, max: f32) -> (f32, f32) {
    let pad = ((max - min) * 0.01).max(1.0);
    (min - pad, max + pad)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-3;

    fn assert_inside_clip(matrix: &Mat4, bounds: &Aabb) {
        for corner in bounds.corners() {
            let clip = matrix.project_point3(corner);
            assert!(clip.x.abs() <= 1.0 + EPSILON, "x out of range: {:?}", clip);
            assert!(clip.y.abs() <= 1.0 + EPSILON, "y out of range: {:?}", clip);
            assert!(
                (-EPSILON..=1.0 + EPSILON).contains(&clip.z),
                "z out of range: {:?}",
                clip
            );
        }
    }

    #[test]
    fn test_light_matrix_encloses_bounds() {
        let sun = SunLight::default();
        let bounds = Aabb::new(Vec3::new(-200.0, 0.0, -150.0), Vec3::new(250.0, 80.0, 300.0));
        assert_inside_clip(&sun.light_matrix(&bounds), &bounds);
    }

    #[test]
    fn test_overhead_sun_has_valid_view() {
        let sun = SunLight {
            position: Vec3::new(0.0, 2000.0, 0.0),
            ..SunLight::default()
        };
        let view = sun.view_matrix();
        assert!(!view.is_nan());

        let bounds = Aabb::new(Vec3::splat(-10.0), Vec3::splat(10.0));
        assert_inside_clip(&sun.light_matrix(&bounds), &bounds);
    }

    #[test]
    fn test_flat_bounds_under_overhead_sun() {
        let sun = SunLight {
            position: Vec3::new(0.0, 1000.0, 0.0),
            ..SunLight::default()
        };
        let ground = Aabb::new(Vec3::new(-100.0, 0.0, -100.0), Vec3::new(100.0, 0.0, 100.0));
        let matrix = sun.light_matrix(&ground);

        assert!(matrix.is_finite());
        assert_inside_clip(&matrix, &ground);
    }

    #[test]
    fn test_point_bounds_stay_finite() {
        let sun = SunLight::default();
        let point = Aabb::new(Vec3::splat(5.0), Vec3::splat(5.0));
        assert!(sun.light_matrix(&point).is_finite());
    }

    #[test]
    fn test_direction_points_at_target() {
        let sun = SunLight::default();
        let expected = (Vec3::ZERO - sun.position).normalize();
        assert!((sun.direction() - expected).length() < EPSILON);
    }
}
