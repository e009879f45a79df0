//! Camera and the fixed orbit that drives it.

use glam::{Mat3, Mat4, Quat, Vec3};

/// Perspective camera.
#[derive(Clone, Debug)]
pub struct Camera {
    pub position: Vec3,
    pub rotation: Quat,
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            rotation: Quat::IDENTITY,
            fov_y: 45.0_f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_perspective(&mut self, fov_y: f32, aspect: f32, near: f32, far: f32) {
        self.fov_y = fov_y;
        self.aspect = aspect;
        self.near = near;
        self.far = far;
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.forward(), Vec3::Y)
    }

    /// View matrix with the translation removed, for sky rendering.
    pub fn rotation_only_view(&self) -> Mat4 {
        Mat4::from_mat3(Mat3::from_mat4(self.view_matrix()))
    }

    pub fn projection_matrix(&self) -> Mat4 {
        let mut proj = Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far);
        // Flip Y for Vulkan clip space
        proj.y_axis.y *= -1.0;
        proj
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }

    pub fn look_at(&mut self, target: Vec3) {
        let to_target = target - self.position;
        if to_target.length_squared() > f32::EPSILON {
            self.rotation = Quat::from_rotation_arc(Vec3::NEG_Z, to_target.normalize());
        }
    }
}

/// Circles the camera around a target at a constant angular speed.
#[derive(Clone, Debug)]
pub struct Orbit {
    pub target: Vec3,
    /// Degrees per second.
    pub speed: f32,
}

impl Orbit {
    pub fn new(target: Vec3, speed: f32) -> Self {
        Self { target, speed }
    }

    /// Rotates `camera` about the vertical axis through the target and
    /// keeps it looking at the target.
    pub fn update(&self, camera: &mut Camera, delta_time: f32) {
        let angle = (self.speed * delta_time).to_radians();
        let offset = Quat::from_rotation_y(angle) * (camera.position - self.target);
        camera.position = self.target + offset;
        camera.look_at(self.target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-4;

    #[test]
    fn test_look_at_points_forward_at_target() {
        let mut camera = Camera::new();
        camera.position = Vec3::new(10.0, 0.0, 0.0);
        camera.look_at(Vec3::ZERO);
        assert!((camera.forward() - Vec3::NEG_X).length() < EPSILON);
    }

    #[test]
    fn test_projection_flips_y() {
        let camera = Camera::new();
        let unflipped = Mat4::perspective_rh(camera.fov_y, camera.aspect, camera.near, camera.far);
        assert_eq!(camera.projection_matrix().y_axis.y, -unflipped.y_axis.y);
    }

    #[test]
    fn test_rotation_only_view_drops_translation() {
        let mut camera = Camera::new();
        camera.position = Vec3::new(3.0, 4.0, 5.0);
        let view = camera.rotation_only_view();
        assert_eq!(view.w_axis.truncate(), Vec3::ZERO);
    }

    #[test]
    fn test_orbit_keeps_distance_to_target() {
        let orbit = Orbit::new(Vec3::ZERO, 90.0);
        let mut camera = Camera::new();
        camera.position = Vec3::new(0.0, 2.0, 10.0);
        let before = camera.position.distance(orbit.target);

        orbit.update(&mut camera, 1.0);

        assert!((camera.position.distance(orbit.target) - before).abs() < EPSILON);
        assert!((camera.position - Vec3::new(10.0, 2.0, 0.0)).length() < 1e-3);
    }
}
