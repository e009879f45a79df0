//! Immediate-mode line collector for the debug overlay.

use glam::Vec3;

use deferred_rhi::vertex::DebugVertex;
use deferred_scene::Aabb;

/// Lines submitted during one frame, drawn by the debug pass and cleared
/// when the frame ends.
#[derive(Debug, Default)]
pub struct DebugLines {
    vertices: Vec<DebugVertex>,
}

impl DebugLines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draw_line(&mut self, from: Vec3, to: Vec3, color: Vec3) {
        self.vertices.push(DebugVertex::new(from, color));
        self.vertices.push(DebugVertex::new(to, color));
    }

    /// The twelve edges of the box spanned by `min` and `max`.
    pub fn draw_aabb(&mut self, min: Vec3, max: Vec3, color: Vec3) {
        let corners = Aabb::new(min, max).corners();
        for (a, b) in AABB_EDGES {
            self.draw_line(corners[a], corners[b], color);
        }
    }

    #[inline]
    pub fn vertices(&self) -> &[DebugVertex] {
        &self.vertices
    }

    #[inline]
    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn clear(&mut self) {
        self.vertices.clear();
    }
}

// Corner indices follow `Aabb::corners`: bit 0 selects x, bit 1 y, bit 2 z.
const AABB_EDGES: [(usize, usize); 12] = [
    (0, 1),
    (2, 3),
    (4, 5),
    (6, 7),
    (0, 2),
    (1, 3),
    (4, 6),
    (5, 7),
    (0, 4),
    (1, 5),
    (2, 6),
    (3, 7),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_adds_two_vertices() {
        let mut lines = DebugLines::new();
        lines.draw_line(Vec3::ZERO, Vec3::X, Vec3::Y);
        assert_eq!(lines.vertex_count(), 2);
        assert_eq!(lines.vertices()[1].position, Vec3::X);
        assert_eq!(lines.vertices()[1].color, Vec3::Y);
    }

    #[test]
    fn test_aabb_edges_are_axis_aligned() {
        let mut lines = DebugLines::new();
        lines.draw_aabb(Vec3::ZERO, Vec3::ONE, Vec3::ONE);
        assert_eq!(lines.vertex_count(), 24);

        for pair in lines.vertices().chunks(2) {
            let delta = (pair[1].position - pair[0].position).abs();
            assert_eq!(delta.element_sum(), 1.0, "edge {:?}", pair);
            assert_eq!(delta.max_element(), 1.0);
        }
    }

    #[test]
    fn test_clear() {
        let mut lines = DebugLines::new();
        lines.draw_aabb(Vec3::NEG_ONE, Vec3::ONE, Vec3::X);
        lines.clear();
        assert!(lines.is_empty());
    }
}
