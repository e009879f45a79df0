//! Vertex formats and their input layouts.
//!
//! - [`Vertex`] - model vertex used by the geometry and shadow passes
//! - [`DebugVertex`] - position and color for the debug line pass
//!
//! Full-screen passes use no vertex input at all; their triangle is
//! generated from `gl_VertexIndex`.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};

/// Binding plus attributes, ready for the pipeline builder.
#[derive(Clone, Debug)]
pub struct VertexLayout {
    pub binding: vk::VertexInputBindingDescription,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

impl VertexLayout {
    pub fn stride(&self) -> u32 {
        self.binding.stride
    }
}

const fn attribute(location: u32, format: vk::Format, offset: u32) -> vk::VertexInputAttributeDescription {
    vk::VertexInputAttributeDescription {
        binding: 0,
        location,
        format,
        offset,
    }
}

fn binding<T>() -> vk::VertexInputBindingDescription {
    vk::VertexInputBindingDescription {
        binding: 0,
        stride: std::mem::size_of::<T>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    }
}

/// Model vertex.
///
/// # Memory Layout
///
/// - Offset 0: position (vec3)
/// - Offset 12: normal (vec3)
/// - Offset 24: tex_coord (vec2)
/// - Offset 32: tangent (vec4, handedness in w)
/// - Offset 48: color (vec4)
/// - Total size: 64 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub tex_coord: Vec2,
    pub tangent: Vec4,
    pub color: Vec4,
}

impl Vertex {
    /// A white vertex with no tangent.
    #[inline]
    pub fn new(position: Vec3, normal: Vec3, tex_coord: Vec2) -> Self {
        Self {
            position,
            normal,
            tex_coord,
            tangent: Vec4::new(1.0, 0.0, 0.0, 1.0),
            color: Vec4::ONE,
        }
    }

    /// All five attributes at locations 0..=4.
    pub fn layout() -> VertexLayout {
        VertexLayout {
            binding: binding::<Self>(),
            attributes: vec![
                attribute(0, vk::Format::R32G32B32_SFLOAT, 0),
                attribute(1, vk::Format::R32G32B32_SFLOAT, 12),
                attribute(2, vk::Format::R32G32_SFLOAT, 24),
                attribute(3, vk::Format::R32G32B32A32_SFLOAT, 32),
                attribute(4, vk::Format::R32G32B32A32_SFLOAT, 48),
            ],
        }
    }

    /// Only the position at location 0, reading the same buffers as
    /// [`layout`](Self::layout). Used by the shadow pass.
    pub fn position_only_layout() -> VertexLayout {
        VertexLayout {
            binding: binding::<Self>(),
            attributes: vec![attribute(0, vk::Format::R32G32B32_SFLOAT, 0)],
        }
    }
}

/// Line vertex for the debug overlay.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct DebugVertex {
    pub position: Vec3,
    pub color: Vec3,
}

impl DebugVertex {
    #[inline]
    pub const fn new(position: Vec3, color: Vec3) -> Self {
        Self { position, color }
    }

    pub fn layout() -> VertexLayout {
        VertexLayout {
            binding: binding::<Self>(),
            attributes: vec![
                attribute(0, vk::Format::R32G32B32_SFLOAT, 0),
                attribute(1, vk::Format::R32G32B32_SFLOAT, 12),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use std::mem::offset_of;

    use super::*;

    #[test]
    fn test_vertex_size_and_offsets() {
        assert_eq!(std::mem::size_of::<Vertex>(), 64);
        assert_eq!(offset_of!(Vertex, position), 0);
        assert_eq!(offset_of!(Vertex, normal), 12);
        assert_eq!(offset_of!(Vertex, tex_coord), 24);
        assert_eq!(offset_of!(Vertex, tangent), 32);
        assert_eq!(offset_of!(Vertex, color), 48);
    }

    #[test]
    fn test_layout_matches_struct() {
        let layout = Vertex::layout();
        assert_eq!(layout.stride(), 64);
        let offsets: Vec<u32> = layout.attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24, 32, 48]);
        let locations: Vec<u32> = layout.attributes.iter().map(|a| a.location).collect();
        assert_eq!(locations, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_position_only_layout_shares_stride() {
        let layout = Vertex::position_only_layout();
        assert_eq!(layout.stride(), Vertex::layout().stride());
        assert_eq!(layout.attributes.len(), 1);
        assert_eq!(layout.attributes[0].format, vk::Format::R32G32B32_SFLOAT);
    }

    #[test]
    fn test_debug_vertex_layout() {
        assert_eq!(std::mem::size_of::<DebugVertex>(), 24);
        let layout = DebugVertex::layout();
        assert_eq!(layout.stride(), 24);
        assert_eq!(layout.attributes[1].offset, 12);
    }

    #[test]
    fn test_vertex_bytes_roundtrip() {
        let vertex = Vertex::new(Vec3::new(1.0, 2.0, 3.0), Vec3::Y, Vec2::new(0.5, 0.25));
        let bytes = bytemuck::bytes_of(&vertex);
        assert_eq!(bytes.len(), 64);
        assert_eq!(*bytemuck::from_bytes::<Vertex>(bytes), vertex);
    }
}
