//! Surface materials.
//!
//! [`Material`] is what the loader extracts; [`MaterialRecord`] is its
//! GPU-facing form, pushed as a fragment push constant per mesh.

use bytemuck::{Pod, Zeroable};
use glam::Vec4;

/// Material properties shared by all meshes that reference it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Material {
    pub diffuse: Vec4,
    pub shininess: f32,
    pub metalness: f32,
    pub fresnel: f32,
    pub emission: f32,
    pub transparency: f32,
    pub reflectivity: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            diffuse: Vec4::new(0.8, 0.8, 0.8, 1.0),
            shininess: 32.0,
            metalness: 0.0,
            fresnel: 0.04,
            emission: 0.0,
            transparency: 0.0,
            reflectivity: 0.5,
        }
    }
}

impl Material {
    pub fn with_diffuse(mut self, diffuse: Vec4) -> Self {
        self.diffuse = diffuse;
        self
    }

    /// Maps glTF metallic-roughness factors onto the material table.
    ///
    /// Shininess and reflectivity both fall as roughness rises; dielectrics
    /// keep the common 4% Fresnel reflectance and metals use their base color.
    pub fn from_metallic_roughness(
        base_color: [f32; 4],
        metallic: f32,
        roughness: f32,
        emissive: [f32; 3],
    ) -> Self {
        let smoothness = (1.0 - roughness).clamp(0.0, 1.0);
        let metallic = metallic.clamp(0.0, 1.0);
        let base = Vec4::from_array(base_color);
        let fresnel = 0.04 + (base.truncate().max_element() - 0.04).max(0.0) * metallic;

        Self {
            diffuse: base,
            shininess: 2.0 + smoothness * smoothness * 254.0,
            metalness: metallic,
            fresnel,
            emission: emissive.iter().copied().fold(0.0, f32::max),
            transparency: 1.0 - base.w.clamp(0.0, 1.0),
            reflectivity: smoothness,
        }
    }

    pub fn to_record(&self, uses_albedo_texture: bool) -> MaterialRecord {
        MaterialRecord {
            diffuse: self.diffuse,
            shininess: self.shininess,
            metalness: self.metalness,
            fresnel: self.fresnel,
            emission: self.emission,
            transparency: self.transparency,
            reflectivity: self.reflectivity,
            uses_albedo_texture: u32::from(uses_albedo_texture),
            _pad: 0,
        }
    }
}

/// std430-compatible material block (48 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct MaterialRecord {
    pub diffuse: Vec4,
    pub shininess: f32,
    pub metalness: f32,
    pub fresnel: f32,
    pub emission: f32,
    pub transparency: f32,
    pub reflectivity: f32,
    pub uses_albedo_texture: u32,
    pub _pad: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layout() {
        assert_eq!(std::mem::size_of::<MaterialRecord>(), 48);
        assert_eq!(std::mem::offset_of!(MaterialRecord, shininess), 16);
        assert_eq!(std::mem::offset_of!(MaterialRecord, uses_albedo_texture), 40);
    }

    #[test]
    fn test_record_texture_flag() {
        let material = Material::default();
        assert_eq!(material.to_record(true).uses_albedo_texture, 1);
        assert_eq!(material.to_record(false).uses_albedo_texture, 0);
    }

    #[test]
    fn test_rough_dielectric() {
        let m = Material::from_metallic_roughness([0.5, 0.5, 0.5, 1.0], 0.0, 1.0, [0.0; 3]);
        assert_eq!(m.metalness, 0.0);
        assert_eq!(m.reflectivity, 0.0);
        assert_eq!(m.shininess, 2.0);
        assert!((m.fresnel - 0.04).abs() < 1e-6);
        assert_eq!(m.transparency, 0.0);
    }

    #[test]
    fn test_smooth_metal_and_alpha() {
        let m = Material::from_metallic_roughness([1.0, 0.8, 0.2, 0.25], 1.0, 0.0, [0.0, 2.0, 1.0]);
        assert_eq!(m.reflectivity, 1.0);
        assert_eq!(m.shininess, 256.0);
        assert!((m.fresnel - 1.0).abs() < 1e-6);
        assert!((m.transparency - 0.75).abs() < 1e-6);
        assert_eq!(m.emission, 2.0);
    }
}
