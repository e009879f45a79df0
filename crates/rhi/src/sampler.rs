//! Shared texture samplers.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Addressing behaviour of a [`Sampler`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SamplerKind {
    /// Linear filtering, clamp to an opaque white border. Used for render
    /// targets and the shadow map so lookups outside the map read as lit.
    LinearClampWhiteBorder,
    /// Linear filtering with repeat addressing, for model textures.
    LinearRepeat,
}

impl SamplerKind {
    fn address_mode(self) -> vk::SamplerAddressMode {
        match self {
            SamplerKind::LinearClampWhiteBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
            SamplerKind::LinearRepeat => vk::SamplerAddressMode::REPEAT,
        }
    }

    fn name(self) -> &'static str {
        match self {
            SamplerKind::LinearClampWhiteBorder => "linear clamp sampler",
            SamplerKind::LinearRepeat => "linear repeat sampler",
        }
    }
}

/// RAII wrapper for a `VkSampler`.
pub struct Sampler {
    device: Arc<Device>,
    sampler: vk::Sampler,
    kind: SamplerKind,
}

impl Sampler {
    pub fn new(device: Arc<Device>, kind: SamplerKind) -> RhiResult<Self> {
        let address_mode = kind.address_mode();
        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE);

        // SAFETY: the device is live.
        let sampler = unsafe { device.handle().create_sampler(&create_info, None)? };
        device.set_object_name(sampler, kind.name());
        debug!("Created {}", kind.name());

        Ok(Self {
            device,
            sampler,
            kind,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }

    #[inline]
    pub fn kind(&self) -> SamplerKind {
        self.kind
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        // SAFETY: no descriptor set using this sampler is in flight.
        unsafe { self.device.handle().destroy_sampler(self.sampler, None) };
    }
}
