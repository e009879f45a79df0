//! GPU image management.
//!
//! [`GpuImage`] owns a 2D image, its memory and a view covering all mips.
//! Render targets, the shadow map and sampled textures all use it.
//!
//! Texture uploads go through a staging buffer and a one-shot submission.
//! When mips are requested each level is produced by blitting from the one
//! above, using only transfer-src/transfer-dst transitions.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error, info};

use crate::barrier::{BarrierRecorder, ImageBarrier, ResourceState, aspect_for_format};
use crate::buffer::{Buffer, BufferUsage};
use crate::command::CommandPool;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Creation parameters for a [`GpuImage`].
#[derive(Clone, Debug)]
pub struct ImageDesc<'a> {
    pub name: &'a str,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub extent: vk::Extent2D,
    pub mip_levels: u32,
}

impl<'a> ImageDesc<'a> {
    /// A single-mip render target.
    pub fn target(
        name: &'a str,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        extent: vk::Extent2D,
    ) -> Self {
        Self {
            name,
            format,
            usage,
            extent,
            mip_levels: 1,
        }
    }
}

/// Number of mips in a full chain for `extent`.
pub fn mip_count(extent: vk::Extent2D) -> u32 {
    u32::BITS - extent.width.max(extent.height).max(1).leading_zeros()
}

/// 2D image with owned memory and view.
///
/// Destruction order: view, image, allocation.
pub struct GpuImage {
    device: Arc<Device>,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    format: vk::Format,
    extent: vk::Extent2D,
    mip_levels: u32,
    name: String,
}

impl GpuImage {
    pub fn new(device: Arc<Device>, desc: &ImageDesc<'_>) -> RhiResult<Self> {
        let vk::Extent2D { width, height } = desc.extent;
        if width == 0 || height == 0 {
            return Err(RhiError::InvalidHandle(format!(
                "Image '{}' must have a non-zero size",
                desc.name
            )));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        // SAFETY: the device is live and image_info is fully initialized.
        let image = unsafe { device.handle().create_image(&image_info, None)? };
        // SAFETY: image was just created from this device.
        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = device
            .lock_allocator()
            .and_then(|mut allocator| {
                allocator
                    .allocate(&AllocationCreateDesc {
                        name: desc.name,
                        requirements,
                        location: MemoryLocation::GpuOnly,
                        linear: false,
                        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                    })
                    .map_err(RhiError::from)
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                // SAFETY: nothing references the image yet.
                unsafe { device.handle().destroy_image(image, None) };
                return Err(e);
            }
        };

        // SAFETY: the allocation satisfies the image's requirements.
        unsafe {
            device
                .handle()
                .bind_image_memory(image, allocation.memory(), allocation.offset())?;
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect_for_format(desc.format))
                    .base_mip_level(0)
                    .level_count(desc.mip_levels)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        // SAFETY: the image is bound to memory.
        let view = unsafe { device.handle().create_image_view(&view_info, None)? };

        device.set_object_name(image, desc.name);
        device.set_object_name(view, &format!("{} view", desc.name));

        debug!(
            "Created image '{}': {}x{} {:?}, {} mip(s)",
            desc.name, width, height, desc.format, desc.mip_levels
        );

        Ok(Self {
            device,
            image,
            view,
            allocation: Some(allocation),
            format: desc.format,
            extent: desc.extent,
            mip_levels: desc.mip_levels,
            name: desc.name.to_string(),
        })
    }

    /// Uploads tightly packed RGBA8 pixels into a new sampled image and
    /// leaves it in [`ResourceState::ShaderReadOnly`].
    pub fn upload_rgba8(
        device: Arc<Device>,
        pool: &CommandPool,
        name: &str,
        extent: vk::Extent2D,
        pixels: &[u8],
        generate_mips: bool,
    ) -> RhiResult<Self> {
        let expected = extent.width as usize * extent.height as usize * 4;
        if pixels.len() != expected {
            return Err(RhiError::InvalidHandle(format!(
                "Texture '{}' has {} bytes, expected {}",
                name,
                pixels.len(),
                expected
            )));
        }

        let mip_levels = if generate_mips { mip_count(extent) } else { 1 };
        let mut usage = vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST;
        if mip_levels > 1 {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }

        let image = Self::new(
            device.clone(),
            &ImageDesc {
                name,
                format: vk::Format::R8G8B8A8_UNORM,
                usage,
                extent,
                mip_levels,
            },
        )?;
        let staging = Buffer::new_with_data(
            device.clone(),
            BufferUsage::Staging,
            &format!("{} staging", name),
            pixels,
        )?;

        pool.submit_one_time(device.graphics_queue(), |cmd| {
            image.barrier(cmd, ResourceState::Undefined, ResourceState::TransferDst, 0, mip_levels)?;
            cmd.copy_buffer_to_image(staging.handle(), image.image, extent);

            let mut size = extent;
            for level in 1..mip_levels {
                image.barrier(cmd, ResourceState::TransferDst, ResourceState::TransferSrc, level - 1, 1)?;
                cmd.blit_mip(image.image, level, size);
                image.barrier(cmd, ResourceState::TransferSrc, ResourceState::TransferDst, level - 1, 1)?;
                size = vk::Extent2D {
                    width: (size.width / 2).max(1),
                    height: (size.height / 2).max(1),
                };
            }

            image.barrier(
                cmd,
                ResourceState::TransferDst,
                ResourceState::ShaderReadOnly,
                0,
                mip_levels,
            )
        })?;

        info!(
            "Uploaded texture '{}': {}x{}, {} mip(s)",
            name, extent.width, extent.height, mip_levels
        );

        Ok(image)
    }

    fn barrier(
        &self,
        recorder: &mut dyn BarrierRecorder,
        from: ResourceState,
        to: ResourceState,
        base_mip: u32,
        count: u32,
    ) -> RhiResult<()> {
        let barrier = ImageBarrier::new(&self.name, self.image, self.format, from, to)?
            .with_mip_range(base_mip, count);
        recorder.record_image_barrier(&barrier);
        Ok(())
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        // SAFETY: owners wait for the device to go idle before dropping
        // images that may be referenced by in-flight work.
        unsafe {
            self.device.handle().destroy_image_view(self.view, None);
            self.device.handle().destroy_image(self.image, None);
        }

        if let Some(allocation) = self.allocation.take() {
            match self.device.lock_allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free image allocation '{}': {:?}", self.name, e);
                    }
                }
                Err(e) => error!("Leaking image allocation '{}': {}", self.name, e),
            }
        }

        debug!("Destroyed image '{}'", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_count() {
        let extent = |width, height| vk::Extent2D { width, height };
        assert_eq!(mip_count(extent(1, 1)), 1);
        assert_eq!(mip_count(extent(2, 2)), 2);
        assert_eq!(mip_count(extent(1024, 1024)), 11);
        assert_eq!(mip_count(extent(1024, 300)), 11);
        assert_eq!(mip_count(extent(5, 3)), 3);
    }

    #[test]
    fn test_target_desc_has_single_mip() {
        let desc = ImageDesc::target(
            "Albedo",
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::COLOR_ATTACHMENT,
            vk::Extent2D {
                width: 64,
                height: 32,
            },
        );
        assert_eq!(desc.mip_levels, 1);
    }
}
