//! Presentation surface: swapchain creation, acquisition and presentation.
//!
//! Selection of format, present mode, extent and image count is done by the
//! pure [`SwapchainSettings::choose`], so the tie-break rules are testable
//! without a GPU. [`Swapchain`] applies the chosen settings and owns the
//! per-image views.
//!
//! Out-of-date and suboptimal results from [`Swapchain::acquire_next_image`]
//! and [`Swapchain::present`] are returned to the caller unchanged; the frame
//! loop decides to recreate and drop the frame.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;

/// Preferred surface format and color space.
pub const PREFERRED_FORMAT: vk::Format = vk::Format::B8G8R8A8_SRGB;
pub const PREFERRED_COLOR_SPACE: vk::ColorSpaceKHR = vk::ColorSpaceKHR::SRGB_NONLINEAR;

/// What the surface supports for a given physical device.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        // SAFETY: the surface and physical device belong to the same instance.
        let (capabilities, formats, present_modes) = unsafe {
            (
                surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?,
                surface_loader.get_physical_device_surface_formats(physical_device, surface)?,
                surface_loader
                    .get_physical_device_surface_present_modes(physical_device, surface)?,
            )
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, image count {}..{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            capabilities.max_image_count
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Resolved creation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainSettings {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
}

impl SwapchainSettings {
    /// Applies the fixed tie-breaks to `support`.
    ///
    /// `width`/`height` are used only when the surface does not report its
    /// own extent. With `prefer_low_latency` off, FIFO is always chosen.
    pub fn choose(
        support: &SwapchainSupportDetails,
        width: u32,
        height: u32,
        prefer_low_latency: bool,
    ) -> RhiResult<Self> {
        if !support.is_adequate() {
            return Err(RhiError::SwapchainError(
                "Surface offers no formats or present modes".to_string(),
            ));
        }

        Ok(Self {
            surface_format: choose_surface_format(&support.formats),
            present_mode: choose_present_mode(&support.present_modes, prefer_low_latency),
            extent: choose_extent(&support.capabilities, width, height),
            image_count: determine_image_count(&support.capabilities),
        })
    }
}

fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    let preferred = formats
        .iter()
        .find(|f| f.format == PREFERRED_FORMAT && f.color_space == PREFERRED_COLOR_SPACE);

    match preferred {
        Some(&format) => format,
        None => {
            warn!(
                "Preferred surface format unavailable, using {:?}/{:?}",
                formats[0].format, formats[0].color_space
            );
            formats[0]
        }
    }
}

fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    prefer_low_latency: bool,
) -> vk::PresentModeKHR {
    if prefer_low_latency && present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        return vk::PresentModeKHR::MAILBOX;
    }
    // FIFO is the only mode every implementation must support.
    vk::PresentModeKHR::FIFO
}

fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;
    // A max of 0 means unbounded.
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

/// Swapchain plus one color view per image.
pub struct Swapchain {
    device: Arc<Device>,
    swapchain_loader: ash::khr::swapchain::Device,
    surface_loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    settings: SwapchainSettings,
    prefer_low_latency: bool,
}

impl Swapchain {
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
        prefer_low_latency: bool,
    ) -> RhiResult<Self> {
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        let mut swapchain = Self {
            device,
            swapchain_loader,
            surface_loader,
            surface,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            settings: SwapchainSettings {
                surface_format: vk::SurfaceFormatKHR::default(),
                present_mode: vk::PresentModeKHR::FIFO,
                extent: vk::Extent2D::default(),
                image_count: 0,
            },
            prefer_low_latency,
        };
        swapchain.create(width, height)?;
        Ok(swapchain)
    }

    fn create(&mut self, width: u32, height: u32) -> RhiResult<()> {
        let support = SwapchainSupportDetails::query(
            self.device.physical_device(),
            self.surface,
            &self.surface_loader,
        )?;
        let settings = SwapchainSettings::choose(&support, width, height, self.prefer_low_latency)?;

        info!(
            "Creating swapchain: {}x{}, {:?}/{:?}, {:?}, {} images",
            settings.extent.width,
            settings.extent.height,
            settings.surface_format.format,
            settings.surface_format.color_space,
            settings.present_mode,
            settings.image_count
        );

        let families = self.device.queue_families();
        let (graphics_family, present_family) = families
            .resolved()
            .ok_or_else(|| RhiError::SwapchainError("Queue families unresolved".to_string()))?;
        let family_indices = [graphics_family, present_family];

        let (sharing_mode, family_slice) = if graphics_family != present_family {
            (vk::SharingMode::CONCURRENT, family_indices.as_slice())
        } else {
            (vk::SharingMode::EXCLUSIVE, &[][..])
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(settings.image_count)
            .image_format(settings.surface_format.format)
            .image_color_space(settings.surface_format.color_space)
            .image_extent(settings.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(family_slice)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(settings.present_mode)
            .clipped(true);

        // SAFETY: the previous swapchain (if any) was destroyed by cleanup().
        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None)? };
        // SAFETY: the swapchain was just created on this device.
        let images = unsafe { self.swapchain_loader.get_swapchain_images(swapchain)? };

        self.swapchain = swapchain;
        self.images = images;
        self.settings = settings;
        self.image_views = self.create_image_views()?;

        for (index, &image) in self.images.iter().enumerate() {
            self.device
                .set_object_name(image, &format!("swapchain image {}", index));
        }

        info!("Swapchain created with {} images", self.images.len());
        Ok(())
    }

    fn create_image_views(&self) -> RhiResult<Vec<vk::ImageView>> {
        let mut views = Vec::with_capacity(self.images.len());
        for (index, &image) in self.images.iter().enumerate() {
            let create_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.settings.surface_format.format)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .level_count(1)
                        .layer_count(1),
                );

            // SAFETY: the image is owned by the live swapchain.
            let view = unsafe { self.device.handle().create_image_view(&create_info, None) }
                .map_err(|e| {
                    RhiError::SwapchainError(format!("Failed to create view {}: {:?}", index, e))
                })?;
            views.push(view);
        }
        Ok(views)
    }

    fn cleanup(&mut self) {
        for &view in &self.image_views {
            // SAFETY: no pending work references the views (device idle or drop).
            unsafe { self.device.handle().destroy_image_view(view, None) };
        }
        self.image_views.clear();
        self.images.clear();

        if self.swapchain != vk::SwapchainKHR::null() {
            // SAFETY: swapchain images are released together with the swapchain.
            unsafe { self.swapchain_loader.destroy_swapchain(self.swapchain, None) };
            self.swapchain = vk::SwapchainKHR::null();
        }
    }

    /// Waits for the device to go idle, then tears down and rebuilds the
    /// swapchain and its views.
    pub fn recreate(&mut self, width: u32, height: u32) -> RhiResult<()> {
        self.device.wait_idle()?;
        info!("Recreating swapchain for {}x{}", width, height);
        self.cleanup();
        self.create(width, height)
    }

    /// Acquires the next image, signaling `semaphore`. Returns the index and
    /// whether the swapchain is suboptimal.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<(u32, bool), vk::Result> {
        // SAFETY: the semaphore is unsignaled with no pending wait.
        unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        }
    }

    /// Queues `image_index` for presentation after `wait_semaphore`. Returns
    /// `true` when the swapchain is suboptimal.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        // SAFETY: image_index was acquired from this swapchain.
        unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.settings.surface_format.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.settings.extent
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.settings.present_mode
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn image(&self, index: usize) -> vk::Image {
        self.images[index]
    }

    #[inline]
    pub fn image_view(&self, index: usize) -> vk::ImageView {
        self.image_views[index]
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        let extent = self.settings.extent;
        self.cleanup();
        info!("Swapchain destroyed (was {}x{})", extent.width, extent.height);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn support(min: u32, max: u32) -> SwapchainSupportDetails {
        SwapchainSupportDetails {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: min,
                max_image_count: max,
                current_extent: vk::Extent2D {
                    width: 1280,
                    height: 720,
                },
                ..Default::default()
            },
            formats: vec![format(
                vk::Format::B8G8R8A8_SRGB,
                vk::ColorSpaceKHR::SRGB_NONLINEAR,
            )],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        }
    }

    #[test]
    fn test_surface_format_prefers_srgb_pair() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::B8G8R8A8_SRGB
        );
    }

    #[test]
    fn test_surface_format_falls_back_to_first_offered() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::R8G8B8A8_UNORM
        );
    }

    #[test]
    fn test_present_mode_prefers_mailbox() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&modes, true),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::FIFO);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO], true),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_extent_uses_surface_extent_when_defined() {
        let caps = support(2, 3).capabilities;
        let extent = choose_extent(&caps, 640, 480);
        assert_eq!((extent.width, extent.height), (1280, 720));
    }

    #[test]
    fn test_extent_clamps_requested_size() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };
        let extent = choose_extent(&caps, 4000, 50);
        assert_eq!((extent.width, extent.height), (1920, 100));
    }

    #[test]
    fn test_image_count_respects_max() {
        assert_eq!(determine_image_count(&support(2, 0).capabilities), 3);
        assert_eq!(determine_image_count(&support(2, 2).capabilities), 2);
        assert_eq!(determine_image_count(&support(3, 8).capabilities), 4);
    }

    #[test]
    fn test_recreate_with_same_capabilities_keeps_image_count() {
        let support = support(2, 3);
        let first = SwapchainSettings::choose(&support, 1280, 720, true).unwrap();
        let second = SwapchainSettings::choose(&support, 1280, 720, true).unwrap();
        assert_eq!(first.image_count, second.image_count);
        assert_eq!(first, second);
    }

    #[test]
    fn test_inadequate_support_is_an_error() {
        let mut support = support(2, 3);
        support.formats.clear();
        assert!(SwapchainSettings::choose(&support, 1280, 720, true).is_err());
    }
}
