//! Vulkan logical device and queue management.
//!
//! The [`Device`] owns the logical device, the graphics and present queues,
//! the `gpu-allocator` instance, and (when validation is on) the debug-utils
//! device loader used for object names and command labels.
//!
//! # Example
//!
//! ```no_run
//! use deferred_rhi::device::Device;
//! use deferred_rhi::instance::Instance;
//! use deferred_rhi::physical_device::select_physical_device;
//! use ash::vk;
//!
//! let instance = Instance::new(false, &[]).expect("Failed to create instance");
//! let surface: vk::SurfaceKHR = vk::SurfaceKHR::null(); // from the window
//! let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
//!
//! let gpu = select_physical_device(instance.handle(), surface, &surface_loader)
//!     .expect("No suitable GPU found");
//! let device = Device::new(&instance, &gpu).expect("Failed to create logical device");
//! let queue = device.graphics_queue();
//! ```

use std::ffi::CString;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, error, info};

use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices};

/// Required device extensions. Dynamic rendering and synchronization2 are
/// core in 1.3 and enabled through feature structs instead.
const DEVICE_EXTENSIONS: &[&std::ffi::CStr] = &[ash::khr::swapchain::NAME];

/// Vulkan logical device wrapper, shared as `Arc<Device>` by every GPU object.
pub struct Device {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    /// Dropped explicitly before the device is destroyed.
    allocator: ManuallyDrop<Mutex<Allocator>>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    queue_families: QueueFamilyIndices,
    debug_utils: Option<ash::ext::debug_utils::Device>,
}

impl Device {
    /// Creates the logical device with dynamic rendering and synchronization2
    /// enabled, then initializes the memory allocator.
    pub fn new(instance: &Instance, gpu: &PhysicalDeviceInfo) -> RhiResult<Arc<Self>> {
        let (graphics_family, present_family) = gpu.queue_family_pair()?;
        let unique_families = gpu.queue_families.unique_families();
        let queue_priorities = [1.0f32];

        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        debug!("Creating queues for families {:?}", unique_families);

        // DEPTH_ATTACHMENT_OPTIMAL and DEPTH_READ_ONLY_OPTIMAL need this.
        let mut features_1_2 =
            vk::PhysicalDeviceVulkan12Features::default().separate_depth_stencil_layouts(true);
        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);

        let features = vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(gpu.features.sampler_anisotropy == vk::TRUE)
            .wide_lines(gpu.features.wide_lines == vk::TRUE);

        let extension_names: Vec<*const std::ffi::c_char> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features)
            .push_next(&mut features_1_2)
            .push_next(&mut features_1_3);

        // SAFETY: gpu.device was enumerated from this instance; create_info
        // and its chain outlive the call.
        let device = unsafe {
            instance
                .handle()
                .create_device(gpu.device, &create_info, None)?
        };

        info!("Logical device created");

        // SAFETY: both families were requested in queue_create_infos.
        let (graphics_queue, present_queue) = unsafe {
            (
                device.get_device_queue(graphics_family, 0),
                device.get_device_queue(present_family, 0),
            )
        };
        debug!(
            "Queues retrieved: graphics family {}, present family {}",
            graphics_family, present_family
        );

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: gpu.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        info!("GPU memory allocator initialized");

        let debug_utils = instance
            .has_validation()
            .then(|| ash::ext::debug_utils::Device::new(instance.handle(), &device));

        Ok(Arc::new(Self {
            device,
            physical_device: gpu.device,
            properties: gpu.properties,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            graphics_queue,
            present_queue,
            queue_families: gpu.queue_families,
            debug_utils,
        }))
    }

    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    #[inline]
    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    /// Locks the allocator, mapping a poisoned lock to an error.
    pub fn lock_allocator(&self) -> RhiResult<MutexGuard<'_, Allocator>> {
        self.allocator
            .lock()
            .map_err(|_| RhiError::AllocatorPoisoned)
    }

    /// Debug-utils loader, present only when validation is enabled.
    #[inline]
    pub fn debug_utils(&self) -> Option<&ash::ext::debug_utils::Device> {
        self.debug_utils.as_ref()
    }

    /// Attaches a debug name to a Vulkan object. No-op without validation.
    pub fn set_object_name<H: vk::Handle>(&self, handle: H, name: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(handle)
            .object_name(&name);
        // SAFETY: handle is a live object created from this device.
        if let Err(e) = unsafe { debug_utils.set_debug_utils_object_name(&info) } {
            debug!("Failed to name object '{}': {:?}", name.to_string_lossy(), e);
        }
    }

    /// Supported depth/stencil attachment format, tried in order.
    pub fn find_depth_format(
        &self,
        instance: &ash::Instance,
        candidates: &[vk::Format],
    ) -> RhiResult<vk::Format> {
        let required = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            | vk::FormatFeatureFlags::SAMPLED_IMAGE;
        candidates
            .iter()
            .copied()
            .find(|&format| {
                // SAFETY: the physical device belongs to instance.
                let props = unsafe {
                    instance.get_physical_device_format_properties(self.physical_device, format)
                };
                props.optimal_tiling_features.contains(required)
            })
            .ok_or_else(|| RhiError::NoDepthFormat(candidates.to_vec()))
    }

    /// Blocks until all queues are idle.
    pub fn wait_idle(&self) -> RhiResult<()> {
        // SAFETY: the device is live.
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Submits to the graphics queue.
    ///
    /// # Safety
    ///
    /// Command buffers must be fully recorded and the fence unsignaled and not
    /// in use by another submission.
    pub unsafe fn submit_graphics(
        &self,
        submit_infos: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> RhiResult<()> {
        // SAFETY: upheld by the caller.
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, submit_infos, fence)?;
        }
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        // SAFETY: every object created from this device holds an Arc to it,
        // so all of them are gone by now.
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// SAFETY: ash::Device is Send + Sync, the allocator sits behind a Mutex and
// the remaining fields are plain handles.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swapchain_extension_required() {
        assert!(DEVICE_EXTENSIONS.contains(&ash::khr::swapchain::NAME));
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}
