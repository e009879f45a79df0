//! Synchronization primitives.
//!
//! - [`Semaphore`] - GPU-to-GPU ordering (acquire → render → present)
//! - [`Fence`] - GPU-to-CPU completion of a frame slot
//!
//! [`FRAMES_IN_FLIGHT`] fixes how many frames the CPU may record ahead of the
//! GPU. It is not configurable.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Number of frames recorded ahead of the GPU.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Binary semaphore wrapper.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    pub fn new(device: Arc<Device>, name: &str) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        // SAFETY: the device is live.
        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };
        device.set_object_name(semaphore, name);
        Ok(Self { device, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        // SAFETY: owners wait for device idle before dropping semaphores that
        // may still be pending.
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Fence wrapper.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a fence; `signaled` lets the first wait on a fresh frame slot
    /// return immediately.
    pub fn new(device: Arc<Device>, signaled: bool, name: &str) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);

        // SAFETY: the device is live.
        let fence = unsafe { device.handle().create_fence(&create_info, None)? };
        device.set_object_name(fence, name);
        debug!("Created fence '{}' (signaled={})", name, signaled);

        Ok(Self { device, fence })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks without timeout until the fence is signaled.
    pub fn wait(&self) -> RhiResult<()> {
        // SAFETY: the fence belongs to this device.
        unsafe {
            self.device
                .handle()
                .wait_for_fences(&[self.fence], true, u64::MAX)?
        };
        Ok(())
    }

    /// Returns the fence to the unsignaled state. It must not be pending.
    pub fn reset(&self) -> RhiResult<()> {
        // SAFETY: callers reset only after a successful wait.
        unsafe { self.device.handle().reset_fences(&[self.fence])? };
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        // SAFETY: the fence is not pending; owners wait for idle first.
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_in_flight_is_two() {
        assert_eq!(FRAMES_IN_FLIGHT, 2);
    }

    #[test]
    fn test_sync_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
        assert_send_sync::<Fence>();
    }
}
