//! GPU buffer management.
//!
//! Buffers allocated through gpu-allocator. Model geometry lives in
//! device-local memory and is filled once through a staging copy
//! ([`Buffer::upload_device_local`]). Uniform, streamed vertex and staging
//! buffers are host-visible and persistently mapped; uniforms are written
//! every frame through [`Buffer::write_pod`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use deferred_rhi::command::CommandPool;
//! use deferred_rhi::device::Device;
//! use deferred_rhi::buffer::{Buffer, BufferUsage};
//!
//! # fn example(device: Arc<Device>, pool: &CommandPool) -> Result<(), deferred_rhi::RhiError> {
//! let indices: [u32; 3] = [0, 1, 2];
//! let index_buffer = Buffer::upload_device_local(
//!     device,
//!     pool,
//!     BufferUsage::Index,
//!     "triangle indices",
//!     bytemuck::cast_slice(&indices),
//! )?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::command::CommandPool;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// What a buffer is bound as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Static model vertices, device-local.
    Vertex,
    /// Static model indices, device-local.
    Index,
    /// Vertices rewritten from the CPU every frame.
    StreamVertex,
    Uniform,
    /// Source of a transfer into an image.
    Staging,
}

impl BufferUsage {
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::StreamVertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    pub fn memory_location(self) -> MemoryLocation {
        match self {
            BufferUsage::Vertex | BufferUsage::Index => MemoryLocation::GpuOnly,
            BufferUsage::StreamVertex | BufferUsage::Uniform | BufferUsage::Staging => {
                MemoryLocation::CpuToGpu
            }
        }
    }

    #[inline]
    pub fn is_host_visible(self) -> bool {
        self.memory_location() == MemoryLocation::CpuToGpu
    }

    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::StreamVertex => "stream vertex",
            BufferUsage::Uniform => "uniform",
            BufferUsage::Staging => "staging",
        }
    }
}

/// GPU buffer with gpu-allocator managed memory, mapped when host-visible.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    usage: BufferUsage,
}

impl Buffer {
    /// Creates a buffer of `size` bytes and names it `name`.
    pub fn new(
        device: Arc<Device>,
        usage: BufferUsage,
        name: &str,
        size: vk::DeviceSize,
    ) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidHandle(format!(
                "Buffer '{}' must not be empty",
                name
            )));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        // SAFETY: the device is live; buffer_info is fully initialized.
        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
        // SAFETY: buffer was just created from this device.
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = device.lock_allocator()?.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: usage.memory_location(),
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                // SAFETY: no memory is bound and nothing references the buffer.
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(e.into());
            }
        };

        // SAFETY: the allocation satisfies the buffer's requirements.
        unsafe {
            device
                .handle()
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())?;
        }

        device.set_object_name(buffer, name);
        debug!("Created {} buffer '{}': {} bytes", usage.name(), name, size);

        Ok(Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            usage,
        })
    }

    /// Creates a device-local buffer sized to `data` and fills it through a
    /// staging buffer in a blocking one-time submission.
    pub fn upload_device_local(
        device: Arc<Device>,
        pool: &CommandPool,
        usage: BufferUsage,
        name: &str,
        data: &[u8],
    ) -> RhiResult<Self> {
        if usage.is_host_visible() {
            return Err(RhiError::InvalidHandle(format!(
                "Buffer '{}' is {} and must be written directly",
                name,
                usage.name()
            )));
        }

        let buffer = Self::new(device.clone(), usage, name, data.len() as vk::DeviceSize)?;
        let staging = Self::new_with_data(
            device.clone(),
            BufferUsage::Staging,
            &format!("{} staging", name),
            data,
        )?;

        pool.submit_one_time(device.graphics_queue(), |cmd| {
            cmd.copy_buffer(staging.handle(), buffer.handle(), buffer.size);
            cmd.transfer_to_vertex_input_barrier();
            Ok(())
        })?;

        debug!("Staged {} bytes into '{}'", data.len(), name);
        Ok(buffer)
    }

    /// Creates a host-visible buffer sized to `data` and copies `data` into it.
    pub fn new_with_data(
        device: Arc<Device>,
        usage: BufferUsage,
        name: &str,
        data: &[u8],
    ) -> RhiResult<Self> {
        let buffer = Self::new(device, usage, name, data.len() as vk::DeviceSize)?;
        buffer.write_data(0, data)?;
        Ok(buffer)
    }

    /// Copies `data` into the mapped memory at `offset`.
    pub fn write_data(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let end = offset + data.len() as vk::DeviceSize;
        if end > self.size {
            return Err(RhiError::InvalidHandle(format!(
                "Write exceeds buffer size: offset {} + data {} > buffer {}",
                offset,
                data.len(),
                self.size
            )));
        }

        let mapped_ptr = self
            .allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .ok_or_else(|| RhiError::InvalidHandle("Buffer memory is not mapped".to_string()))?;

        // SAFETY: the range was bounds-checked above and the memory is host
        // coherent; the GPU is not reading this copy (frame slot fence).
        unsafe {
            let dst = mapped_ptr.as_ptr().cast::<u8>().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }

        Ok(())
    }

    /// Writes one plain-old-data value at offset 0.
    pub fn write_pod<T: bytemuck::Pod>(&self, value: &T) -> RhiResult<()> {
        self.write_data(0, bytemuck::bytes_of(value))
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            match self.device.lock_allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free buffer allocation: {:?}", e);
                    }
                }
                Err(e) => error!("Leaking buffer allocation: {}", e),
            }
        }

        // SAFETY: the buffer is not referenced by any pending command buffer.
        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }

        debug!("Destroyed {} buffer", self.usage.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_flags() {
        assert!(BufferUsage::Vertex
            .to_vk_usage()
            .contains(vk::BufferUsageFlags::VERTEX_BUFFER));
        assert!(BufferUsage::Index
            .to_vk_usage()
            .contains(vk::BufferUsageFlags::INDEX_BUFFER));
        assert!(BufferUsage::Uniform
            .to_vk_usage()
            .contains(vk::BufferUsageFlags::UNIFORM_BUFFER));
        assert_eq!(
            BufferUsage::Staging.to_vk_usage(),
            vk::BufferUsageFlags::TRANSFER_SRC
        );
    }

    #[test]
    fn test_model_geometry_is_device_local() {
        for usage in [BufferUsage::Vertex, BufferUsage::Index] {
            assert_eq!(usage.memory_location(), MemoryLocation::GpuOnly);
            assert!(!usage.is_host_visible());
            assert!(usage
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::TRANSFER_DST));
        }
    }

    #[test]
    fn test_cpu_written_buffers_are_host_visible() {
        for usage in [
            BufferUsage::StreamVertex,
            BufferUsage::Uniform,
            BufferUsage::Staging,
        ] {
            assert_eq!(usage.memory_location(), MemoryLocation::CpuToGpu);
        }
        assert_eq!(
            BufferUsage::StreamVertex.to_vk_usage(),
            vk::BufferUsageFlags::VERTEX_BUFFER
        );
    }
}
