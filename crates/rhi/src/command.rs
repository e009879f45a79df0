//! Command pool and command buffer management.
//!
//! - [`CommandPool`] creates and frees command buffers and runs one-shot
//!   submissions for init-time uploads.
//! - [`CommandBuffer`] wraps a `VkCommandBuffer` with the recording calls the
//!   passes use. It also implements [`BarrierRecorder`] so state transitions
//!   can be recorded directly into it.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use deferred_rhi::device::Device;
//! use deferred_rhi::command::CommandPool;
//!
//! # fn example(device: Arc<Device>) -> Result<(), deferred_rhi::RhiError> {
//! let (graphics_family, _) = device.queue_families().resolved().unwrap();
//! let pool = CommandPool::new(device.clone(), graphics_family)?;
//!
//! pool.submit_one_time(device.graphics_queue(), |cmd| {
//!     // record uploads or initial transitions
//!     Ok(())
//! })?;
//! # Ok(())
//! # }
//! ```

use std::ffi::CString;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::barrier::{BarrierRecorder, ImageBarrier};
use crate::device::Device;
use crate::error::RhiResult;

/// Vulkan command pool wrapper.
///
/// Created with `RESET_COMMAND_BUFFER` so each frame slot can reset its own
/// buffer independently.
pub struct CommandPool {
    device: Arc<Device>,
    pool: vk::CommandPool,
    queue_family_index: u32,
}

impl CommandPool {
    pub fn new(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        // SAFETY: the device is live and the family index was validated at
        // device creation.
        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };

        info!(
            "Command pool created for queue family {}",
            queue_family_index
        );

        Ok(Self {
            device,
            pool,
            queue_family_index,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Allocates `count` primary command buffers.
    pub fn allocate_command_buffers(&self, count: u32) -> RhiResult<Vec<CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        // SAFETY: the pool belongs to this device.
        let buffers = unsafe { self.device.handle().allocate_command_buffers(&alloc_info)? };

        Ok(buffers
            .into_iter()
            .map(|buffer| CommandBuffer::from_handle(self.device.clone(), buffer))
            .collect())
    }

    /// Returns command buffers to the pool.
    ///
    /// The buffers must not be pending execution.
    pub fn free_command_buffers(&self, buffers: &[CommandBuffer]) {
        let handles: Vec<vk::CommandBuffer> = buffers.iter().map(CommandBuffer::handle).collect();
        // SAFETY: the buffers came from this pool and are not in flight.
        unsafe {
            self.device
                .handle()
                .free_command_buffers(self.pool, &handles);
        }
    }

    /// Records `record` into a fresh command buffer, submits it to `queue` and
    /// blocks until the queue is idle.
    ///
    /// Used for init-time uploads and initial image transitions only.
    pub fn submit_one_time<R>(
        &self,
        queue: vk::Queue,
        record: impl FnOnce(&mut CommandBuffer) -> RhiResult<R>,
    ) -> RhiResult<R> {
        let mut buffers = self.allocate_command_buffers(1)?;
        let result = self.record_and_wait(queue, &mut buffers[0], record);
        self.free_command_buffers(&buffers);
        result
    }

    fn record_and_wait<R>(
        &self,
        queue: vk::Queue,
        cmd: &mut CommandBuffer,
        record: impl FnOnce(&mut CommandBuffer) -> RhiResult<R>,
    ) -> RhiResult<R> {
        cmd.begin()?;
        let value = record(cmd)?;
        cmd.end()?;

        let buffers = [cmd.handle()];
        let submit_info = vk::SubmitInfo::default().command_buffers(&buffers);

        // SAFETY: the buffer is fully recorded; waiting for queue idle makes
        // it safe to free right after.
        unsafe {
            self.device
                .handle()
                .queue_submit(queue, &[submit_info], vk::Fence::null())?;
            self.device.handle().queue_wait_idle(queue)?;
        }
        debug!("One-time submission completed");

        Ok(value)
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        // SAFETY: no buffer from this pool is pending; owners wait for device
        // idle before teardown.
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
        info!(
            "Command pool destroyed for queue family {}",
            self.queue_family_index
        );
    }
}

/// Vulkan command buffer wrapper.
///
/// Does not own the handle; it is freed with its [`CommandPool`].
pub struct CommandBuffer {
    device: Arc<Device>,
    buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    #[inline]
    pub fn from_handle(device: Arc<Device>, buffer: vk::CommandBuffer) -> Self {
        Self { device, buffer }
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    // =========================================================================
    // Recording Control
    // =========================================================================

    /// Begins recording for a single submission.
    pub fn begin(&self) -> RhiResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        // SAFETY: the buffer is in the initial state (fresh or reset).
        unsafe {
            self.device
                .handle()
                .begin_command_buffer(self.buffer, &begin_info)?;
        }
        Ok(())
    }

    pub fn end(&self) -> RhiResult<()> {
        // SAFETY: the buffer is recording.
        unsafe { self.device.handle().end_command_buffer(self.buffer)? };
        Ok(())
    }

    /// Resets the buffer to the initial state. It must not be pending.
    pub fn reset(&self) -> RhiResult<()> {
        // SAFETY: callers wait on the slot fence first.
        unsafe {
            self.device
                .handle()
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?;
        }
        Ok(())
    }

    // =========================================================================
    // Debug Labels
    // =========================================================================

    /// Opens a debug label region. No-op without validation.
    pub fn begin_label(&self, name: &str, color: [f32; 4]) {
        let Some(debug_utils) = self.device.debug_utils() else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let label = vk::DebugUtilsLabelEXT::default()
            .label_name(&name)
            .color(color);
        // SAFETY: the buffer is recording.
        unsafe { debug_utils.cmd_begin_debug_utils_label(self.buffer, &label) };
    }

    pub fn end_label(&self) {
        if let Some(debug_utils) = self.device.debug_utils() {
            // SAFETY: paired with begin_label on the same buffer.
            unsafe { debug_utils.cmd_end_debug_utils_label(self.buffer) };
        }
    }

    // =========================================================================
    // Dynamic Rendering
    // =========================================================================

    pub fn begin_rendering(&self, rendering_info: &vk::RenderingInfo) {
        // SAFETY: attachments referenced by rendering_info are in attachment
        // layouts, guaranteed by the preceding transitions.
        unsafe {
            self.device
                .handle()
                .cmd_begin_rendering(self.buffer, rendering_info);
        }
    }

    pub fn end_rendering(&self) {
        // SAFETY: paired with begin_rendering.
        unsafe { self.device.handle().cmd_end_rendering(self.buffer) };
    }

    // =========================================================================
    // State Binding
    // =========================================================================

    pub fn bind_graphics_pipeline(&self, pipeline: vk::Pipeline) {
        // SAFETY: the pipeline is live for the duration of the frame.
        unsafe {
            self.device.handle().cmd_bind_pipeline(
                self.buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline,
            );
        }
    }

    pub fn bind_vertex_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize) {
        // SAFETY: the buffer is live for the duration of the frame.
        unsafe {
            self.device
                .handle()
                .cmd_bind_vertex_buffers(self.buffer, 0, &[buffer], &[offset]);
        }
    }

    pub fn bind_index_buffer(&self, buffer: vk::Buffer, index_type: vk::IndexType) {
        // SAFETY: the buffer is live for the duration of the frame.
        unsafe {
            self.device
                .handle()
                .cmd_bind_index_buffer(self.buffer, buffer, 0, index_type);
        }
    }

    pub fn bind_descriptor_set(&self, layout: vk::PipelineLayout, set: vk::DescriptorSet) {
        // SAFETY: the set is compatible with set 0 of layout.
        unsafe {
            self.device.handle().cmd_bind_descriptor_sets(
                self.buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                &[set],
                &[],
            );
        }
    }

    /// Sets viewport and scissor to cover `extent` from the origin.
    pub fn set_viewport_and_scissor(&self, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        // SAFETY: the bound pipeline declares viewport and scissor dynamic.
        unsafe {
            self.device
                .handle()
                .cmd_set_viewport(self.buffer, 0, &[viewport]);
            self.device
                .handle()
                .cmd_set_scissor(self.buffer, 0, &[scissor]);
        }
    }

    /// Pushes a plain-old-data value at offset 0.
    pub fn push_constants<T: bytemuck::Pod>(
        &self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        data: &T,
    ) {
        // SAFETY: layout declares a push constant range covering T for stages.
        unsafe {
            self.device.handle().cmd_push_constants(
                self.buffer,
                layout,
                stages,
                0,
                bytemuck::bytes_of(data),
            );
        }
    }

    // =========================================================================
    // Draw Commands
    // =========================================================================

    pub fn draw(&self, vertex_count: u32, first_vertex: u32) {
        // SAFETY: a graphics pipeline is bound inside a rendering scope.
        unsafe {
            self.device
                .handle()
                .cmd_draw(self.buffer, vertex_count, 1, first_vertex, 0);
        }
    }

    pub fn draw_indexed(&self, index_count: u32, first_index: u32) {
        // SAFETY: vertex and index buffers are bound.
        unsafe {
            self.device
                .handle()
                .cmd_draw_indexed(self.buffer, index_count, 1, first_index, 0, 0);
        }
    }

    // =========================================================================
    // Transfer Commands
    // =========================================================================

    /// Copies the first `size` bytes of `src` into `dst`.
    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) {
        let region = vk::BufferCopy::default().size(size);
        // SAFETY: both buffers are live and at least `size` bytes long.
        unsafe {
            self.device
                .handle()
                .cmd_copy_buffer(self.buffer, src, dst, &[region]);
        }
    }

    /// Makes transfer writes visible to vertex and index fetches.
    pub fn transfer_to_vertex_input_barrier(&self) {
        let barriers = [vk::MemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::COPY)
            .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::VERTEX_INPUT)
            .dst_access_mask(
                vk::AccessFlags2::VERTEX_ATTRIBUTE_READ | vk::AccessFlags2::INDEX_READ,
            )];
        let dependency = vk::DependencyInfo::default().memory_barriers(&barriers);
        // SAFETY: the buffer is recording.
        unsafe {
            self.device
                .handle()
                .cmd_pipeline_barrier2(self.buffer, &dependency);
        }
    }

    /// Copies a tightly packed buffer into mip 0 of a color image in
    /// `TRANSFER_DST_OPTIMAL`.
    pub fn copy_buffer_to_image(&self, src: vk::Buffer, dst: vk::Image, extent: vk::Extent2D) {
        let region = vk::BufferImageCopy::default()
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(0)
                    .layer_count(1),
            )
            .image_extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            });
        // SAFETY: dst is in TRANSFER_DST_OPTIMAL, src holds enough data.
        unsafe {
            self.device.handle().cmd_copy_buffer_to_image(
                self.buffer,
                src,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }

    /// Blits mip `level - 1` (TRANSFER_SRC) into mip `level` (TRANSFER_DST)
    /// at half the size.
    pub fn blit_mip(&self, image: vk::Image, level: u32, src_size: vk::Extent2D) {
        let dst_size = vk::Extent2D {
            width: (src_size.width / 2).max(1),
            height: (src_size.height / 2).max(1),
        };
        let layers = |mip_level| {
            vk::ImageSubresourceLayers::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .mip_level(mip_level)
                .layer_count(1)
        };
        let blit = vk::ImageBlit::default()
            .src_subresource(layers(level - 1))
            .src_offsets([
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: src_size.width as i32,
                    y: src_size.height as i32,
                    z: 1,
                },
            ])
            .dst_subresource(layers(level))
            .dst_offsets([
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: dst_size.width as i32,
                    y: dst_size.height as i32,
                    z: 1,
                },
            ]);
        // SAFETY: the two mips are in the layouts named above.
        unsafe {
            self.device.handle().cmd_blit_image(
                self.buffer,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            );
        }
    }
}

impl BarrierRecorder for CommandBuffer {
    fn record_image_barrier(&mut self, barrier: &ImageBarrier) {
        let barriers = [barrier.to_vk()];
        let dependency = vk::DependencyInfo::default().image_memory_barriers(&barriers);
        // SAFETY: the buffer is recording and the image is live.
        unsafe {
            self.device
                .handle()
                .cmd_pipeline_barrier2(self.buffer, &dependency);
        }
    }
}
