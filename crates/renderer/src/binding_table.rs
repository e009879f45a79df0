//! Shader binding tables: one descriptor layout plus one fully written set
//! per frame in flight.
//!
//! A [`BindingLayout`] is the ordered list of slots a pass declares. It is
//! plain data: pool sizing and the full list of descriptor writes are pure
//! functions of it. [`BindingTable::create`] turns a layout into Vulkan
//! objects, writing every slot of every set once up front. Afterwards only
//! the contents of the uniform buffers change; drawing selects the set for
//! the current frame index.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use deferred_rhi::RhiResult;
use deferred_rhi::barrier::ResourceState;
use deferred_rhi::command::CommandBuffer;
use deferred_rhi::descriptor::{
    DescriptorBindingBuilder, DescriptorPool, DescriptorSetLayout, buffer_info, image_info,
    pool_sizes_for, update_descriptor_sets,
};
use deferred_rhi::device::Device;
use deferred_rhi::sync::FRAMES_IN_FLIGHT;

/// One value per frame in flight, selected by frame index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PerFrame<T> {
    items: Vec<T>,
}

impl<T> PerFrame<T> {
    pub fn from_fn(f: impl FnMut(usize) -> T) -> Self {
        Self {
            items: (0..FRAMES_IN_FLIGHT).map(f).collect(),
        }
    }

    pub fn try_from_fn<E>(f: impl FnMut(usize) -> Result<T, E>) -> Result<Self, E> {
        Ok(Self {
            items: (0..FRAMES_IN_FLIGHT).map(f).collect::<Result<_, E>>()?,
        })
    }

    /// The copy used by frame `frame_index`.
    #[inline]
    pub fn get(&self, frame_index: usize) -> &T {
        &self.items[frame_index]
    }

    #[inline]
    pub fn get_mut(&mut self, frame_index: usize) -> &mut T {
        &mut self.items[frame_index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T: Clone> PerFrame<T> {
    /// The same value for every frame.
    pub fn splat(value: T) -> Self {
        Self::from_fn(|_| value.clone())
    }
}

/// What a slot is fed from.
#[derive(Clone, Debug, PartialEq)]
pub enum BindingSource {
    UniformBuffer {
        buffers: PerFrame<vk::Buffer>,
        range: vk::DeviceSize,
    },
    SampledImage {
        view: vk::ImageView,
        sampler: vk::Sampler,
        format: vk::Format,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct BindingSlot {
    pub binding: u32,
    pub stages: vk::ShaderStageFlags,
    pub source: BindingSource,
}

/// The resource one descriptor write points at.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum WriteTarget {
    Buffer {
        buffer: vk::Buffer,
        range: vk::DeviceSize,
    },
    Image {
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    },
}

/// One descriptor write, before it is turned into a `VkWriteDescriptorSet`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlannedWrite {
    pub set_index: usize,
    pub binding: u32,
    pub target: WriteTarget,
}

/// Ordered slot list of one table.
///
/// Slot numbers are assigned by the caller and must be unique and
/// contiguous; layout creation rejects anything else.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BindingLayout {
    slots: Vec<BindingSlot>,
}

impl BindingLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a uniform buffer slot backed by one buffer per frame in flight.
    pub fn add_uniform_buffer(
        mut self,
        binding: u32,
        stages: vk::ShaderStageFlags,
        buffers: PerFrame<vk::Buffer>,
        range: vk::DeviceSize,
    ) -> Self {
        self.slots.push(BindingSlot {
            binding,
            stages,
            source: BindingSource::UniformBuffer { buffers, range },
        });
        self
    }

    /// Adds a combined image sampler slot. Depth formats are bound in the
    /// depth read-only layout, everything else in shader read-only.
    pub fn add_sampled_image(
        mut self,
        binding: u32,
        stages: vk::ShaderStageFlags,
        view: vk::ImageView,
        sampler: vk::Sampler,
        format: vk::Format,
    ) -> Self {
        self.slots.push(BindingSlot {
            binding,
            stages,
            source: BindingSource::SampledImage {
                view,
                sampler,
                format,
            },
        });
        self
    }

    pub fn slots(&self) -> &[BindingSlot] {
        &self.slots
    }

    pub fn descriptor_bindings(&self) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        self.slots
            .iter()
            .map(|slot| match slot.source {
                BindingSource::UniformBuffer { .. } => {
                    DescriptorBindingBuilder::uniform_buffer(slot.binding, slot.stages)
                }
                BindingSource::SampledImage { .. } => {
                    DescriptorBindingBuilder::combined_image_sampler(slot.binding, slot.stages)
                }
            })
            .collect()
    }

    /// Pool sizes for all sets: each descriptor type counted once per slot
    /// per frame in flight.
    pub fn pool_sizes(&self) -> Vec<vk::DescriptorPoolSize> {
        pool_sizes_for(&self.descriptor_bindings(), FRAMES_IN_FLIGHT as u32)
    }

    /// Every write for every set. Set `f` references uniform copy `f`.
    pub fn planned_writes(&self) -> Vec<PlannedWrite> {
        (0..FRAMES_IN_FLIGHT)
            .flat_map(|set_index| {
                self.slots.iter().map(move |slot| PlannedWrite {
                    set_index,
                    binding: slot.binding,
                    target: match &slot.source {
                        BindingSource::UniformBuffer { buffers, range } => WriteTarget::Buffer {
                            buffer: *buffers.get(set_index),
                            range: *range,
                        },
                        BindingSource::SampledImage {
                            view,
                            sampler,
                            format,
                        } => WriteTarget::Image {
                            view: *view,
                            sampler: *sampler,
                            layout: ResourceState::sampled_state_for(*format).layout(),
                        },
                    },
                })
            })
            .collect()
    }
}

/// Descriptor layout, pool and per-frame sets of one table.
pub struct BindingTable {
    // Sets are freed with the pool; the layout may go after it.
    _pool: DescriptorPool,
    layout: DescriptorSetLayout,
    sets: PerFrame<vk::DescriptorSet>,
}

impl BindingTable {
    /// Builds the layout, a pool sized for every frame's copy, allocates one
    /// set per frame and writes every slot into every set.
    pub fn create(device: Arc<Device>, bindings: &BindingLayout) -> RhiResult<Self> {
        let layout = DescriptorSetLayout::new(device.clone(), &bindings.descriptor_bindings())?;
        let pool = DescriptorPool::new(
            device.clone(),
            FRAMES_IN_FLIGHT as u32,
            &bindings.pool_sizes(),
        )?;
        let allocated = pool.allocate(&[layout.handle(); FRAMES_IN_FLIGHT])?;
        let sets = PerFrame::from_fn(|f| allocated[f]);

        let planned = bindings.planned_writes();
        let buffer_infos: Vec<vk::DescriptorBufferInfo> = planned
            .iter()
            .map(|write| match write.target {
                WriteTarget::Buffer { buffer, range } => buffer_info(buffer, range),
                WriteTarget::Image { .. } => vk::DescriptorBufferInfo::default(),
            })
            .collect();
        let image_infos: Vec<vk::DescriptorImageInfo> = planned
            .iter()
            .map(|write| match write.target {
                WriteTarget::Image {
                    view,
                    sampler,
                    layout,
                } => image_info(sampler, view, layout),
                WriteTarget::Buffer { .. } => vk::DescriptorImageInfo::default(),
            })
            .collect();

        let writes: Vec<vk::WriteDescriptorSet> = planned
            .iter()
            .enumerate()
            .map(|(i, write)| {
                let base = vk::WriteDescriptorSet::default()
                    .dst_set(*sets.get(write.set_index))
                    .dst_binding(write.binding)
                    .dst_array_element(0);
                match write.target {
                    WriteTarget::Buffer { .. } => base
                        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                        .buffer_info(std::slice::from_ref(&buffer_infos[i])),
                    WriteTarget::Image { .. } => base
                        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                        .image_info(std::slice::from_ref(&image_infos[i])),
                }
            })
            .collect();
        update_descriptor_sets(&device, &writes);

        debug!(
            "Binding table created: {} slot(s) x {} set(s)",
            bindings.slots().len(),
            FRAMES_IN_FLIGHT
        );

        Ok(Self {
            _pool: pool,
            layout,
            sets,
        })
    }

    #[inline]
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout.handle()
    }

    /// The set drawing at `frame_index` uses.
    #[inline]
    pub fn set_for(&self, frame_index: usize) -> vk::DescriptorSet {
        *self.sets.get(frame_index)
    }

    /// Binds the set for `frame_index` at set 0.
    pub fn bind(&self, cmd: &CommandBuffer, pipeline_layout: vk::PipelineLayout, frame_index: usize) {
        cmd.bind_descriptor_set(pipeline_layout, self.set_for(frame_index));
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;

    fn buffer(raw: u64) -> vk::Buffer {
        vk::Buffer::from_raw(raw)
    }

    fn lighting_like() -> BindingLayout {
        let mut layout = BindingLayout::new();
        for (binding, format) in [
            vk::Format::R16G16B16A16_SFLOAT,
            vk::Format::R8G8B8A8_UNORM,
            vk::Format::D32_SFLOAT,
        ]
        .into_iter()
        .enumerate()
        {
            layout = layout.add_sampled_image(
                binding as u32,
                vk::ShaderStageFlags::FRAGMENT,
                vk::ImageView::from_raw(100 + binding as u64),
                vk::Sampler::from_raw(9),
                format,
            );
        }
        layout.add_uniform_buffer(
            3,
            vk::ShaderStageFlags::FRAGMENT,
            PerFrame::from_fn(|f| buffer(10 + f as u64)),
            64,
        )
    }

    #[test]
    fn test_per_frame_selects_by_index() {
        let copies = PerFrame::from_fn(|f| f * 10);
        // Selection does not depend on call order.
        assert_eq!(*copies.get(1), 10);
        assert_eq!(*copies.get(0), 0);
        assert_eq!(*copies.get(1), 10);
        assert_eq!(copies.iter().count(), FRAMES_IN_FLIGHT);
    }

    #[test]
    fn test_try_from_fn_propagates_errors() {
        let result: Result<PerFrame<u32>, &str> =
            PerFrame::try_from_fn(|f| if f == 1 { Err("second") } else { Ok(0) });
        assert_eq!(result.unwrap_err(), "second");
    }

    #[test]
    fn test_pool_sizes_scale_with_frames() {
        let sizes = lighting_like().pool_sizes();
        let count = |ty| {
            sizes
                .iter()
                .find(|size| size.ty == ty)
                .map(|size| size.descriptor_count)
        };
        assert_eq!(
            count(vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
            Some(3 * FRAMES_IN_FLIGHT as u32)
        );
        assert_eq!(
            count(vk::DescriptorType::UNIFORM_BUFFER),
            Some(FRAMES_IN_FLIGHT as u32)
        );
    }

    #[test]
    fn test_set_f_references_uniform_copy_f() {
        let writes = lighting_like().planned_writes();
        assert_eq!(writes.len(), 4 * FRAMES_IN_FLIGHT);

        for frame in 0..FRAMES_IN_FLIGHT {
            let uniform = writes
                .iter()
                .find(|w| w.set_index == frame && w.binding == 3)
                .unwrap();
            assert_eq!(
                uniform.target,
                WriteTarget::Buffer {
                    buffer: buffer(10 + frame as u64),
                    range: 64
                }
            );
        }
    }

    #[test]
    fn test_depth_images_bind_read_only_depth() {
        let writes = lighting_like().planned_writes();
        let layout_of = |binding| match writes.iter().find(|w| w.binding == binding).unwrap().target {
            WriteTarget::Image { layout, .. } => layout,
            WriteTarget::Buffer { .. } => panic!("binding {} is not an image", binding),
        };
        assert_eq!(layout_of(0), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(layout_of(2), vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn test_shared_buffer_repeats_across_sets() {
        let layout = BindingLayout::new().add_uniform_buffer(
            0,
            vk::ShaderStageFlags::VERTEX,
            PerFrame::splat(buffer(5)),
            16,
        );
        let writes = layout.planned_writes();
        assert!(writes.iter().all(|w| matches!(
            w.target,
            WriteTarget::Buffer { buffer: b, .. } if b == buffer(5)
        )));
        let bindings = layout.descriptor_bindings();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
    }
}
