//! Pipeline creation for the draw passes.

use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::info;

use deferred_rhi::RhiResult;
use deferred_rhi::device::Device;
use deferred_rhi::pipeline::{
    CullMode, FrontFace, GraphicsPipelineBuilder, Pipeline, PipelineLayout, PrimitiveTopology,
};
use deferred_rhi::shader::{Shader, ShaderStage};
use deferred_rhi::vertex::VertexLayout;

/// Everything needed to build one pass pipeline.
#[derive(Clone, Debug)]
pub struct PipelineDesc {
    pub name: &'static str,
    /// File names inside the shader directory.
    pub vertex_shader: &'static str,
    pub fragment_shader: &'static str,
    /// `None` for full-screen passes that generate their vertices.
    pub vertex_layout: Option<VertexLayout>,
    pub topology: PrimitiveTopology,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub push_constants: Option<vk::PushConstantRange>,
    pub color_formats: Vec<vk::Format>,
    pub depth_format: Option<vk::Format>,
}

impl PipelineDesc {
    /// A full-screen triangle pass writing `color_formats`, culling nothing.
    pub fn fullscreen(
        name: &'static str,
        vertex_shader: &'static str,
        fragment_shader: &'static str,
        color_formats: Vec<vk::Format>,
    ) -> Self {
        Self {
            name,
            vertex_shader,
            fragment_shader,
            vertex_layout: None,
            topology: PrimitiveTopology::TriangleList,
            cull_mode: CullMode::None,
            front_face: FrontFace::CounterClockwise,
            push_constants: None,
            color_formats,
            depth_format: None,
        }
    }
}

/// A pipeline and its layout.
pub struct PassPipeline {
    // The pipeline must go before its layout.
    pipeline: Pipeline,
    layout: PipelineLayout,
    push_stages: vk::ShaderStageFlags,
}

impl PassPipeline {
    /// Loads both stages from `shader_dir`, builds the layout over
    /// `set_layouts` and the pipeline for dynamic rendering. The shader
    /// modules are released before returning.
    pub fn create(
        device: Arc<Device>,
        shader_dir: &Path,
        desc: &PipelineDesc,
        set_layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Self> {
        let vertex_shader = Shader::from_spirv_file(
            device.clone(),
            &shader_dir.join(desc.vertex_shader),
            ShaderStage::Vertex,
        )?;
        let fragment_shader = Shader::from_spirv_file(
            device.clone(),
            &shader_dir.join(desc.fragment_shader),
            ShaderStage::Fragment,
        )?;

        let push_ranges: Vec<vk::PushConstantRange> = desc.push_constants.into_iter().collect();
        let layout = PipelineLayout::new(device.clone(), set_layouts, &push_ranges)?;

        let mut builder = GraphicsPipelineBuilder::new()
            .vertex_shader(&vertex_shader)
            .fragment_shader(&fragment_shader)
            .topology(desc.topology)
            .cull_mode(desc.cull_mode)
            .front_face(desc.front_face)
            .color_attachment_formats(&desc.color_formats)
            .depth_attachment_format_opt(desc.depth_format)
            .push_constant_range(desc.push_constants);
        if let Some(vertex_layout) = &desc.vertex_layout {
            builder = builder
                .vertex_binding(vertex_layout.binding)
                .vertex_attributes(&vertex_layout.attributes);
        }
        let pipeline = builder.build(device.clone(), &layout)?;

        info!(
            "{} pipeline created ({} + {})",
            desc.name, desc.vertex_shader, desc.fragment_shader
        );

        Ok(Self {
            pipeline,
            layout,
            push_stages: desc
                .push_constants
                .map(|range| range.stage_flags)
                .unwrap_or_default(),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline.handle()
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout.handle()
    }

    /// Stages the push constant range is visible to.
    #[inline]
    pub fn push_stages(&self) -> vk::ShaderStageFlags {
        self.push_stages
    }
}

/// Push constant range of `T` at offset 0.
pub fn push_range<T>(stages: vk::ShaderStageFlags) -> vk::PushConstantRange {
    vk::PushConstantRange {
        stage_flags: stages,
        offset: 0,
        size: std::mem::size_of::<T>() as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fullscreen_desc_has_no_vertex_input() {
        let desc = PipelineDesc::fullscreen(
            "composite",
            "fullscreen.vert.spv",
            "composite.frag.spv",
            vec![vk::Format::B8G8R8A8_SRGB],
        );
        assert!(desc.vertex_layout.is_none());
        assert!(desc.depth_format.is_none());
        assert_eq!(desc.cull_mode, CullMode::None);
    }

    #[test]
    fn test_push_range_covers_type() {
        let range = push_range::<[f32; 32]>(vk::ShaderStageFlags::VERTEX);
        assert_eq!(range.offset, 0);
        assert_eq!(range.size, 128);
        assert_eq!(range.stage_flags, vk::ShaderStageFlags::VERTEX);
    }
}
