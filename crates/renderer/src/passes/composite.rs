//! Copies scene color onto the acquired swapchain image.
//!
//! The swapchain image is not a registry resource: its contents are
//! discarded every frame, so it is tracked from `Undefined` here and left in
//! `PresentReady` for presentation.

use ash::vk;

use deferred_rhi::RhiResult;
use deferred_rhi::barrier::{ResourceState, StateTracker};
use deferred_rhi::command::CommandBuffer;
use deferred_rhi::rendering::{ColorAttachment, RenderingConfig};

use super::{DrawPass, FrameResources, PassKind, PassSetup, PassState, end_pass, open_rendering};
use crate::binding_table::{BindingLayout, BindingTable};
use crate::pass_pipeline::{PassPipeline, PipelineDesc};
use crate::resource_registry::ResourceId;

struct Resources {
    pipeline: PassPipeline,
    table: BindingTable,
}

#[derive(Default)]
pub struct CompositePass {
    state: PassState<Resources>,
}

impl CompositePass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DrawPass for CompositePass {
    fn kind(&self) -> PassKind {
        PassKind::Composite
    }

    fn init(&mut self, setup: &PassSetup<'_>) -> RhiResult<()> {
        let ctx = setup.context;
        let device = ctx.device();

        let table = BindingTable::create(
            device.clone(),
            &BindingLayout::new().add_sampled_image(
                0,
                vk::ShaderStageFlags::FRAGMENT,
                setup.registry.view(ResourceId::SceneColor)?,
                ctx.linear_clamp_sampler(),
                setup.registry.format(ResourceId::SceneColor)?,
            ),
        )?;
        let desc = PipelineDesc::fullscreen(
            "Composite",
            "fullscreen.vert.spv",
            "composite.frag.spv",
            vec![setup.present_format],
        );
        let pipeline =
            PassPipeline::create(device.clone(), ctx.shader_dir(), &desc, &[table.layout()])?;

        self.state.set(Resources { pipeline, table });
        Ok(())
    }

    fn update(&mut self, _frame: &FrameResources<'_>) -> RhiResult<()> {
        self.state.get(self.kind()).map(|_| ())
    }

    fn draw(&mut self, cmd: &mut CommandBuffer, frame: &mut FrameResources<'_>) -> RhiResult<()> {
        let kind = self.kind();
        let resources = self.state.get(kind)?;
        let target = frame.target;

        frame.registry.apply_accesses(cmd, kind.accesses())?;
        let mut swapchain_image = StateTracker::new("swapchain image", target.image, target.format);
        swapchain_image.transition(cmd, ResourceState::ColorTarget)?;

        let rendering = RenderingConfig::from_extent(target.extent)
            .with_color_attachment(ColorAttachment::new(target.view));
        open_rendering(cmd, kind, &rendering);

        cmd.bind_graphics_pipeline(resources.pipeline.handle());
        resources
            .table
            .bind(cmd, resources.pipeline.layout(), frame.frame_index());
        cmd.draw(3, 0);

        end_pass(cmd);
        swapchain_image.transition(cmd, ResourceState::PresentReady)?;
        Ok(())
    }

    fn cleanup(&mut self) {
        self.state.clean_up();
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;
    use deferred_rhi::barrier::ResourceState::*;

    use super::*;
    use crate::resource_registry::tests::Recorded;

    #[test]
    fn test_swapchain_image_ends_present_ready() {
        let mut recorder = Recorded::default();
        let mut tracker =
            StateTracker::new("swapchain image", vk::Image::from_raw(42), vk::Format::B8G8R8A8_SRGB);

        tracker.transition(&mut recorder, ColorTarget).unwrap();
        tracker.transition(&mut recorder, PresentReady).unwrap();

        let pairs: Vec<_> = recorder.0.iter().map(|b| (b.from, b.to)).collect();
        assert_eq!(pairs, vec![(Undefined, ColorTarget), (ColorTarget, PresentReady)]);
        assert_eq!(tracker.state(), PresentReady);
    }

    #[test]
    fn test_composite_samples_scene_color() {
        assert_eq!(
            PassKind::Composite.accesses(),
            &[(ResourceId::SceneColor, ShaderReadOnly)]
        );
    }
}
