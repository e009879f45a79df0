//! Dynamic rendering helpers (Vulkan 1.3).
//!
//! Passes describe their targets with [`ColorAttachment`] and
//! [`DepthAttachment`], collect them into a [`RenderingConfig`], and keep
//! the built [`RenderingInfoBundle`] alive while recording:
//!
//! ```no_run
//! use deferred_rhi::rendering::{ColorAttachment, DepthAttachment, RenderingConfig};
//! # use deferred_rhi::vk;
//! # fn example(color: vk::ImageView, depth: vk::ImageView, cmd: &deferred_rhi::command::CommandBuffer) {
//! let bundle = RenderingConfig::from_extent(vk::Extent2D { width: 800, height: 600 })
//!     .with_color_attachment(ColorAttachment::new(color).with_clear_color([0.0, 0.0, 0.0, 1.0]))
//!     .with_depth_attachment(DepthAttachment::new(depth))
//!     .build();
//! cmd.begin_rendering(&bundle.info());
//! cmd.end_rendering();
//! # }
//! ```

use ash::vk;

/// Color target. Cleared and stored by default.
#[derive(Clone, Copy)]
pub struct ColorAttachment {
    pub image_view: vk::ImageView,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear_value: vk::ClearColorValue,
}

impl ColorAttachment {
    #[inline]
    pub fn new(image_view: vk::ImageView) -> Self {
        Self {
            image_view,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: vk::ClearColorValue {
                float32: [0.0, 0.0, 0.0, 1.0],
            },
        }
    }

    #[inline]
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_value = vk::ClearColorValue { float32: color };
        self
    }

    /// Keeps the existing contents instead of clearing.
    #[inline]
    pub fn load(mut self) -> Self {
        self.load_op = vk::AttachmentLoadOp::LOAD;
        self
    }

    pub fn to_rendering_attachment_info(&self) -> vk::RenderingAttachmentInfo<'static> {
        vk::RenderingAttachmentInfo::default()
            .image_view(self.image_view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(self.load_op)
            .store_op(self.store_op)
            .clear_value(vk::ClearValue {
                color: self.clear_value,
            })
    }
}

impl std::fmt::Debug for ColorAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // SAFETY: only the float32 member is ever written.
        let clear = unsafe { self.clear_value.float32 };
        f.debug_struct("ColorAttachment")
            .field("image_view", &self.image_view)
            .field("load_op", &self.load_op)
            .field("store_op", &self.store_op)
            .field("clear_value", &clear)
            .finish()
    }
}

/// Depth target. Cleared to 1.0 and stored by default, since later passes
/// sample the depth written here.
#[derive(Clone, Copy, Debug)]
pub struct DepthAttachment {
    pub image_view: vk::ImageView,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear_depth: f32,
}

impl DepthAttachment {
    #[inline]
    pub fn new(image_view: vk::ImageView) -> Self {
        Self {
            image_view,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_depth: 1.0,
        }
    }

    #[inline]
    pub fn load(mut self) -> Self {
        self.load_op = vk::AttachmentLoadOp::LOAD;
        self
    }

    pub fn to_rendering_attachment_info(&self) -> vk::RenderingAttachmentInfo<'static> {
        vk::RenderingAttachmentInfo::default()
            .image_view(self.image_view)
            .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
            .load_op(self.load_op)
            .store_op(self.store_op)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: self.clear_depth,
                    stencil: 0,
                },
            })
    }
}

/// Targets plus render area for one `vkCmdBeginRendering`.
#[derive(Clone, Debug, Default)]
pub struct RenderingConfig {
    pub color_attachments: Vec<ColorAttachment>,
    pub depth_attachment: Option<DepthAttachment>,
    pub render_area: vk::Rect2D,
}

impl RenderingConfig {
    #[inline]
    pub fn from_extent(extent: vk::Extent2D) -> Self {
        Self {
            color_attachments: Vec::new(),
            depth_attachment: None,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
        }
    }

    #[inline]
    pub fn with_color_attachment(mut self, attachment: ColorAttachment) -> Self {
        self.color_attachments.push(attachment);
        self
    }

    #[inline]
    pub fn with_depth_attachment(mut self, attachment: DepthAttachment) -> Self {
        self.depth_attachment = Some(attachment);
        self
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.render_area.extent
    }

    pub fn build(&self) -> RenderingInfoBundle {
        RenderingInfoBundle {
            color_attachments: self
                .color_attachments
                .iter()
                .map(ColorAttachment::to_rendering_attachment_info)
                .collect(),
            depth_attachment: self
                .depth_attachment
                .as_ref()
                .map(DepthAttachment::to_rendering_attachment_info),
            render_area: self.render_area,
        }
    }
}

/// Owns the attachment infos that a `vk::RenderingInfo` borrows.
pub struct RenderingInfoBundle {
    color_attachments: Vec<vk::RenderingAttachmentInfo<'static>>,
    depth_attachment: Option<vk::RenderingAttachmentInfo<'static>>,
    render_area: vk::Rect2D,
}

impl RenderingInfoBundle {
    pub fn info(&self) -> vk::RenderingInfo<'_> {
        let mut info = vk::RenderingInfo::default()
            .render_area(self.render_area)
            .layer_count(1)
            .color_attachments(&self.color_attachments);

        if let Some(ref depth) = self.depth_attachment {
            info = info.depth_attachment(depth);
        }

        info
    }

    #[inline]
    pub fn color_attachment_count(&self) -> usize {
        self.color_attachments.len()
    }

    #[inline]
    pub fn has_depth(&self) -> bool {
        self.depth_attachment.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent() -> vk::Extent2D {
        vk::Extent2D {
            width: 640,
            height: 480,
        }
    }

    #[test]
    fn test_color_attachment_defaults_clear_and_store() {
        let info = ColorAttachment::new(vk::ImageView::null()).to_rendering_attachment_info();
        assert_eq!(info.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(info.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(info.image_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn test_loaded_attachments_keep_contents() {
        let color = ColorAttachment::new(vk::ImageView::null()).load();
        let depth = DepthAttachment::new(vk::ImageView::null()).load();
        assert_eq!(color.load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(depth.load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(depth.store_op, vk::AttachmentStoreOp::STORE);
    }

    #[test]
    fn test_depth_attachment_clears_to_far() {
        let info = DepthAttachment::new(vk::ImageView::null()).to_rendering_attachment_info();
        // SAFETY: written as depth_stencil above.
        let depth = unsafe { info.clear_value.depth_stencil.depth };
        assert_eq!(depth, 1.0);
        assert_eq!(info.image_layout, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn test_bundle_carries_render_area_and_targets() {
        let bundle = RenderingConfig::from_extent(extent())
            .with_color_attachment(ColorAttachment::new(vk::ImageView::null()))
            .with_color_attachment(ColorAttachment::new(vk::ImageView::null()))
            .with_depth_attachment(DepthAttachment::new(vk::ImageView::null()))
            .build();
        assert_eq!(bundle.color_attachment_count(), 2);
        assert!(bundle.has_depth());

        let info = bundle.info();
        assert_eq!(info.render_area.extent.width, 640);
        assert_eq!(info.color_attachment_count, 2);
        assert_eq!(info.layer_count, 1);
    }

    #[test]
    fn test_depth_only_config() {
        let bundle = RenderingConfig::from_extent(extent())
            .with_depth_attachment(DepthAttachment::new(vk::ImageView::null()))
            .build();
        assert_eq!(bundle.color_attachment_count(), 0);
        assert!(bundle.has_depth());
    }
}
