//! Resource states and the legal transition table.
//!
//! Every image that passes between render passes is tracked as a
//! [`ResourceState`]. Moving from one state to another is only possible
//! through a pair listed in [`TRANSITIONS`]; anything else is reported as
//! [`RhiError::UnsupportedTransition`]. No catch-all barrier exists.
//!
//! Barriers are recorded through the [`BarrierRecorder`] trait so the state
//! logic can be exercised without a GPU.

use ash::vk;

use crate::error::{RhiError, RhiResult};

/// Logical state of an image as seen by the render passes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Undefined,
    ColorTarget,
    DepthTarget,
    DepthReadOnly,
    ShaderReadOnly,
    TransferSrc,
    TransferDst,
    PresentReady,
    General,
}

impl ResourceState {
    pub const ALL: [ResourceState; 9] = [
        ResourceState::Undefined,
        ResourceState::ColorTarget,
        ResourceState::DepthTarget,
        ResourceState::DepthReadOnly,
        ResourceState::ShaderReadOnly,
        ResourceState::TransferSrc,
        ResourceState::TransferDst,
        ResourceState::PresentReady,
        ResourceState::General,
    ];

    /// Image layout an image in this state is kept in.
    pub const fn layout(self) -> vk::ImageLayout {
        match self {
            ResourceState::Undefined => vk::ImageLayout::UNDEFINED,
            ResourceState::ColorTarget => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ResourceState::DepthTarget => vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            ResourceState::DepthReadOnly => vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL,
            ResourceState::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ResourceState::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            ResourceState::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ResourceState::PresentReady => vk::ImageLayout::PRESENT_SRC_KHR,
            ResourceState::General => vk::ImageLayout::GENERAL,
        }
    }

    /// State a sampled image of `format` must be in to be read by a shader.
    ///
    /// Depth formats are read through the depth read-only layout.
    pub fn sampled_state_for(format: vk::Format) -> ResourceState {
        if is_depth_format(format) {
            ResourceState::DepthReadOnly
        } else {
            ResourceState::ShaderReadOnly
        }
    }
}

/// Stage and access scopes on both sides of a barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionScopes {
    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
}

const fn scopes(
    src_stage: vk::PipelineStageFlags2,
    src_access: vk::AccessFlags2,
    dst_stage: vk::PipelineStageFlags2,
    dst_access: vk::AccessFlags2,
) -> TransitionScopes {
    TransitionScopes {
        src_stage,
        src_access,
        dst_stage,
        dst_access,
    }
}

type Stage = vk::PipelineStageFlags2;
type Access = vk::AccessFlags2;

const FRAGMENT_TESTS: Stage =
    Stage::from_raw(Stage::EARLY_FRAGMENT_TESTS.as_raw() | Stage::LATE_FRAGMENT_TESTS.as_raw());
const DEPTH_READ_STAGES: Stage =
    Stage::from_raw(Stage::EARLY_FRAGMENT_TESTS.as_raw() | Stage::FRAGMENT_SHADER.as_raw());
const DEPTH_RW: Access = Access::from_raw(
    Access::DEPTH_STENCIL_ATTACHMENT_READ.as_raw()
        | Access::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw(),
);
const DEPTH_READS: Access = Access::from_raw(
    Access::DEPTH_STENCIL_ATTACHMENT_READ.as_raw() | Access::SHADER_SAMPLED_READ.as_raw(),
);
const COLOR_RW: Access = Access::from_raw(
    Access::COLOR_ATTACHMENT_READ.as_raw() | Access::COLOR_ATTACHMENT_WRITE.as_raw(),
);

/// Every legal (from, to) pair and the scopes its barrier uses.
pub const TRANSITIONS: &[((ResourceState, ResourceState), TransitionScopes)] = {
    use ResourceState::*;
    &[
        (
            (Undefined, ColorTarget),
            scopes(Stage::NONE, Access::NONE, Stage::COLOR_ATTACHMENT_OUTPUT, COLOR_RW),
        ),
        (
            (Undefined, DepthTarget),
            scopes(Stage::NONE, Access::NONE, FRAGMENT_TESTS, DEPTH_RW),
        ),
        (
            (Undefined, TransferDst),
            scopes(Stage::NONE, Access::NONE, Stage::ALL_TRANSFER, Access::TRANSFER_WRITE),
        ),
        (
            (Undefined, ShaderReadOnly),
            scopes(
                Stage::NONE,
                Access::NONE,
                Stage::FRAGMENT_SHADER,
                Access::SHADER_SAMPLED_READ,
            ),
        ),
        (
            (TransferDst, ShaderReadOnly),
            scopes(
                Stage::ALL_TRANSFER,
                Access::TRANSFER_WRITE,
                Stage::FRAGMENT_SHADER,
                Access::SHADER_SAMPLED_READ,
            ),
        ),
        (
            (TransferSrc, TransferDst),
            scopes(
                Stage::ALL_TRANSFER,
                Access::TRANSFER_READ,
                Stage::ALL_TRANSFER,
                Access::TRANSFER_WRITE,
            ),
        ),
        (
            (TransferDst, TransferSrc),
            scopes(
                Stage::ALL_TRANSFER,
                Access::TRANSFER_WRITE,
                Stage::ALL_TRANSFER,
                Access::TRANSFER_READ,
            ),
        ),
        (
            (ColorTarget, ShaderReadOnly),
            scopes(
                Stage::COLOR_ATTACHMENT_OUTPUT,
                Access::COLOR_ATTACHMENT_WRITE,
                Stage::FRAGMENT_SHADER,
                Access::SHADER_SAMPLED_READ,
            ),
        ),
        (
            (ShaderReadOnly, ColorTarget),
            scopes(
                Stage::FRAGMENT_SHADER,
                Access::NONE,
                Stage::COLOR_ATTACHMENT_OUTPUT,
                COLOR_RW,
            ),
        ),
        (
            (ColorTarget, PresentReady),
            scopes(
                Stage::COLOR_ATTACHMENT_OUTPUT,
                Access::COLOR_ATTACHMENT_WRITE,
                Stage::NONE,
                Access::NONE,
            ),
        ),
        (
            (PresentReady, ColorTarget),
            scopes(
                Stage::COLOR_ATTACHMENT_OUTPUT,
                Access::NONE,
                Stage::COLOR_ATTACHMENT_OUTPUT,
                COLOR_RW,
            ),
        ),
        (
            (ShaderReadOnly, PresentReady),
            scopes(
                Stage::FRAGMENT_SHADER,
                Access::NONE,
                Stage::NONE,
                Access::NONE,
            ),
        ),
        (
            (PresentReady, ShaderReadOnly),
            scopes(
                Stage::NONE,
                Access::NONE,
                Stage::FRAGMENT_SHADER,
                Access::SHADER_SAMPLED_READ,
            ),
        ),
        (
            (DepthTarget, ShaderReadOnly),
            scopes(
                Stage::LATE_FRAGMENT_TESTS,
                Access::DEPTH_STENCIL_ATTACHMENT_WRITE,
                Stage::FRAGMENT_SHADER,
                Access::SHADER_SAMPLED_READ,
            ),
        ),
        (
            (ShaderReadOnly, DepthTarget),
            scopes(Stage::FRAGMENT_SHADER, Access::NONE, FRAGMENT_TESTS, DEPTH_RW),
        ),
        (
            (DepthTarget, DepthReadOnly),
            scopes(
                Stage::LATE_FRAGMENT_TESTS,
                Access::DEPTH_STENCIL_ATTACHMENT_WRITE,
                DEPTH_READ_STAGES,
                DEPTH_READS,
            ),
        ),
        (
            (DepthReadOnly, DepthTarget),
            scopes(DEPTH_READ_STAGES, Access::NONE, FRAGMENT_TESTS, DEPTH_RW),
        ),
    ]
};

/// Looks up the barrier scopes for a state change.
///
/// Returns `None` for pairs absent from [`TRANSITIONS`], including `from == to`.
pub fn lookup_transition(from: ResourceState, to: ResourceState) -> Option<TransitionScopes> {
    TRANSITIONS
        .iter()
        .find(|((f, t), _)| *f == from && *t == to)
        .map(|(_, scopes)| *scopes)
}

/// True for formats with a depth component.
pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Aspect mask covering the whole of an image of `format`.
///
/// Only the depth aspect is used for combined depth/stencil formats since no
/// pass touches stencil.
pub fn aspect_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    if is_depth_format(format) {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// One image layout transition, ready to be recorded.
#[derive(Clone, Copy, Debug)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub aspect: vk::ImageAspectFlags,
    pub base_mip_level: u32,
    pub level_count: u32,
    pub from: ResourceState,
    pub to: ResourceState,
    pub scopes: TransitionScopes,
}

impl ImageBarrier {
    /// Builds the barrier for a whole image, failing for illegal pairs.
    pub fn new(
        name: &str,
        image: vk::Image,
        format: vk::Format,
        from: ResourceState,
        to: ResourceState,
    ) -> RhiResult<Self> {
        let scopes = lookup_transition(from, to).ok_or_else(|| RhiError::UnsupportedTransition {
            resource: name.to_string(),
            from,
            to,
        })?;
        Ok(Self {
            image,
            aspect: aspect_for_format(format),
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            from,
            to,
            scopes,
        })
    }

    /// Restricts the barrier to `count` mip levels starting at `base`.
    pub fn with_mip_range(mut self, base: u32, count: u32) -> Self {
        self.base_mip_level = base;
        self.level_count = count;
        self
    }

    pub fn to_vk(&self) -> vk::ImageMemoryBarrier2<'static> {
        vk::ImageMemoryBarrier2::default()
            .src_stage_mask(self.scopes.src_stage)
            .src_access_mask(self.scopes.src_access)
            .dst_stage_mask(self.scopes.dst_stage)
            .dst_access_mask(self.scopes.dst_access)
            .old_layout(self.from.layout())
            .new_layout(self.to.layout())
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(self.aspect)
                    .base_mip_level(self.base_mip_level)
                    .level_count(self.level_count)
                    .base_array_layer(0)
                    .layer_count(vk::REMAINING_ARRAY_LAYERS),
            )
    }
}

/// Sink for image barriers: a command buffer, or a recorder in tests.
pub trait BarrierRecorder {
    fn record_image_barrier(&mut self, barrier: &ImageBarrier);
}

/// Current state of one image plus the logic to move it.
///
/// Owners (the resource registry, the swapchain composite) keep one tracker
/// per image and never change the state any other way.
#[derive(Clone, Debug)]
pub struct StateTracker {
    name: String,
    image: vk::Image,
    format: vk::Format,
    state: ResourceState,
}

impl StateTracker {
    pub fn new(name: impl Into<String>, image: vk::Image, format: vk::Format) -> Self {
        Self {
            name: name.into(),
            image,
            format,
            state: ResourceState::Undefined,
        }
    }

    #[inline]
    pub fn state(&self) -> ResourceState {
        self.state
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Moves the image to `to`, recording exactly one barrier when the state
    /// changes and none when it is already there.
    ///
    /// Returns whether a barrier was recorded.
    pub fn transition(
        &mut self,
        recorder: &mut dyn BarrierRecorder,
        to: ResourceState,
    ) -> RhiResult<bool> {
        if self.state == to {
            return Ok(false);
        }
        let barrier = ImageBarrier::new(&self.name, self.image, self.format, self.state, to)?;
        recorder.record_image_barrier(&barrier);
        self.state = to;
        Ok(true)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashSet;

    use super::*;
    use ResourceState::*;

    /// Collects barriers instead of recording them.
    #[derive(Default)]
    pub struct Recorded(pub Vec<ImageBarrier>);

    impl BarrierRecorder for Recorded {
        fn record_image_barrier(&mut self, barrier: &ImageBarrier) {
            self.0.push(*barrier);
        }
    }

    const LEGAL: &[(ResourceState, ResourceState)] = &[
        (Undefined, ColorTarget),
        (Undefined, DepthTarget),
        (Undefined, TransferDst),
        (Undefined, ShaderReadOnly),
        (TransferDst, ShaderReadOnly),
        (TransferSrc, TransferDst),
        (TransferDst, TransferSrc),
        (ColorTarget, ShaderReadOnly),
        (ShaderReadOnly, ColorTarget),
        (ColorTarget, PresentReady),
        (PresentReady, ColorTarget),
        (ShaderReadOnly, PresentReady),
        (PresentReady, ShaderReadOnly),
        (DepthTarget, ShaderReadOnly),
        (ShaderReadOnly, DepthTarget),
        (DepthTarget, DepthReadOnly),
        (DepthReadOnly, DepthTarget),
    ];

    #[test]
    fn test_table_matches_legal_pairs_exactly() {
        let table: HashSet<_> = TRANSITIONS.iter().map(|(pair, _)| *pair).collect();
        let legal: HashSet<_> = LEGAL.iter().copied().collect();
        assert_eq!(table, legal);
        assert_eq!(TRANSITIONS.len(), LEGAL.len(), "duplicate table entries");
    }

    #[test]
    fn test_every_other_pair_is_rejected() {
        for from in ResourceState::ALL {
            for to in ResourceState::ALL {
                let expected = LEGAL.contains(&(from, to));
                assert_eq!(
                    lookup_transition(from, to).is_some(),
                    expected,
                    "{from:?} -> {to:?}"
                );
            }
        }
    }

    #[test]
    fn test_general_has_no_transitions() {
        for state in ResourceState::ALL {
            assert!(lookup_transition(General, state).is_none());
            assert!(lookup_transition(state, General).is_none());
        }
    }

    #[test]
    fn test_second_transition_records_one_barrier() {
        for &(s1, s2) in LEGAL.iter().filter(|(from, _)| *from == Undefined) {
            let mut tracker = StateTracker::new("img", vk::Image::null(), vk::Format::R8G8B8A8_UNORM);
            let mut recorded = Recorded::default();
            tracker.transition(&mut recorded, s1).unwrap();
            let before = recorded.0.len();

            if lookup_transition(s1, s2).is_some() {
                tracker.transition(&mut recorded, s2).unwrap();
                assert_eq!(recorded.0.len() - before, 1);
            }
        }
    }

    #[test]
    fn test_same_state_records_nothing() {
        let mut tracker = StateTracker::new("img", vk::Image::null(), vk::Format::R8G8B8A8_UNORM);
        let mut recorded = Recorded::default();
        assert!(tracker.transition(&mut recorded, ColorTarget).unwrap());
        assert!(!tracker.transition(&mut recorded, ColorTarget).unwrap());
        assert_eq!(recorded.0.len(), 1);
    }

    #[test]
    fn test_illegal_transition_keeps_state() {
        let mut tracker = StateTracker::new("scene", vk::Image::null(), vk::Format::R8G8B8A8_UNORM);
        let mut recorded = Recorded::default();
        tracker.transition(&mut recorded, ColorTarget).unwrap();

        let err = tracker.transition(&mut recorded, TransferSrc).unwrap_err();
        assert!(matches!(
            err,
            RhiError::UnsupportedTransition { from: ColorTarget, to: TransferSrc, .. }
        ));
        assert_eq!(tracker.state(), ColorTarget);
        assert_eq!(recorded.0.len(), 1);
    }

    #[test]
    fn test_barrier_layouts_and_aspect() {
        let barrier = ImageBarrier::new(
            "depth",
            vk::Image::null(),
            vk::Format::D32_SFLOAT,
            DepthTarget,
            DepthReadOnly,
        )
        .unwrap();
        let vk_barrier = barrier.to_vk();
        assert_eq!(vk_barrier.old_layout, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL);
        assert_eq!(vk_barrier.new_layout, vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL);
        assert_eq!(vk_barrier.subresource_range.aspect_mask, vk::ImageAspectFlags::DEPTH);
    }

    #[test]
    fn test_sampled_state_for_depth_formats() {
        assert_eq!(ResourceState::sampled_state_for(vk::Format::D32_SFLOAT), DepthReadOnly);
        assert_eq!(
            ResourceState::sampled_state_for(vk::Format::D24_UNORM_S8_UINT),
            DepthReadOnly
        );
        assert_eq!(
            ResourceState::sampled_state_for(vk::Format::R16G16B16A16_SFLOAT),
            ShaderReadOnly
        );
    }
}
