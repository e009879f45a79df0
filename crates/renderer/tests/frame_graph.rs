//! Runs the declared pass accesses over several frames against a registry of
//! stand-in images.

use ash::vk;

use deferred_renderer::passes::PassKind;
use deferred_renderer::resource_registry::{RegistryImage, ResourceId, ResourceRegistry};
use deferred_rhi::barrier::{BarrierRecorder, ImageBarrier, ResourceState};

#[derive(Default)]
struct Barriers(Vec<ImageBarrier>);

impl BarrierRecorder for Barriers {
    fn record_image_barrier(&mut self, barrier: &ImageBarrier) {
        self.0.push(*barrier);
    }
}

struct StandIn {
    raw: u64,
    format: vk::Format,
}

impl RegistryImage for StandIn {
    fn handle(&self) -> vk::Image {
        vk::Handle::from_raw(self.raw)
    }

    fn view(&self) -> vk::ImageView {
        vk::Handle::from_raw(self.raw)
    }

    fn format(&self) -> vk::Format {
        self.format
    }

    fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: 1280,
            height: 720,
        }
    }
}

fn registry(barriers: &mut Barriers) -> ResourceRegistry<StandIn> {
    let mut registry = ResourceRegistry::new();
    for id in ResourceId::ALL {
        let image = StandIn {
            raw: id.index() as u64 + 1,
            format: id.format(vk::Format::D32_SFLOAT),
        };
        registry
            .insert(id, image, barriers, id.initial_state())
            .unwrap();
    }
    registry
}

/// Applies every pass of one frame and returns the barriers it recorded.
fn run_frame(registry: &mut ResourceRegistry<StandIn>, passes: &[PassKind]) -> Vec<ImageBarrier> {
    let mut barriers = Barriers::default();
    for pass in passes {
        registry
            .apply_accesses(&mut barriers, pass.accesses())
            .unwrap_or_else(|e| panic!("{} pass: {}", pass.name(), e));
    }
    barriers.0
}

#[test]
fn test_frames_reach_a_steady_state() {
    let mut barriers = Barriers::default();
    let mut registry = registry(&mut barriers);
    assert_eq!(barriers.0.len(), ResourceId::COUNT);

    run_frame(&mut registry, &PassKind::ORDER);
    let second = run_frame(&mut registry, &PassKind::ORDER);
    let third = run_frame(&mut registry, &PassKind::ORDER);

    let pairs = |frame: &[ImageBarrier]| -> Vec<_> {
        frame.iter().map(|b| (b.image, b.from, b.to)).collect()
    };
    assert_eq!(pairs(&second), pairs(&third));
    assert_eq!(second.len(), 14);
}

#[test]
fn test_frames_without_the_debug_pass_stay_legal() {
    let passes: Vec<PassKind> = PassKind::ORDER
        .into_iter()
        .filter(|&kind| kind != PassKind::Debug)
        .collect();
    let mut barriers = Barriers::default();
    let mut registry = registry(&mut barriers);

    for _ in 0..3 {
        run_frame(&mut registry, &passes);
    }

    assert_eq!(
        registry.state(ResourceId::Depth),
        Some(ResourceState::DepthReadOnly)
    );
    assert_eq!(
        registry.state(ResourceId::SceneColor),
        Some(ResourceState::ShaderReadOnly)
    );
}

#[test]
fn test_end_of_frame_states() {
    let mut barriers = Barriers::default();
    let mut registry = registry(&mut barriers);
    run_frame(&mut registry, &PassKind::ORDER);

    use ResourceState::*;
    let expected = [
        (ResourceId::Positions, ShaderReadOnly),
        (ResourceId::Normals, ShaderReadOnly),
        (ResourceId::Albedo, ShaderReadOnly),
        (ResourceId::Depth, DepthTarget),
        (ResourceId::ShadowMap, DepthReadOnly),
        (ResourceId::Atmospherics, ShaderReadOnly),
        (ResourceId::SceneColor, ShaderReadOnly),
    ];
    for (id, state) in expected {
        assert_eq!(registry.state(id), Some(state), "{}", id.name());
    }
}

#[test]
fn test_unregistered_resource_fails_the_pass() {
    let mut barriers = Barriers::default();
    let mut registry = registry(&mut barriers);
    registry.remove(ResourceId::ShadowMap);

    let err = registry
        .apply_accesses(&mut barriers, PassKind::Shadow.accesses())
        .unwrap_err();
    assert!(err.to_string().contains(ResourceId::ShadowMap.name()));
}
