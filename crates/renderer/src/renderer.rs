//! Top-level renderer: owns every Vulkan object and drives the frame loop.

use std::mem::ManuallyDrop;
use std::sync::Arc;

use ash::vk;
use glam::{Vec3, Vec4};
use tracing::{debug, error, info};

use deferred_core::{EngineConfig, SceneConfig};
use deferred_platform::{Surface, Window};
use deferred_resources::primitives::{cube, ground_plane};
use deferred_resources::{Material, ModelData, TextureData};
use deferred_rhi::{RhiError, RhiResult};
use deferred_rhi::command::CommandBuffer;
use deferred_rhi::device::Device;
use deferred_rhi::instance::Instance;
use deferred_rhi::physical_device::select_physical_device;
use deferred_rhi::swapchain::Swapchain;
use deferred_rhi::sync::{Fence, Semaphore};
use deferred_scene::{Aabb, Camera, Orbit, SunLight, Transform};

use crate::context::GraphicsContext;
use crate::debug_lines::DebugLines;
use crate::error::RendererResult;
use crate::frame_manager::{
    AcquireOutcome, FrameDriver, FrameOutcome, FrameRing, PresentOutcome, run_frame,
};
use crate::gpu_scene::{GpuModel, GpuScene, SceneView};
use crate::passes::{
    CompositePass, DebugPass, DrawPass, FrameResources, GeometryPass, LightingPass, PassKind,
    PassSetup, PresentTarget, ShadowPass, SkyPass,
};
use crate::resource_registry::{DEPTH_FORMAT_CANDIDATES, ResourceRegistry};

const BOUNDS_COLOR: Vec3 = Vec3::new(1.0, 1.0, 0.0);

/// Command buffer and synchronization owned by one frame-in-flight slot.
struct FrameSlot {
    command_buffer: CommandBuffer,
    image_available: Semaphore,
    in_flight: Fence,
}

impl FrameSlot {
    fn new(context: &GraphicsContext, index: usize) -> RhiResult<Self> {
        let device = context.device();
        let command_buffer = context
            .command_pool()
            .allocate_command_buffers(1)?
            .pop()
            .ok_or_else(|| RhiError::InvalidHandle("No command buffer allocated".to_string()))?;
        device.set_object_name(command_buffer.handle(), &format!("frame {} commands", index));

        Ok(Self {
            command_buffer,
            image_available: Semaphore::new(
                device.clone(),
                &format!("frame {} image available", index),
            )?,
            // Signaled so the first wait on a fresh slot returns immediately.
            in_flight: Fence::new(device.clone(), true, &format!("frame {} in flight", index))?,
        })
    }
}

/// Everything created from the device. Dropped as one unit before the
/// device, surface and instance.
struct GpuState {
    passes: Vec<Box<dyn DrawPass>>,
    frames: FrameRing<FrameSlot>,
    /// One per swapchain image, signaled by the submit that renders into it.
    render_finished: Vec<Semaphore>,
    scene: GpuScene,
    registry: ResourceRegistry,
    context: GraphicsContext,
    swapchain: Swapchain,
}

/// Deferred renderer bound to one window.
///
/// # Resource Destruction Order
///
/// 1. Wait for the device to go idle
/// 2. Clean up passes, then drop frame slots, scene, registry, context and
///    swapchain
/// 3. Drop the device
/// 4. Destroy the surface
/// 5. Destroy the instance
pub struct Renderer {
    gpu: ManuallyDrop<GpuState>,
    device: ManuallyDrop<Arc<Device>>,
    surface: ManuallyDrop<Surface>,
    instance: ManuallyDrop<Instance>,

    camera: Camera,
    orbit: Orbit,
    sun: SunLight,
    debug_lines: DebugLines,
    draw_bounds: bool,

    resize_pending: bool,
    width: u32,
    height: u32,
}

impl Renderer {
    pub fn new(window: &Window, config: &EngineConfig) -> RendererResult<Self> {
        let width = window.width();
        let height = window.height();
        let settings = &config.renderer;
        info!("Initializing deferred renderer ({}x{})", width, height);

        let extensions = window.required_extensions()?;
        let instance = Instance::new(settings.validation, &extensions)?;
        let surface = window.create_surface(instance.entry(), instance.handle())?;

        let physical_device =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        let device = Device::new(&instance, &physical_device)?;
        let depth_format = device.find_depth_format(instance.handle(), &DEPTH_FORMAT_CANDIDATES)?;

        let swapchain = Swapchain::new(
            &instance,
            device.clone(),
            surface.handle(),
            width,
            height,
            settings.prefer_low_latency,
        )?;

        let context = GraphicsContext::new(
            device.clone(),
            depth_format,
            settings.shadow_map_size,
            &settings.shader_dir,
            settings.generate_mipmaps,
            swapchain.extent(),
        )?;

        let mut registry = ResourceRegistry::new();
        registry.create_targets(&context)?;

        let scene = load_scene(&context, &config.scene)?;

        let frames = FrameRing::try_from_fn(|i| FrameSlot::new(&context, i))?;
        let render_finished = create_render_finished(&device, swapchain.image_count())?;

        let mut passes: Vec<Box<dyn DrawPass>> = PassKind::ORDER
            .into_iter()
            .filter(|&kind| kind != PassKind::Debug || settings.debug_overlay)
            .map(create_pass)
            .collect();
        let setup = PassSetup {
            context: &context,
            registry: &registry,
            scene: &scene,
            present_format: swapchain.format(),
        };
        for pass in &mut passes {
            pass.init(&setup)?;
            debug!("{} pass initialized", pass.kind().name());
        }

        let (camera, orbit, sun) = scene_rig(&config.scene, swapchain.extent());

        info!(
            "Renderer initialized: {} swapchain images, {} frames in flight, {} pass(es), {} model(s)",
            swapchain.image_count(),
            frames.len(),
            passes.len(),
            scene.models().len()
        );

        Ok(Self {
            gpu: ManuallyDrop::new(GpuState {
                passes,
                frames,
                render_finished,
                scene,
                registry,
                context,
                swapchain,
            }),
            device: ManuallyDrop::new(device),
            surface: ManuallyDrop::new(surface),
            instance: ManuallyDrop::new(instance),
            camera,
            orbit,
            sun,
            debug_lines: DebugLines::new(),
            draw_bounds: settings.draw_bounds,
            resize_pending: false,
            width,
            height,
        })
    }

    /// Records a new window size; the swapchain is rebuilt before the next
    /// frame.
    pub fn resize(&mut self, width: u32, height: u32) {
        if (width, height) != (self.width, self.height) {
            self.width = width;
            self.height = height;
            self.resize_pending = true;
        }
    }

    /// Advances the camera orbit by `delta_time` seconds and renders one
    /// frame. Minimized windows render nothing.
    pub fn render_frame(&mut self, delta_time: f32) -> RhiResult<Option<FrameOutcome>> {
        if self.width == 0 || self.height == 0 {
            return Ok(None);
        }

        self.orbit.update(&mut self.camera, delta_time);
        self.gpu.context.frame_mut().set_delta_time(delta_time);

        if self.draw_bounds {
            for model in self.gpu.scene.models() {
                let bounds = model.world_bounds();
                self.debug_lines.draw_aabb(bounds.min, bounds.max, BOUNDS_COLOR);
            }
        }

        let outcome = run_frame(self);
        self.debug_lines.clear();
        outcome.map(Some)
    }

    /// Lines drawn by the debug pass this frame.
    pub fn debug_lines_mut(&mut self) -> &mut DebugLines {
        &mut self.debug_lines
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.gpu.swapchain.extent()
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.gpu.swapchain.format()
    }

    fn scene_view(&self) -> SceneView {
        let bounds = self
            .gpu
            .scene
            .bounds()
            .unwrap_or_else(|| Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0)));
        SceneView::new(&self.camera, &self.sun, &bounds)
    }
}

impl FrameDriver for Renderer {
    fn resize_pending(&self) -> bool {
        self.resize_pending
    }

    fn wait_for_slot(&mut self) -> RhiResult<()> {
        self.gpu.frames.current().in_flight.wait()
    }

    fn acquire(&mut self) -> RhiResult<AcquireOutcome> {
        let semaphore = self.gpu.frames.current().image_available.handle();
        match self.gpu.swapchain.acquire_next_image(semaphore) {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Ready {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    fn record_and_submit(&mut self, image_index: u32) -> RhiResult<()> {
        let view = self.scene_view();
        let GpuState {
            passes,
            frames,
            render_finished,
            scene,
            registry,
            context,
            swapchain,
        } = &mut *self.gpu;

        let frame_index = frames.current_index();
        context.frame_mut().set_frame_index(frame_index);
        context.frame_mut().set_image_index(image_index);

        let slot = frames.current_mut();
        slot.in_flight.reset()?;
        slot.command_buffer.reset()?;
        slot.command_buffer.begin()?;

        let mut resources = FrameResources {
            context,
            registry,
            scene,
            view: &view,
            debug_lines: &self.debug_lines,
            target: PresentTarget {
                image: swapchain.image(image_index as usize),
                view: swapchain.image_view(image_index as usize),
                format: swapchain.format(),
                extent: swapchain.extent(),
            },
        };
        for pass in passes.iter_mut() {
            pass.update(&resources)?;
        }
        for pass in passes.iter_mut() {
            pass.draw(&mut slot.command_buffer, &mut resources)?;
        }
        slot.command_buffer.end()?;

        let wait_semaphores = [slot.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [render_finished[image_index as usize].handle()];
        let command_buffers = [slot.command_buffer.handle()];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        // SAFETY: the buffer is fully recorded and the fence was reset after
        // its last wait.
        unsafe { self.device.submit_graphics(&[submit_info], slot.in_flight.handle()) }
    }

    fn present(&mut self, image_index: u32) -> RhiResult<PresentOutcome> {
        let wait_semaphore = self.gpu.render_finished[image_index as usize].handle();
        match self
            .gpu
            .swapchain
            .present(self.device.present_queue(), image_index, wait_semaphore)
        {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::SUBOPTIMAL_KHR) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    fn advance(&mut self) {
        self.gpu.frames.advance();
    }

    fn recreate(&mut self) -> RhiResult<()> {
        self.device.wait_idle()?;

        let GpuState {
            passes,
            render_finished,
            scene,
            registry,
            context,
            swapchain,
            ..
        } = &mut *self.gpu;

        swapchain.recreate(self.width, self.height)?;
        *render_finished = create_render_finished(&self.device, swapchain.image_count())?;

        let extent = swapchain.extent();
        context.frame_mut().set_render_resolution(extent);
        registry.rebuild_render_targets(context)?;
        self.camera
            .set_aspect(extent.width as f32 / extent.height.max(1) as f32);

        for pass in passes.iter_mut() {
            pass.cleanup();
        }
        let setup = PassSetup {
            context,
            registry,
            scene,
            present_format: swapchain.format(),
        };
        for pass in passes.iter_mut() {
            pass.init(&setup)?;
        }

        self.resize_pending = false;
        info!(
            "Swapchain recreated at {}x{}, {} pass(es) rebuilt",
            extent.width,
            extent.height,
            passes.len()
        );
        Ok(())
    }

    fn check_validation(&self) -> RhiResult<()> {
        self.instance.check_validation()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during renderer drop: {:?}", e);
        }

        for pass in self.gpu.passes.iter_mut() {
            pass.cleanup();
        }

        // SAFETY: each field is dropped exactly once, children before the
        // objects they were created from.
        unsafe {
            ManuallyDrop::drop(&mut self.gpu);
            ManuallyDrop::drop(&mut self.device);
            ManuallyDrop::drop(&mut self.surface);
            ManuallyDrop::drop(&mut self.instance);
        }

        info!("Renderer destroyed");
    }
}

fn create_pass(kind: PassKind) -> Box<dyn DrawPass> {
    match kind {
        PassKind::Geometry => Box::new(GeometryPass::new()),
        PassKind::Shadow => Box::new(ShadowPass::new()),
        PassKind::Sky => Box::new(SkyPass::new()),
        PassKind::Lighting => Box::new(LightingPass::new()),
        PassKind::Debug => Box::new(DebugPass::new()),
        PassKind::Composite => Box::new(CompositePass::new()),
    }
}

fn create_render_finished(device: &Arc<Device>, count: usize) -> RhiResult<Vec<Semaphore>> {
    let semaphores = (0..count)
        .map(|i| Semaphore::new(device.clone(), &format!("image {} render finished", i)))
        .collect::<RhiResult<Vec<_>>>()?;
    debug!("Created {} render-finished semaphores", semaphores.len());
    Ok(semaphores)
}

/// Uploads the configured model, or a ground plane with a cube on it.
fn load_scene(context: &GraphicsContext, config: &SceneConfig) -> RendererResult<GpuScene> {
    let texture = config
        .texture
        .as_deref()
        .map(TextureData::load)
        .transpose()?;

    let mut scene = GpuScene::new();
    match &config.model {
        Some(path) => {
            let model = ModelData::load(path)?;
            let transform = Transform::new().with_uniform_scale(config.model_scale);
            scene.add(GpuModel::upload(context, &model, texture.as_ref(), transform)?);
        }
        None => {
            info!("No model configured, building the procedural scene");
            let ground = ground_plane(200.0, Material::default());
            let block = cube(
                10.0,
                Material::default().with_diffuse(Vec4::new(0.8, 0.3, 0.2, 1.0)),
            );
            scene.add(GpuModel::upload(
                context,
                &ground,
                texture.as_ref(),
                Transform::new(),
            )?);
            scene.add(GpuModel::upload(
                context,
                &block,
                None,
                Transform::new().with_position(Vec3::new(0.0, 10.0, 0.0)),
            )?);
        }
    }
    Ok(scene)
}

/// Camera, orbit and sun as configured, with the camera aspect matching
/// `extent`.
fn scene_rig(config: &SceneConfig, extent: vk::Extent2D) -> (Camera, Orbit, SunLight) {
    let target = Vec3::from_array(config.camera_target);

    let mut camera = Camera::new();
    camera.position = Vec3::from_array(config.camera_position);
    camera.set_perspective(
        45.0_f32.to_radians(),
        extent.width as f32 / extent.height.max(1) as f32,
        0.1,
        config.camera_far,
    );
    camera.look_at(target);

    let sun = SunLight {
        position: Vec3::from_array(config.sun_position),
        color: Vec3::from_array(config.light_color),
        radius: config.light_radius,
        intensity: config.light_intensity,
        ..SunLight::default()
    };

    (camera, Orbit::new(target, config.orbit_speed), sun)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_rig_follows_config() {
        let config = SceneConfig {
            camera_position: [0.0, 10.0, 50.0],
            camera_far: 800.0,
            sun_position: [5.0, 500.0, 0.0],
            light_intensity: 12.0,
            ..SceneConfig::default()
        };
        let (camera, orbit, sun) = scene_rig(
            &config,
            vk::Extent2D {
                width: 1600,
                height: 800,
            },
        );

        assert_eq!(camera.position, Vec3::new(0.0, 10.0, 50.0));
        assert_eq!(camera.far, 800.0);
        assert!((camera.aspect - 2.0).abs() < 1e-6);
        assert!(camera.forward().z < 0.0);
        assert_eq!(orbit.target, Vec3::ZERO);
        assert_eq!(sun.position, Vec3::new(5.0, 500.0, 0.0));
        assert_eq!(sun.intensity, 12.0);
        assert_eq!(sun.radius, SunLight::default().radius);
    }

    #[test]
    fn test_debug_pass_is_the_only_optional_pass() {
        let without_debug: Vec<PassKind> = PassKind::ORDER
            .into_iter()
            .filter(|&kind| kind != PassKind::Debug)
            .collect();
        assert_eq!(without_debug.len(), PassKind::ORDER.len() - 1);
        for kind in PassKind::ORDER {
            assert_eq!(create_pass(kind).kind(), kind);
        }
    }
}
