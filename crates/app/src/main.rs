//! Deferred renderer - main entry point.
//!
//! Loads the engine config, applies command-line overrides, and drives the
//! renderer from the winit event loop.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::WindowId;

use deferred_core::{EngineConfig, Timer};
use deferred_platform::Window;
use deferred_renderer::{FrameOutcome, Renderer};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Engine config file; defaults are used when it does not exist
    #[arg(long, default_value = "deferred.toml")]
    config: PathBuf,

    /// glTF model to render instead of the procedural scene
    #[arg(long)]
    model: Option<PathBuf>,

    /// Albedo texture applied to the model
    #[arg(long)]
    texture: Option<PathBuf>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// Disable the Vulkan validation layers
    #[arg(long)]
    no_validation: bool,

    /// Present with FIFO instead of the low-latency mode
    #[arg(long)]
    vsync: bool,
}

impl Args {
    fn apply(&self, config: &mut EngineConfig) {
        if let Some(model) = &self.model {
            config.scene.model = Some(model.clone());
        }
        if let Some(texture) = &self.texture {
            config.scene.texture = Some(texture.clone());
        }
        if let Some(width) = self.width {
            config.window.width = width;
        }
        if let Some(height) = self.height {
            config.window.height = height;
        }
        if self.no_validation {
            config.renderer.validation = false;
        }
        if self.vsync {
            config.renderer.prefer_low_latency = false;
        }
    }
}

struct App {
    config: EngineConfig,
    window: Option<Window>,
    renderer: Option<Renderer>,
    timer: Timer,
    /// First fatal error; returned from `main` once the loop exits.
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(config: EngineConfig) -> Self {
        Self {
            config,
            window: None,
            renderer: None,
            timer: Timer::new(),
            fatal: None,
        }
    }

    /// Logs `error` and keeps it as the exit status unless one is already held.
    fn record_fatal(&mut self, error: anyhow::Error) {
        error!("{:#}", error);
        if self.fatal.is_none() {
            self.fatal = Some(error);
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        self.record_fatal(error);
        event_loop.exit();
    }

    /// Outcome of the run: the first fatal error, or success.
    fn finish(self) -> Result<()> {
        match self.fatal {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let delta = self.timer.delta_secs();
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        match renderer.render_frame(delta) {
            Ok(Some(FrameOutcome::Dropped)) => warn!("Frame dropped, swapchain out of date"),
            Ok(_) => {}
            Err(e) => self.fail(event_loop, anyhow::Error::new(e).context("Render error")),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window = match Window::new(event_loop, &self.config.window) {
            Ok(window) => window,
            Err(e) => {
                self.fail(
                    event_loop,
                    anyhow::Error::new(e).context("Failed to create window"),
                );
                return;
            }
        };
        match Renderer::new(&window, &self.config) {
            Ok(renderer) => {
                info!("Initialization complete, entering main loop");
                self.renderer = Some(renderer);
                self.window = Some(window);
            }
            Err(e) => self.fail(
                event_loop,
                anyhow::Error::new(e).context("Failed to create renderer"),
            ),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { event, .. }
                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape) =>
            {
                info!("Escape pressed, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                info!("Window resized to {}x{}", size.width, size.height);
                if let Some(window) = self.window.as_mut() {
                    window.resize(size.width, size.height);
                }
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref()
            && !window.is_minimized()
        {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Surface and swapchain go before the window they were created from.
        self.renderer = None;
        info!(
            "Ran for {:.1}s, last frame rate {:.1} fps",
            self.timer.elapsed_secs(),
            self.timer.fps()
        );
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = EngineConfig::load_or_default(&args.config)
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;
    args.apply(&mut config);

    deferred_core::init_logging(&config.logging.filter);
    info!("Starting deferred renderer");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    app.finish().context("Renderer stopped on a fatal error")
}

#[cfg(test)]
mod tests {
    use super::*;

    use deferred_rhi::RhiError;

    #[test]
    fn test_fatal_error_becomes_exit_status() {
        let mut app = App::new(EngineConfig::default());
        app.record_fatal(
            anyhow::Error::new(RhiError::ValidationFailed {
                count: 2,
                last: "bad layout".to_string(),
            })
            .context("Render error"),
        );
        app.record_fatal(anyhow::anyhow!("later failure"));

        let err = app.finish().unwrap_err();
        assert_eq!(err.to_string(), "Render error");
        let root = err.root_cause().to_string();
        assert!(root.contains("2 error(s)"), "{}", root);
    }

    #[test]
    fn test_clean_run_finishes_ok() {
        let app = App::new(EngineConfig::default());
        assert!(app.finish().is_ok());
    }

    #[test]
    fn test_cli_overrides_config() {
        let args = Args::parse_from([
            "deferred",
            "--model",
            "assets/sponza.gltf",
            "--width",
            "1920",
            "--no-validation",
            "--vsync",
        ]);
        let mut config = EngineConfig::default();
        config.renderer.validation = true;
        args.apply(&mut config);

        assert_eq!(config.scene.model, Some(PathBuf::from("assets/sponza.gltf")));
        assert_eq!(config.window.width, 1920);
        assert_eq!(config.window.height, EngineConfig::default().window.height);
        assert!(!config.renderer.validation);
        assert!(!config.renderer.prefer_low_latency);
    }

    #[test]
    fn test_no_flags_leave_config_untouched() {
        let args = Args::parse_from(["deferred"]);
        let mut config = EngineConfig::default();
        args.apply(&mut config);

        assert_eq!(args.config, PathBuf::from("deferred.toml"));
        assert!(config.scene.model.is_none());
        assert_eq!(
            config.renderer.prefer_low_latency,
            EngineConfig::default().renderer.prefer_low_latency
        );
    }
}
