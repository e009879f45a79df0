//! Engine configuration loaded from a TOML file.
//!
//! Every field has a default, so an empty or partial file is valid:
//!
//! ```toml
//! [window]
//! width = 1600
//! height = 900
//!
//! [renderer]
//! shadow_map_size = 2048
//! debug_overlay = true
//!
//! [scene]
//! model = "assets/models/sponza/Sponza.gltf"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub window: WindowConfig,
    pub renderer: RendererConfig,
    pub scene: SceneConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            title: "Deferred Renderer".to_string(),
        }
    }
}

/// Renderer knobs. Frames-in-flight is fixed and not configurable.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Enable the Khronos validation layer and debug names.
    pub validation: bool,
    /// Prefer MAILBOX over FIFO when the surface offers it.
    pub prefer_low_latency: bool,
    /// Edge length of the square shadow map.
    pub shadow_map_size: u32,
    /// Record the debug line pass.
    pub debug_overlay: bool,
    /// Submit model bounding boxes as debug lines.
    pub draw_bounds: bool,
    /// Generate mip chains for uploaded textures.
    pub generate_mipmaps: bool,
    /// Directory holding the compiled `*.spv` shaders.
    pub shader_dir: PathBuf,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            prefer_low_latency: true,
            shadow_map_size: 4096,
            debug_overlay: true,
            draw_bounds: false,
            generate_mipmaps: false,
            shader_dir: PathBuf::from("shaders/spirv"),
        }
    }
}

/// Scene wiring: which model to load and where the camera and sun start.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// glTF model; a procedural scene is built when absent.
    pub model: Option<PathBuf>,
    /// Albedo texture applied to the model.
    pub texture: Option<PathBuf>,
    pub model_scale: f32,
    pub camera_position: [f32; 3],
    pub camera_target: [f32; 3],
    pub camera_far: f32,
    /// Degrees per second the camera orbits the target.
    pub orbit_speed: f32,
    pub sun_position: [f32; 3],
    pub light_color: [f32; 3],
    pub light_radius: f32,
    pub light_intensity: f32,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            model: None,
            texture: None,
            model_scale: 1.0,
            camera_position: [0.0, 40.0, 120.0],
            camera_target: [0.0, 0.0, 0.0],
            camera_far: 5000.0,
            orbit_speed: 10.0,
            sun_position: [0.0, 1000.0, 30.0],
            light_color: [1.0, 1.0, 1.0],
            light_radius: 1500.0,
            light_intensity: 100.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Parses a configuration from TOML text.
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Loads `path`, falling back to defaults when the file does not exist.
    ///
    /// A file that exists but fails to parse is an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let config = Self::from_toml_str(&text, path)?;
                info!("Loaded config from {}", path.display());
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = EngineConfig::from_toml_str("", Path::new("empty.toml")).unwrap();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.renderer.shadow_map_size, 4096);
        assert!(config.renderer.prefer_low_latency);
        assert!(config.scene.model.is_none());
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let text = r#"
            [window]
            width = 1600

            [renderer]
            shadow_map_size = 2048
            debug_overlay = false

            [scene]
            model = "assets/scene.gltf"
        "#;
        let config = EngineConfig::from_toml_str(text, Path::new("engine.toml")).unwrap();
        assert_eq!(config.window.width, 1600);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.renderer.shadow_map_size, 2048);
        assert!(!config.renderer.debug_overlay);
        assert_eq!(
            config.scene.model.as_deref(),
            Some(Path::new("assets/scene.gltf"))
        );
        assert_eq!(config.scene.light_radius, 1500.0);
    }

    #[test]
    fn test_invalid_toml_reports_path() {
        let err = EngineConfig::from_toml_str("[window\nwidth = ", Path::new("broken.toml"))
            .unwrap_err();
        match err {
            Error::Config { path, .. } => assert_eq!(path, PathBuf::from("broken.toml")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config =
            EngineConfig::load_or_default(Path::new("definitely/not/here/engine.toml")).unwrap();
        assert_eq!(config.window.title, "Deferred Renderer");
    }
}
