//! Core utilities shared by every crate of the deferred renderer.
//!
//! This crate provides foundational types used across the workspace:
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timer
//! - Engine configuration loaded from TOML

mod config;
mod error;
mod logging;
mod timer;

pub use config::{EngineConfig, LoggingConfig, RendererConfig, SceneConfig, WindowConfig};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::Timer;
