//! Platform layer: window creation via winit and the Vulkan surface it owns.

mod window;

pub use window::{Surface, Window};

// Re-export winit types the application needs
pub use winit::event::WindowEvent;
pub use winit::event_loop::{ActiveEventLoop, EventLoop};
