// Vulkan engine core
//
// Device context, swapchain, frame loop and pipeline builder on top of ash,
// plus the mesh cache format used by the demos.

pub mod app;
pub mod backend;
pub mod config;
pub mod error;
pub mod fps;
pub mod mesh;

pub use app::{Application, BaseApp};
pub use backend::{ContextDesc, VulkanContext};
pub use config::Config;
pub use error::{EngineError, EngineResult};
