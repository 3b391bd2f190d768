// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash with safety and ergonomics
// Performance: Zero-cost abstractions, explicit control

pub mod buffer;
pub mod command;
pub mod context;
pub mod device;
pub mod frame;
pub mod instance;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod texture;

pub use buffer::Buffer;
pub use context::{ContextDesc, VulkanContext};
pub use device::{GpuPreference, VulkanDevice};
pub use instance::VulkanInstance;
pub use pipeline::{DefaultPipeline, GraphicsPipelineDesc, LinePipeline, PipelineBuilder, PipelineHandle};
pub use swapchain::Swapchain;
pub use texture::{Texture, TextureDesc};
