// Engine error types
//
// Library code returns EngineResult. The binary and demo apps wrap these in
// anyhow with context, the way the renderer always has.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

use crate::mesh::MeshCacheError;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Vulkan library could not be loaded
    #[error("Failed to load Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    /// Raw API result that has no more specific meaning
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    #[error("Allocator error: {0}")]
    Allocator(#[from] gpu_allocator::AllocationError),

    #[error("Instance layer {0} not found")]
    MissingInstanceLayer(String),

    #[error("Instance extension {0} not found")]
    MissingInstanceExtension(String),

    #[error("Device extension {0} not found")]
    MissingDeviceExtension(String),

    #[error("No discrete GPU found")]
    NoDiscreteGpu,

    #[error("No Vulkan-capable GPU found")]
    NoSuitableGpu,

    /// No queue family offers the requested capabilities. Unlike the other
    /// capability errors this points at an unexpected driver state.
    #[error("Could not find a queue family matching {0:?}")]
    QueueFamilyNotFound(vk::QueueFlags),

    #[error("Surface error: {0}")]
    Surface(String),

    #[error("Swapchain error: {0}")]
    Swapchain(String),

    #[error("Could not read shader file {path:?}: {source}")]
    ShaderIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Resource error: {0}")]
    Resource(String),

    #[error(transparent)]
    MeshCache(#[from] MeshCacheError),
}

impl EngineError {
    /// True for presentation results that swapchain recreation fixes.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR)
        )
    }

    /// True for failures that must stop initialization for good.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::Loading(_)
                | EngineError::MissingInstanceLayer(_)
                | EngineError::MissingInstanceExtension(_)
                | EngineError::MissingDeviceExtension(_)
                | EngineError::NoDiscreteGpu
                | EngineError::NoSuitableGpu
                | EngineError::QueueFamilyNotFound(_)
                | EngineError::Surface(_)
                | EngineError::ShaderIo { .. }
                | EngineError::MeshCache(_)
        )
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_date_is_recoverable() {
        let err = EngineError::from(vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert!(err.is_recoverable());
        assert!(!err.is_fatal());

        let err = EngineError::from(vk::Result::ERROR_DEVICE_LOST);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_capability_errors_are_fatal() {
        assert!(EngineError::NoDiscreteGpu.is_fatal());
        assert!(EngineError::QueueFamilyNotFound(vk::QueueFlags::COMPUTE).is_fatal());
        assert!(EngineError::MissingInstanceLayer("VK_LAYER_x".into()).is_fatal());
        assert!(!EngineError::Pipeline("layout".into()).is_fatal());
    }

    #[test]
    fn test_messages_name_the_missing_capability() {
        let err = EngineError::MissingDeviceExtension("VK_KHR_swapchain".into());
        assert_eq!(err.to_string(), "Device extension VK_KHR_swapchain not found");
    }
}
