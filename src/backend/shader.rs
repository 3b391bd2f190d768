// Shader module loading and management
//
// Vulkan uses SPIR-V bytecode for shaders. This module provides
// utilities to load compiled shaders and create shader modules.

use ash::vk;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::{EngineError, EngineResult};

/// Decode SPIR-V bytes into aligned 32-bit words.
pub fn read_spirv(bytes: &[u8]) -> std::io::Result<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytes))
}

/// Read a compiled shader from disk.
pub fn read_spirv_file(path: impl AsRef<Path>) -> EngineResult<Vec<u32>> {
    let path = path.as_ref();
    std::fs::read(path)
        .and_then(|bytes| read_spirv(&bytes))
        .map_err(|source| {
            log::error!("Could not read shader {:?}: {}", path, source);
            EngineError::ShaderIo {
                path: path.to_path_buf(),
                source,
            }
        })
}

/// Owned shader module, destroyed on drop. Only needed until the pipeline
/// using it has been created.
pub struct ShaderModule {
    pub handle: vk::ShaderModule,
    device: Arc<VulkanDevice>,
}

impl ShaderModule {
    pub fn from_words(device: Arc<VulkanDevice>, code: &[u32]) -> EngineResult<Self> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(code);
        let handle = unsafe { device.device.create_shader_module(&create_info, None) }?;
        Ok(Self { handle, device })
    }

    pub fn from_file(device: Arc<VulkanDevice>, path: impl AsRef<Path>) -> EngineResult<Self> {
        let code = read_spirv_file(path)?;
        Self::from_words(device, &code)
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_shader_module(self.handle, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_spirv_decodes_words() {
        let magic: u32 = 0x0723_0203;
        let mut bytes = magic.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0000u32.to_le_bytes());

        let words = read_spirv(&bytes).unwrap();
        assert_eq!(words, vec![magic, 0x0001_0000]);
    }

    #[test]
    fn test_read_spirv_rejects_partial_words() {
        assert!(read_spirv(&[0x03, 0x02, 0x23]).is_err());
    }

    #[test]
    fn test_missing_shader_file_is_shader_io_error() {
        let path = std::env::temp_dir().join("vulkan-engine-does-not-exist.spv");
        match read_spirv_file(&path) {
            Err(EngineError::ShaderIo { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected result: {:?}", other.map(|w| w.len())),
        }
    }
}
