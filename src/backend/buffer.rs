// Buffer utilities for vertex, index, uniform and staging buffers
//
// Memory comes from the device's gpu-allocator instance. CpuToGpu buffers are
// persistently mapped and can be written directly.

use ash::vk;
use bytemuck::Pod;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::{EngineError, EngineResult};

pub struct Buffer {
    pub handle: vk::Buffer,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl Buffer {
    pub fn new(
        device: Arc<VulkanDevice>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> EngineResult<Self> {
        if size == 0 {
            return Err(EngineError::Resource(format!("buffer '{name}' has zero size")));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = unsafe { device.device.create_buffer(&buffer_info, None) }?;
        let requirements = unsafe { device.device.get_buffer_memory_requirements(handle) };

        let allocation = match device.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(handle, None) };
                return Err(e);
            }
        };

        let bound = unsafe {
            device
                .device
                .bind_buffer_memory(handle, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            device.free(allocation);
            unsafe { device.device.destroy_buffer(handle, None) };
            return Err(e.into());
        }

        Ok(Self {
            handle,
            size,
            usage,
            allocation: Some(allocation),
            device,
        })
    }

    /// Host-visible buffer filled with `data`.
    pub fn with_data<T: Pod>(
        device: Arc<VulkanDevice>,
        usage: vk::BufferUsageFlags,
        data: &[T],
        name: &str,
    ) -> EngineResult<Self> {
        let size = std::mem::size_of_val(data) as vk::DeviceSize;
        let mut buffer = Self::new(device, size, usage, MemoryLocation::CpuToGpu, name)?;
        buffer.write_pod(0, data)?;
        Ok(buffer)
    }

    /// Copy `bytes` into the mapped allocation at `offset`.
    pub fn write(&mut self, offset: vk::DeviceSize, bytes: &[u8]) -> EngineResult<()> {
        check_range(offset, bytes.len() as vk::DeviceSize, self.size)?;

        let mapped = self
            .allocation
            .as_mut()
            .and_then(|a| a.mapped_slice_mut())
            .ok_or_else(|| EngineError::Resource("buffer memory is not host-mapped".into()))?;

        let start = offset as usize;
        mapped[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn write_pod<T: Pod>(&mut self, offset: vk::DeviceSize, data: &[T]) -> EngineResult<()> {
        self.write(offset, bytemuck::cast_slice(data))
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_buffer(self.handle, None) };
        if let Some(allocation) = self.allocation.take() {
            self.device.free(allocation);
        }
    }
}

/// Check that `len` bytes at `offset` fit in a buffer of `capacity` bytes.
pub fn check_range(offset: vk::DeviceSize, len: vk::DeviceSize, capacity: vk::DeviceSize) -> EngineResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(EngineError::Resource(format!(
            "write of {len} bytes at offset {offset} exceeds buffer size {capacity}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_range_accepts_exact_fit() {
        assert!(check_range(0, 64, 64).is_ok());
        assert!(check_range(32, 32, 64).is_ok());
        assert!(check_range(64, 0, 64).is_ok());
    }

    #[test]
    fn test_check_range_rejects_overflow() {
        assert!(check_range(1, 64, 64).is_err());
        assert!(check_range(u64::MAX, 2, 64).is_err());
    }

    #[test]
    fn test_pod_upload_fits_allocated_size() {
        // Interleaved position + color, as the grid uploads it
        let vertices = [[0.0f32; 6]; 84];
        let size = std::mem::size_of_val(&vertices[..]) as vk::DeviceSize;
        let bytes: &[u8] = bytemuck::cast_slice(&vertices[..]);

        assert_eq!(size, 84 * 24);
        assert!(check_range(0, bytes.len() as vk::DeviceSize, size).is_ok());
        assert!(check_range(4, bytes.len() as vk::DeviceSize, size).is_err());
    }
}
