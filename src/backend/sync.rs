// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync
// Critical for correct and efficient multi-frame rendering

use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::EngineResult;

/// Frame synchronization - one per frame in flight
///
/// The command buffer belongs to the shared command pool and is released with
/// it; only the semaphores and the fence are owned here.
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
    pub command_buffer: vk::CommandBuffer,
    device: Arc<VulkanDevice>,
}

impl FrameSync {
    pub fn new(device: Arc<VulkanDevice>, command_buffer: vk::CommandBuffer) -> EngineResult<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        // Start signaled so the first wait on every slot returns immediately
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        let image_available = unsafe { device.device.create_semaphore(&semaphore_info, None) }?;
        let render_finished = match unsafe { device.device.create_semaphore(&semaphore_info, None) } {
            Ok(s) => s,
            Err(e) => {
                unsafe { device.device.destroy_semaphore(image_available, None) };
                return Err(e.into());
            }
        };
        let in_flight_fence = match unsafe { device.device.create_fence(&fence_info, None) } {
            Ok(f) => f,
            Err(e) => unsafe {
                device.device.destroy_semaphore(image_available, None);
                device.device.destroy_semaphore(render_finished, None);
                return Err(e.into());
            },
        };

        Ok(Self {
            image_available,
            render_finished,
            in_flight_fence,
            command_buffer,
            device,
        })
    }

    /// Block until the GPU has finished with this slot.
    pub fn wait(&self) -> EngineResult<()> {
        unsafe {
            self.device
                .device
                .wait_for_fences(&[self.in_flight_fence], true, u64::MAX)
        }?;
        Ok(())
    }

    pub fn reset(&self) -> EngineResult<()> {
        unsafe { self.device.device.reset_fences(&[self.in_flight_fence]) }?;
        Ok(())
    }

    /// Swap in a fresh signaled fence and a fresh image-available semaphore.
    /// The device must be idle.
    pub fn rebuild(&mut self) -> EngineResult<()> {
        let device = &self.device.device;
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        let fence = unsafe { device.create_fence(&fence_info, None) }?;
        let semaphore = match unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) } {
            Ok(s) => s,
            Err(e) => {
                unsafe { device.destroy_fence(fence, None) };
                return Err(e.into());
            }
        };

        unsafe {
            device.destroy_fence(self.in_flight_fence, None);
            device.destroy_semaphore(self.image_available, None);
        }
        self.in_flight_fence = fence;
        self.image_available = semaphore;
        Ok(())
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_semaphore(self.image_available, None);
            self.device.device.destroy_semaphore(self.render_finished, None);
            self.device.device.destroy_fence(self.in_flight_fence, None);
        }
    }
}
