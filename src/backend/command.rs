// Command pools and one-shot submission

use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::EngineResult;

pub struct CommandPool {
    pub handle: vk::CommandPool,
    device: Arc<VulkanDevice>,
}

impl CommandPool {
    /// Pool on `queue_family` whose buffers can be reset one at a time.
    pub fn new(device: Arc<VulkanDevice>, queue_family: u32) -> EngineResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            // RESET: per-frame buffers are re-recorded every frame
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let handle = unsafe { device.device.create_command_pool(&pool_info, None) }?;
        Ok(Self { handle, device })
    }

    pub fn allocate(&self, count: u32) -> EngineResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.handle)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        Ok(unsafe { self.device.device.allocate_command_buffers(&alloc_info) }?)
    }

    pub fn free(&self, buffers: &[vk::CommandBuffer]) {
        if buffers.is_empty() {
            return;
        }
        unsafe { self.device.device.free_command_buffers(self.handle, buffers) };
    }

    /// Record `record` into a throwaway buffer, submit it to `queue` and block
    /// on a fence until it completes.
    pub fn submit_and_wait<F>(&self, queue: vk::Queue, record: F) -> EngineResult<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let device = &self.device.device;
        let cmd = self.allocate(1)?[0];

        let result = (|| -> EngineResult<()> {
            let begin_info =
                vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe { device.begin_command_buffer(cmd, &begin_info) }?;

            record(device, cmd);

            unsafe { device.end_command_buffer(cmd) }?;

            let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) }?;
            let command_buffers = [cmd];
            let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);

            let submitted = unsafe {
                device
                    .queue_submit(queue, &[submit_info], fence)
                    .and_then(|_| device.wait_for_fences(&[fence], true, u64::MAX))
            };
            unsafe { device.destroy_fence(fence, None) };
            submitted?;
            Ok(())
        })();

        self.free(&[cmd]);
        result
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_command_pool(self.handle, None) };
    }
}
