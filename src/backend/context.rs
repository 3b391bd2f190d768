// Vulkan Context - the Device Context
//
// Brings up instance, surface, device, swapchain, per-frame sync and the
// command pool, and hands out buffers, textures and pipelines.
//
// Teardown follows field order: pipelines, then the presenter (swapchain,
// frame sync, command pool, surface), then the device. Every resource holds
// an Arc to what it was created from, so nothing outlives its parent.

use ash::prelude::VkResult;
use ash::vk;
use gpu_allocator::MemoryLocation;
use std::ffi::CStr;
use std::sync::Arc;
use winit::window::Window;

use super::buffer::Buffer;
use super::command::CommandPool;
use super::device::{DeviceDesc, GpuPreference};
use super::frame::{FrameCycle, FrameStatus, FrameTarget};
use super::pipeline::{Pipeline, PipelineBuilder, PipelineHandle};
use super::surface::{required_surface_extensions, Surface};
use super::swapchain::{Swapchain, VulkanSwapchainOps};
use super::sync::FrameSync;
use super::texture::{self, Texture, TextureDesc};
use super::{VulkanDevice, VulkanInstance};
use crate::error::{EngineError, EngineResult};

pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

/// Everything the context asks of the platform and the GPU.
#[derive(Debug, Clone)]
pub struct ContextDesc {
    pub app_name: String,
    pub instance_layers: Vec<&'static CStr>,
    /// Surface extensions for the window are added automatically
    pub instance_extensions: Vec<&'static CStr>,
    pub device_extensions: Vec<&'static CStr>,
    pub api_version: u32,
    pub frames_in_flight: usize,
    pub gpu_preference: GpuPreference,
    pub present_mode: vk::PresentModeKHR,
    pub request_compute: bool,
    pub request_transfer: bool,
}

impl Default for ContextDesc {
    fn default() -> Self {
        Self {
            app_name: "Vulkan Engine".to_string(),
            instance_layers: Vec::new(),
            instance_extensions: Vec::new(),
            device_extensions: vec![ash::khr::swapchain::NAME],
            api_version: vk::API_VERSION_1_3,
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            gpu_preference: GpuPreference::DiscreteOnly,
            present_mode: vk::PresentModeKHR::MAILBOX,
            request_compute: false,
            request_transfer: false,
        }
    }
}

impl ContextDesc {
    /// Enable the Khronos validation layer and the debug messenger.
    pub fn with_validation(mut self) -> Self {
        push_unique(&mut self.instance_layers, c"VK_LAYER_KHRONOS_validation");
        push_unique(&mut self.instance_extensions, ash::ext::debug_utils::NAME);
        self
    }
}

fn push_unique(names: &mut Vec<&'static CStr>, name: &'static CStr) {
    if !names.contains(&name) {
        names.push(name);
    }
}

/// Swapchain plus everything needed to drive one frame slot.
struct Presenter {
    swapchain: Swapchain,
    frame_syncs: Vec<FrameSync>,
    command_pool: CommandPool,
    surface: Surface,
    window: Arc<Window>,
    generation: u64,
    device: Arc<VulkanDevice>,
}

impl Presenter {
    fn framebuffer_extent(&self) -> vk::Extent2D {
        let size = self.window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }

    fn current_range() -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        }
    }
}

impl FrameTarget for Presenter {
    fn extent(&self) -> vk::Extent2D {
        self.framebuffer_extent()
    }

    fn wait_for_slot(&mut self, slot: usize) -> EngineResult<()> {
        self.frame_syncs[slot].wait()
    }

    fn acquire_image(&mut self, slot: usize) -> VkResult<(u32, bool)> {
        self.swapchain.acquire_image(self.frame_syncs[slot].image_available)
    }

    fn reset_slot(&mut self, slot: usize) -> EngineResult<()> {
        self.frame_syncs[slot].reset()
    }

    fn begin_commands(&mut self, slot: usize) -> EngineResult<()> {
        let device = &self.device.device;
        let cmd = self.frame_syncs[slot].command_buffer;

        let begin_info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            device.begin_command_buffer(cmd, &begin_info)?;
        }

        texture::transition_layout(
            device,
            cmd,
            self.swapchain.image(),
            Self::current_range(),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        Ok(())
    }

    fn end_commands(&mut self, slot: usize) -> EngineResult<()> {
        let device = &self.device.device;
        let cmd = self.frame_syncs[slot].command_buffer;

        texture::transition_layout(
            device,
            cmd,
            self.swapchain.image(),
            Self::current_range(),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );

        unsafe { device.end_command_buffer(cmd) }?;
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> EngineResult<()> {
        let sync = &self.frame_syncs[slot];

        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [sync.render_finished];
        let command_buffers = [sync.command_buffer];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores) // Wait for image to be available
            .wait_dst_stage_mask(&wait_stages) // Which stage waits
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores); // Signal when done

        unsafe {
            self.device
                .device
                .queue_submit(self.device.graphics_queue, &[submit_info], sync.in_flight_fence)
        }?;
        Ok(())
    }

    fn present(&mut self, slot: usize) -> VkResult<bool> {
        self.swapchain
            .present(self.device.graphics_queue, self.frame_syncs[slot].render_finished)
    }

    fn restore_slot(&mut self, slot: usize) -> EngineResult<()> {
        let sync = &self.frame_syncs[slot];

        // Empty batch: consumes the acquire semaphore and signals the fence
        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::ALL_COMMANDS];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages);

        let submitted = unsafe {
            self.device
                .device
                .queue_submit(self.device.graphics_queue, &[submit_info], sync.in_flight_fence)
        };

        if let Err(e) = submitted {
            log::warn!("Empty submit for slot {} failed ({:?}), rebuilding its sync objects", slot, e);
            self.device.wait_idle()?;
            self.frame_syncs[slot].rebuild()?;
        }
        Ok(())
    }

    /// Coarse but safe: nothing from the old swapchain can still be in use.
    fn recreate_swapchain(&mut self) -> EngineResult<()> {
        self.device.wait_idle()?;
        self.swapchain.create(self.framebuffer_extent())?;
        self.generation += 1;
        Ok(())
    }
}

/// Bring-up of the objects every other resource hangs off, in dependency
/// order. Each output releases its handle on Drop and keeps what it was
/// created from alive, so an error part-way unwinds exactly what exists.
pub(crate) trait BringUp {
    type Instance;
    type Surface;
    type Device;

    fn create_instance(&mut self) -> EngineResult<Self::Instance>;
    fn create_surface(&mut self, instance: &Self::Instance) -> EngineResult<Self::Surface>;
    /// Pick the GPU and create the logical device able to present to `surface`.
    fn create_device(&mut self, instance: Self::Instance, surface: &Self::Surface) -> EngineResult<Self::Device>;
}

pub(crate) fn bring_up<B: BringUp>(steps: &mut B) -> EngineResult<(B::Surface, B::Device)> {
    let instance = steps.create_instance()?;
    let surface = steps.create_surface(&instance)?;
    let device = steps.create_device(instance, &surface)?;
    Ok((surface, device))
}

struct WindowBringUp<'a> {
    window: &'a Window,
    desc: &'a ContextDesc,
}

impl BringUp for WindowBringUp<'_> {
    type Instance = Arc<VulkanInstance>;
    type Surface = Surface;
    type Device = Arc<VulkanDevice>;

    fn create_instance(&mut self) -> EngineResult<Self::Instance> {
        let mut instance_extensions = required_surface_extensions(self.window)?;
        for &ext in &self.desc.instance_extensions {
            if !instance_extensions.contains(&ext) {
                instance_extensions.push(ext);
            }
        }

        VulkanInstance::new(
            &self.desc.app_name,
            &self.desc.instance_layers,
            &instance_extensions,
            self.desc.api_version,
        )
    }

    fn create_surface(&mut self, instance: &Self::Instance) -> EngineResult<Self::Surface> {
        Surface::new(instance.clone(), self.window)
    }

    fn create_device(&mut self, instance: Self::Instance, surface: &Self::Surface) -> EngineResult<Self::Device> {
        let device = VulkanDevice::new(
            instance,
            &DeviceDesc {
                extensions: &self.desc.device_extensions,
                preference: self.desc.gpu_preference,
                request_compute: self.desc.request_compute,
                request_transfer: self.desc.request_transfer,
            },
        )?;

        let graphics_family = device.queue_families.graphics;
        let can_present = unsafe {
            surface.loader.get_physical_device_surface_support(
                device.physical_device,
                graphics_family,
                surface.handle,
            )
        }?;
        if !can_present {
            log::error!("Graphics queue family {} cannot present to the surface", graphics_family);
            return Err(EngineError::Surface(format!(
                "queue family {graphics_family} cannot present"
            )));
        }
        Ok(device)
    }
}

pub struct VulkanContext {
    pipelines: Vec<Pipeline>,
    frames: FrameCycle,
    presenter: Presenter,
    device: Arc<VulkanDevice>,
}

impl VulkanContext {
    /// Initialize everything needed to render into `window`.
    ///
    /// Any failure leaves nothing behind: partially built objects are dropped
    /// in reverse order on the way out.
    pub fn new(window: Arc<Window>, desc: &ContextDesc) -> EngineResult<Self> {
        let (surface, device) = bring_up(&mut WindowBringUp {
            window: window.as_ref(),
            desc,
        })?;
        let graphics_family = device.queue_families.graphics;

        let command_pool = CommandPool::new(device.clone(), graphics_family)?;
        let frames_in_flight = desc.frames_in_flight.max(1);
        let command_buffers = command_pool.allocate(frames_in_flight as u32)?;

        let frame_syncs = command_buffers
            .into_iter()
            .map(|cmd| FrameSync::new(device.clone(), cmd))
            .collect::<EngineResult<Vec<_>>>()?;

        let ops = VulkanSwapchainOps::new(device.clone(), surface.handle, surface.loader.clone());
        let mut swapchain = Swapchain::new(ops, desc.present_mode);

        let size = window.inner_size();
        swapchain.create(vk::Extent2D {
            width: size.width,
            height: size.height,
        })?;

        log::info!(
            "Vulkan context ready: {} ({} frames in flight)",
            device.name(),
            frames_in_flight
        );

        Ok(Self {
            pipelines: Vec::new(),
            frames: FrameCycle::new(frames_in_flight),
            presenter: Presenter {
                swapchain,
                frame_syncs,
                command_pool,
                surface,
                window,
                generation: 0,
                device: device.clone(),
            },
            device,
        })
    }

    // =========================================================================
    // FRAME LIFECYCLE
    // =========================================================================

    /// Start a frame. `false` means skip rendering this iteration.
    pub fn begin_render(&mut self) -> EngineResult<bool> {
        let status = self.frames.begin(&mut self.presenter)?;
        Ok(status == FrameStatus::Ready)
    }

    /// Submit and present the frame started by `begin_render`.
    pub fn end_render(&mut self) -> EngineResult<()> {
        self.frames.end(&mut self.presenter)
    }

    /// Wait for the device, then rebuild the swapchain at the window's size.
    pub fn window_resize(&mut self) -> EngineResult<()> {
        self.presenter.recreate_swapchain()
    }

    /// Defer recreation to the next frame boundary.
    pub fn request_resize(&mut self) {
        self.frames.mark_resized();
    }

    pub fn wait_device_idle(&self) -> EngineResult<()> {
        self.device.wait_idle()
    }

    pub fn wait_queue_idle(&self) -> EngineResult<()> {
        self.device.wait_queue_idle()
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn device(&self) -> &Arc<VulkanDevice> {
        &self.device
    }

    pub fn raw_device(&self) -> &ash::Device {
        &self.device.device
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.presenter.window
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.presenter.swapchain
    }

    /// Bumped every time the swapchain is rebuilt.
    pub fn swapchain_generation(&self) -> u64 {
        self.presenter.generation
    }

    /// Command buffer of the frame being recorded.
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.presenter.frame_syncs[self.frames.current_frame()].command_buffer
    }

    pub fn frame_index(&self) -> usize {
        self.frames.current_frame()
    }

    pub fn frame_count(&self) -> u64 {
        self.frames.frame_count()
    }

    // =========================================================================
    // RECORDING HELPERS
    // =========================================================================

    /// Begin dynamic rendering into the current swapchain image.
    pub fn begin_rendering(&self, cmd: vk::CommandBuffer, clear_color: [f32; 4], depth: Option<&Texture>) {
        let extent = self.swapchain().extent();

        let color_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(self.swapchain().image_view())
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue { float32: clear_color },
            });

        let depth_attachment = depth.map(|d| {
            vk::RenderingAttachmentInfo::default()
                .image_view(d.view)
                .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .clear_value(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
                })
        });

        if let Some(d) = depth {
            texture::transition_layout(
                self.raw_device(),
                cmd,
                d.image,
                d.desc.subresource_range(),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            );
        }

        let color_attachments = [color_attachment];
        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            })
            .layer_count(1)
            .color_attachments(&color_attachments);
        if let Some(depth_attachment) = depth_attachment.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth_attachment);
        }

        unsafe { self.raw_device().cmd_begin_rendering(cmd, &rendering_info) };
        self.set_full_viewport(cmd);
    }

    pub fn end_rendering(&self, cmd: vk::CommandBuffer) {
        unsafe { self.raw_device().cmd_end_rendering(cmd) };
    }

    /// Viewport and scissor covering the whole swapchain image.
    pub fn set_full_viewport(&self, cmd: vk::CommandBuffer) {
        let extent = self.swapchain().extent();
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        };
        unsafe {
            self.raw_device().cmd_set_viewport(cmd, 0, &[viewport]);
            self.raw_device().cmd_set_scissor(cmd, 0, &[scissor]);
        }
    }

    // =========================================================================
    // RESOURCE FACTORY
    // =========================================================================

    /// Build a pipeline and keep it alive until the context is dropped.
    pub fn create_graphics_pipeline(&mut self, builder: &dyn PipelineBuilder) -> EngineResult<PipelineHandle> {
        match Pipeline::new(self.device.clone(), builder, self.swapchain().format()) {
            Ok(pipeline) => {
                let handle = pipeline.handle();
                self.pipelines.push(pipeline);
                Ok(handle)
            }
            Err(e) => {
                log::error!("Failed to create graphics pipeline: {}", e);
                Err(e)
            }
        }
    }

    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> EngineResult<Buffer> {
        Buffer::new(self.device.clone(), size, usage, location, name).inspect_err(|e| {
            log::error!("Failed to create buffer '{}': {}", name, e);
        })
    }

    pub fn create_texture(&self, desc: &TextureDesc, location: MemoryLocation, name: &str) -> EngineResult<Texture> {
        Texture::new(self.device.clone(), desc, location, name).inspect_err(|e| {
            log::error!("Failed to create texture '{}': {}", name, e);
        })
    }

    /// Depth attachment matching the current swapchain extent.
    pub fn create_depth_texture(&self, format: vk::Format) -> EngineResult<Texture> {
        let desc = TextureDesc::depth(self.swapchain().extent(), format);
        self.create_texture(&desc, MemoryLocation::GpuOnly, "depth")
    }

    /// Record and run one-off commands, returning once the GPU is done.
    pub fn immediate_submit<F>(&self, record: F) -> EngineResult<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        self.presenter
            .command_pool
            .submit_and_wait(self.device.graphics_queue, record)
    }

    /// Copy `data` through `staging` into `dst`.
    ///
    /// Returns after the copy has executed, so `staging` may be dropped or
    /// reused right away.
    pub fn upload_buffer(&self, data: &[u8], staging: &mut Buffer, dst: &Buffer) -> EngineResult<()> {
        if data.len() as vk::DeviceSize > dst.size {
            return Err(EngineError::Resource(format!(
                "upload of {} bytes exceeds destination size {}",
                data.len(),
                dst.size
            )));
        }
        staging.write(0, data)?;

        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: data.len() as vk::DeviceSize,
        };
        let (src, dst) = (staging.handle, dst.handle);
        self.immediate_submit(|device, cmd| unsafe {
            device.cmd_copy_buffer(cmd, src, dst, &[region]);
        })
    }

    /// Upload every array layer of mip 0 from `data` (layers packed back to
    /// back), then build the mip chain or move the image to shader-read.
    pub fn upload_texture(&self, texture: &Texture, data: &[u8]) -> EngineResult<()> {
        let desc = texture.desc;
        let layers = vk::DeviceSize::from(desc.array_layers.max(1));
        let layer_size = data.len() as vk::DeviceSize / layers;

        let mut staging = self.create_buffer(
            data.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            "texture staging",
        )?;
        staging.write(0, data)?;

        let regions = texture::layer_copy_regions(&desc, layer_size);
        let (src, image) = (staging.handle, texture.image);

        self.immediate_submit(|device, cmd| {
            texture::transition_layout(
                device,
                cmd,
                image,
                desc.subresource_range(),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );

            unsafe {
                device.cmd_copy_buffer_to_image(cmd, src, image, vk::ImageLayout::TRANSFER_DST_OPTIMAL, &regions);
            }

            if desc.mip_levels > 1 {
                texture::generate_mipmaps(device, cmd, &desc, image);
            } else {
                texture::transition_layout(
                    device,
                    cmd,
                    image,
                    desc.subresource_range(),
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                );
            }
        })
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan context...");
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for device idle: {}", e);
        }
    }
}
