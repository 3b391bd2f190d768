// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// Recreation always creates the new chain first and only then destroys the
// old one, so the window never sits without a valid swapchain.

use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::{EngineError, EngineResult};

/// Formats accepted without further thought, in no particular order.
pub const PREFERRED_FORMATS: [vk::Format; 2] = [vk::Format::B8G8R8A8_SRGB, vk::Format::R8G8B8A8_SRGB];

/// Native calls the swapchain manager needs.
///
/// The Vulkan implementation is [`VulkanSwapchainOps`]; tests substitute a
/// recording mock.
pub trait SwapchainOps {
    fn surface(&self) -> vk::SurfaceKHR;
    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR>;
    fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>>;
    fn present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>>;
    fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR<'_>) -> VkResult<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;
    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> VkResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn acquire_next_image(&self, swapchain: vk::SwapchainKHR, semaphore: vk::Semaphore) -> VkResult<(u32, bool)>;
    fn queue_present(&self, queue: vk::Queue, info: &vk::PresentInfoKHR<'_>) -> VkResult<bool>;
}

pub struct VulkanSwapchainOps {
    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    loader: ash::khr::swapchain::Device,
    device: Arc<VulkanDevice>,
}

impl VulkanSwapchainOps {
    pub fn new(device: Arc<VulkanDevice>, surface: vk::SurfaceKHR, surface_loader: ash::khr::surface::Instance) -> Self {
        let loader = ash::khr::swapchain::Device::new(&device.instance.instance, &device.device);
        Self {
            surface,
            surface_loader,
            loader,
            device,
        }
    }
}

impl SwapchainOps for VulkanSwapchainOps {
    fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.device.physical_device, self.surface)
        }
    }

    fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.device.physical_device, self.surface)
        }
    }

    fn present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(self.device.physical_device, self.surface)
        }
    }

    fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR<'_>) -> VkResult<vk::SwapchainKHR> {
        unsafe { self.loader.create_swapchain(info, None) }
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        unsafe { self.loader.get_swapchain_images(swapchain) }
    }

    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> VkResult<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        unsafe { self.device.device.create_image_view(&create_info, None) }
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.device.destroy_image_view(view, None) };
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.loader.destroy_swapchain(swapchain, None) };
    }

    fn acquire_next_image(&self, swapchain: vk::SwapchainKHR, semaphore: vk::Semaphore) -> VkResult<(u32, bool)> {
        unsafe {
            self.loader
                .acquire_next_image(swapchain, u64::MAX, semaphore, vk::Fence::null())
        }
    }

    fn queue_present(&self, queue: vk::Queue, info: &vk::PresentInfoKHR<'_>) -> VkResult<bool> {
        unsafe { self.loader.queue_present(queue, info) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainState {
    Uninitialized,
    Created,
    /// Framebuffer has no area (minimized window); nothing can be presented
    Suspended,
    Destroyed,
}

pub struct Swapchain<O: SwapchainOps = VulkanSwapchainOps> {
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    preferred_present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    image_index: u32,
    state: SwapchainState,
    ops: O,
}

impl<O: SwapchainOps> Swapchain<O> {
    pub fn new(ops: O, preferred_present_mode: vk::PresentModeKHR) -> Self {
        Self {
            handle: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            surface_format: vk::SurfaceFormatKHR::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            preferred_present_mode,
            extent: vk::Extent2D::default(),
            image_index: 0,
            state: SwapchainState::Uninitialized,
            ops,
        }
    }

    /// Create (or recreate) the swapchain for a framebuffer of the given size.
    ///
    /// Surface capabilities, formats and present modes are queried again on
    /// every call. The previous swapchain is handed to the driver as
    /// `old_swapchain` and destroyed only once the new one exists.
    pub fn create(&mut self, framebuffer: vk::Extent2D) -> EngineResult<()> {
        let caps = self.ops.surface_capabilities()?;

        let extent = resolve_extent(&caps, framebuffer);
        if extent.width == 0 || extent.height == 0 {
            log::debug!("Framebuffer has no area, swapchain suspended");
            self.extent = extent;
            self.state = SwapchainState::Suspended;
            return Ok(());
        }

        let formats = self.ops.surface_formats()?;
        let surface_format = choose_surface_format(&formats)
            .ok_or_else(|| EngineError::Swapchain("surface reports no formats".into()))?;

        let present_modes = self.ops.present_modes()?;
        let present_mode = choose_present_mode(&present_modes, self.preferred_present_mode);

        let image_count = choose_image_count(&caps);

        log::info!(
            "Creating swapchain: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            image_count,
            surface_format.format,
            present_mode
        );

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.ops.surface())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(self.handle);

        let swapchain = self.ops.create_swapchain(&create_info)?;

        let images = match self.ops.swapchain_images(swapchain) {
            Ok(images) => images,
            Err(e) => {
                self.ops.destroy_swapchain(swapchain);
                return Err(e.into());
            }
        };

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            match self.ops.create_image_view(image, surface_format.format) {
                Ok(view) => image_views.push(view),
                Err(e) => {
                    for view in image_views {
                        self.ops.destroy_image_view(view);
                    }
                    self.ops.destroy_swapchain(swapchain);
                    return Err(e.into());
                }
            }
        }

        // New chain is live; retire the old one
        self.release();

        log::info!("Created swapchain with {} images", images.len());

        self.handle = swapchain;
        self.images = images;
        self.image_views = image_views;
        self.surface_format = surface_format;
        self.present_mode = present_mode;
        self.extent = extent;
        self.image_index = 0;
        self.state = SwapchainState::Created;
        Ok(())
    }

    /// Destroy image views and the swapchain. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        let had_swapchain = self.handle != vk::SwapchainKHR::null();
        self.release();
        if had_swapchain || self.state != SwapchainState::Uninitialized {
            self.state = SwapchainState::Destroyed;
        }
    }

    fn release(&mut self) {
        for view in self.image_views.drain(..) {
            self.ops.destroy_image_view(view);
        }
        self.images.clear();
        if self.handle != vk::SwapchainKHR::null() {
            self.ops.destroy_swapchain(self.handle);
            self.handle = vk::SwapchainKHR::null();
        }
    }

    /// Acquire the next image, waiting without timeout.
    ///
    /// The index is remembered for [`Self::image`]; interpreting the result
    /// code is the caller's job.
    pub fn acquire_image(&mut self, signal_semaphore: vk::Semaphore) -> VkResult<(u32, bool)> {
        if self.handle == vk::SwapchainKHR::null() {
            return Err(vk::Result::ERROR_OUT_OF_DATE_KHR);
        }
        let (index, suboptimal) = self.ops.acquire_next_image(self.handle, signal_semaphore)?;
        self.image_index = index;
        Ok((index, suboptimal))
    }

    /// Present the last acquired image once `wait_semaphore` is signaled.
    pub fn present(&self, queue: vk::Queue, wait_semaphore: vk::Semaphore) -> VkResult<bool> {
        if self.handle == vk::SwapchainKHR::null() {
            return Err(vk::Result::ERROR_OUT_OF_DATE_KHR);
        }

        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.handle];
        let image_indices = [self.image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        self.ops.queue_present(queue, &present_info)
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn state(&self) -> SwapchainState {
        self.state
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// The currently acquired image.
    pub fn image(&self) -> vk::Image {
        self.images
            .get(self.image_index as usize)
            .copied()
            .unwrap_or_default()
    }

    /// View of the currently acquired image.
    pub fn image_view(&self) -> vk::ImageView {
        self.image_views
            .get(self.image_index as usize)
            .copied()
            .unwrap_or_default()
    }
}

impl<O: SwapchainOps> Drop for Swapchain<O> {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Prefer an sRGB BGRA8/RGBA8 format, otherwise the first one offered.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| PREFERRED_FORMATS.contains(&f.format))
        .or_else(|| formats.first())
        .copied()
}

/// The preferred mode if the surface offers it, else FIFO (always supported).
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], preferred: vk::PresentModeKHR) -> vk::PresentModeKHR {
    if modes.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// One image more than the minimum, clamped to the maximum (0 = unlimited).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 && count > caps.max_image_count {
        caps.max_image_count
    } else {
        count
    }
}

/// Surface extent, or the framebuffer size when the surface leaves it undefined.
pub fn resolve_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX && caps.current_extent.height != u32::MAX {
        return caps.current_extent;
    }

    if framebuffer.width == 0 || framebuffer.height == 0 {
        return vk::Extent2D::default();
    }

    vk::Extent2D {
        width: framebuffer
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width.max(caps.min_image_extent.width)),
        height: framebuffer
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height.max(caps.min_image_extent.height)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::cell::{Cell, RefCell};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Op {
        CreateSwapchain { new: u64, old: u64 },
        CreateView(u64),
        DestroyView(u64),
        DestroySwapchain(u64),
        Acquire,
        Present,
    }

    pub(crate) struct MockOps {
        pub caps: vk::SurfaceCapabilitiesKHR,
        pub formats: Vec<vk::SurfaceFormatKHR>,
        pub modes: Vec<vk::PresentModeKHR>,
        pub log: RefCell<Vec<Op>>,
        next: Cell<u64>,
    }

    impl MockOps {
        pub(crate) fn new(width: u32, height: u32) -> Self {
            Self {
                caps: vk::SurfaceCapabilitiesKHR {
                    min_image_count: 2,
                    max_image_count: 3,
                    current_extent: vk::Extent2D { width, height },
                    ..Default::default()
                },
                formats: vec![
                    vk::SurfaceFormatKHR {
                        format: vk::Format::B8G8R8A8_UNORM,
                        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                    },
                    vk::SurfaceFormatKHR {
                        format: vk::Format::B8G8R8A8_SRGB,
                        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                    },
                ],
                modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
                log: RefCell::new(Vec::new()),
                next: Cell::new(1),
            }
        }

        fn handle(&self) -> u64 {
            let raw = self.next.get();
            self.next.set(raw + 1);
            raw
        }

        pub(crate) fn count(&self, pred: impl Fn(&Op) -> bool) -> usize {
            self.log.borrow().iter().filter(|op| pred(op)).count()
        }
    }

    impl SwapchainOps for MockOps {
        fn surface(&self) -> vk::SurfaceKHR {
            vk::SurfaceKHR::null()
        }

        fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR> {
            Ok(self.caps)
        }

        fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
            Ok(self.formats.clone())
        }

        fn present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>> {
            Ok(self.modes.clone())
        }

        fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR<'_>) -> VkResult<vk::SwapchainKHR> {
            let new = self.handle();
            self.log.borrow_mut().push(Op::CreateSwapchain {
                new,
                old: info.old_swapchain.as_raw(),
            });
            Ok(vk::SwapchainKHR::from_raw(new))
        }

        fn swapchain_images(&self, _swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
            let count = choose_image_count(&self.caps);
            Ok((0..count).map(|_| vk::Image::from_raw(self.handle())).collect())
        }

        fn create_image_view(&self, _image: vk::Image, _format: vk::Format) -> VkResult<vk::ImageView> {
            let raw = self.handle();
            self.log.borrow_mut().push(Op::CreateView(raw));
            Ok(vk::ImageView::from_raw(raw))
        }

        fn destroy_image_view(&self, view: vk::ImageView) {
            self.log.borrow_mut().push(Op::DestroyView(view.as_raw()));
        }

        fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
            self.log
                .borrow_mut()
                .push(Op::DestroySwapchain(swapchain.as_raw()));
        }

        fn acquire_next_image(&self, _swapchain: vk::SwapchainKHR, _semaphore: vk::Semaphore) -> VkResult<(u32, bool)> {
            self.log.borrow_mut().push(Op::Acquire);
            Ok((1, false))
        }

        fn queue_present(&self, _queue: vk::Queue, _info: &vk::PresentInfoKHR<'_>) -> VkResult<bool> {
            self.log.borrow_mut().push(Op::Present);
            Ok(false)
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_choose_surface_format_prefers_srgb() {
        let formats = vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::R16G16B16A16_SFLOAT,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        let selected = choose_surface_format(&formats).unwrap();
        assert_eq!(selected.format, vk::Format::B8G8R8A8_SRGB);

        let formats = vec![vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        assert_eq!(choose_surface_format(&formats).unwrap().format, vk::Format::R8G8B8A8_SRGB);
    }

    #[test]
    fn test_choose_surface_format_fallback_is_first_entry() {
        let formats = vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::A2B10G10R10_UNORM_PACK32,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::A2B10G10R10_UNORM_PACK32
        );
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn test_choose_present_mode_prefers_mailbox() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );
    }

    #[test]
    fn test_choose_present_mode_fallback_to_fifo() {
        let modes = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO_RELAXED];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_choose_image_count() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&caps), 2);

        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&caps), 3);
    }

    #[test]
    fn test_resolve_extent_uses_surface_or_framebuffer() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(1920, 1080),
            ..Default::default()
        };
        assert_eq!(resolve_extent(&caps, extent(800, 600)), extent(1920, 1080));

        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(u32::MAX, u32::MAX),
            min_image_extent: extent(1, 1),
            max_image_extent: extent(4096, 4096),
            ..Default::default()
        };
        assert_eq!(resolve_extent(&caps, extent(800, 600)), extent(800, 600));
        assert_eq!(resolve_extent(&caps, extent(8000, 600)), extent(4096, 600));
        assert_eq!(resolve_extent(&caps, extent(0, 600)), extent(0, 0));
    }

    #[test]
    fn test_create_picks_format_mode_and_views() {
        let mut swapchain = Swapchain::new(MockOps::new(1280, 720), vk::PresentModeKHR::MAILBOX);
        assert_eq!(swapchain.state(), SwapchainState::Uninitialized);

        swapchain.create(extent(1280, 720)).unwrap();

        assert_eq!(swapchain.state(), SwapchainState::Created);
        assert_eq!(swapchain.format(), vk::Format::B8G8R8A8_SRGB);
        assert_eq!(swapchain.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(swapchain.extent(), extent(1280, 720));
        assert_eq!(swapchain.images().len(), 3);
        assert_eq!(swapchain.image_views().len(), 3);
    }

    #[test]
    fn test_recreate_same_extent_is_equivalent_and_leak_free() {
        let mut swapchain = Swapchain::new(MockOps::new(800, 600), vk::PresentModeKHR::MAILBOX);
        swapchain.create(extent(800, 600)).unwrap();

        let first_handle = swapchain.handle().as_raw();
        let first_views: Vec<u64> = swapchain.image_views().iter().map(|v| v.as_raw()).collect();
        let first_count = swapchain.images().len();
        let first_format = swapchain.format();

        swapchain.create(extent(800, 600)).unwrap();

        assert_eq!(swapchain.images().len(), first_count);
        assert_eq!(swapchain.format(), first_format);
        assert_ne!(swapchain.handle().as_raw(), first_handle);

        let ops = &swapchain.ops;
        for view in &first_views {
            assert_eq!(ops.count(|op| *op == Op::DestroyView(*view)), 1);
        }
        assert_eq!(ops.count(|op| *op == Op::DestroySwapchain(first_handle)), 1);

        // Old chain is handed over, then destroyed after the new one exists
        let log = ops.log.borrow();
        let created = log
            .iter()
            .position(|op| matches!(op, Op::CreateSwapchain { old, .. } if *old == first_handle))
            .expect("second create passes the old swapchain");
        let destroyed = log
            .iter()
            .position(|op| *op == Op::DestroySwapchain(first_handle))
            .unwrap();
        assert!(created < destroyed);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let mut swapchain = Swapchain::new(MockOps::new(800, 600), vk::PresentModeKHR::FIFO);
        swapchain.create(extent(800, 600)).unwrap();

        swapchain.destroy();
        swapchain.destroy();

        assert_eq!(swapchain.state(), SwapchainState::Destroyed);
        assert_eq!(swapchain.ops.count(|op| matches!(op, Op::DestroySwapchain(_))), 1);
        assert_eq!(swapchain.ops.count(|op| matches!(op, Op::DestroyView(_))), 3);
    }

    #[test]
    fn test_destroy_never_created_is_noop() {
        let mut swapchain = Swapchain::new(MockOps::new(800, 600), vk::PresentModeKHR::FIFO);
        swapchain.destroy();
        assert_eq!(swapchain.state(), SwapchainState::Uninitialized);
        assert!(swapchain.ops.log.borrow().is_empty());
    }

    #[test]
    fn test_zero_extent_suspends_without_native_calls() {
        let mut swapchain = Swapchain::new(MockOps::new(0, 0), vk::PresentModeKHR::FIFO);
        swapchain.create(extent(0, 0)).unwrap();

        assert_eq!(swapchain.state(), SwapchainState::Suspended);
        assert_eq!(swapchain.extent(), extent(0, 0));
        assert!(swapchain.ops.log.borrow().is_empty());
        assert_eq!(swapchain.acquire_image(vk::Semaphore::null()), Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
    }

    #[test]
    fn test_acquire_remembers_index() {
        let mut swapchain = Swapchain::new(MockOps::new(800, 600), vk::PresentModeKHR::FIFO);
        swapchain.create(extent(800, 600)).unwrap();

        let (index, suboptimal) = swapchain.acquire_image(vk::Semaphore::null()).unwrap();
        assert_eq!(index, 1);
        assert!(!suboptimal);
        assert_eq!(swapchain.image_index(), 1);
        assert_eq!(swapchain.image_view(), swapchain.image_views()[1]);
    }
}
