// Textures - images, views, layout transitions
//
// A Texture owns an image, its memory and one default view covering every
// mip level and array layer.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::EngineResult;

#[derive(Debug, Clone, Copy)]
pub struct TextureDesc {
    pub extent: vk::Extent3D,
    pub format: vk::Format,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
    pub view_type: vk::ImageViewType,
    pub flags: vk::ImageCreateFlags,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            extent: vk::Extent3D {
                width: 1,
                height: 1,
                depth: 1,
            },
            format: vk::Format::R8G8B8A8_SRGB,
            mip_levels: 1,
            array_layers: 1,
            usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            aspect: vk::ImageAspectFlags::COLOR,
            view_type: vk::ImageViewType::TYPE_2D,
            flags: vk::ImageCreateFlags::empty(),
        }
    }
}

impl TextureDesc {
    /// Sampled 2D texture with a full mip chain. Mip generation reads from
    /// the image, so it is also a transfer source.
    pub fn sampled_2d(width: u32, height: u32, format: vk::Format) -> Self {
        Self {
            extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
            format,
            mip_levels: mip_levels_for(width, height),
            usage: vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::TRANSFER_SRC,
            ..Default::default()
        }
    }

    /// Six-layer cube map, one mip level.
    pub fn cube(size: u32, format: vk::Format) -> Self {
        Self {
            extent: vk::Extent3D {
                width: size,
                height: size,
                depth: 1,
            },
            format,
            array_layers: 6,
            view_type: vk::ImageViewType::CUBE,
            flags: vk::ImageCreateFlags::CUBE_COMPATIBLE,
            ..Default::default()
        }
    }

    pub fn depth(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            format,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: depth_aspect(format),
            ..Default::default()
        }
    }

    pub fn subresource_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            base_mip_level: 0,
            level_count: self.mip_levels,
            base_array_layer: 0,
            layer_count: self.array_layers,
        }
    }
}

pub struct Texture {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub desc: TextureDesc,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl Texture {
    pub fn new(
        device: Arc<VulkanDevice>,
        desc: &TextureDesc,
        location: MemoryLocation,
        name: &str,
    ) -> EngineResult<Self> {
        let image_info = vk::ImageCreateInfo::default()
            .flags(desc.flags)
            .image_type(vk::ImageType::TYPE_2D)
            .extent(desc.extent)
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .format(desc.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.device.create_image(&image_info, None) }?;
        let requirements = unsafe { device.device.get_image_memory_requirements(image) };

        let allocation = match device.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let bound = unsafe {
            device
                .device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            device.free(allocation);
            unsafe { device.device.destroy_image(image, None) };
            return Err(e.into());
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(desc.view_type)
            .format(desc.format)
            .subresource_range(desc.subresource_range());

        let view = match unsafe { device.device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                device.free(allocation);
                unsafe { device.device.destroy_image(image, None) };
                return Err(e.into());
            }
        };

        Ok(Self {
            image,
            view,
            desc: *desc,
            allocation: Some(allocation),
            device,
        })
    }

    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.desc.extent.width,
            height: self.desc.extent.height,
        }
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_image_view(self.view, None);
            self.device.device.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            self.device.free(allocation);
        }
    }
}

/// Number of mip levels down to 1x1.
pub fn mip_levels_for(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT
    )
}

pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    if has_stencil(format) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::DEPTH
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Access masks and stages for a layout change. Unknown pairs get a full
/// barrier.
pub fn layout_transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> LayoutTransition {
    use vk::AccessFlags as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags as S;

    let (src_access, dst_access, src_stage, dst_stage) = match (old, new) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => (A::empty(), A::TRANSFER_WRITE, S::TOP_OF_PIPE, S::TRANSFER),
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => {
            (A::TRANSFER_WRITE, A::SHADER_READ, S::TRANSFER, S::FRAGMENT_SHADER)
        }
        (L::TRANSFER_DST_OPTIMAL, L::TRANSFER_SRC_OPTIMAL) => {
            (A::TRANSFER_WRITE, A::TRANSFER_READ, S::TRANSFER, S::TRANSFER)
        }
        (L::TRANSFER_SRC_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => {
            (A::TRANSFER_READ, A::SHADER_READ, S::TRANSFER, S::FRAGMENT_SHADER)
        }
        // Chained after the image-available semaphore wait on this stage
        (L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL) => (
            A::empty(),
            A::COLOR_ATTACHMENT_WRITE,
            S::COLOR_ATTACHMENT_OUTPUT,
            S::COLOR_ATTACHMENT_OUTPUT,
        ),
        (L::COLOR_ATTACHMENT_OPTIMAL, L::PRESENT_SRC_KHR) => (
            A::COLOR_ATTACHMENT_WRITE,
            A::empty(),
            S::COLOR_ATTACHMENT_OUTPUT,
            S::BOTTOM_OF_PIPE,
        ),
        (L::UNDEFINED, L::DEPTH_ATTACHMENT_OPTIMAL | L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => (
            A::empty(),
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
            S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
        ),
        (L::UNDEFINED, L::GENERAL) => (
            A::empty(),
            A::SHADER_READ | A::SHADER_WRITE,
            S::TOP_OF_PIPE,
            S::COMPUTE_SHADER,
        ),
        _ => (
            A::MEMORY_WRITE,
            A::MEMORY_READ | A::MEMORY_WRITE,
            S::ALL_COMMANDS,
            S::ALL_COMMANDS,
        ),
    };

    LayoutTransition {
        src_access,
        dst_access,
        src_stage,
        dst_stage,
    }
}

/// Record a layout transition for `range` of `image`.
pub fn transition_layout(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let masks = layout_transition_masks(old_layout, new_layout);

    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range)
        .src_access_mask(masks.src_access)
        .dst_access_mask(masks.dst_access);

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            masks.src_stage,
            masks.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

/// One copy region per array layer, each layer `layer_size` bytes apart.
pub fn layer_copy_regions(desc: &TextureDesc, layer_size: vk::DeviceSize) -> Vec<vk::BufferImageCopy> {
    (0..desc.array_layers)
        .map(|layer| vk::BufferImageCopy {
            buffer_offset: layer_size * vk::DeviceSize::from(layer),
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: desc.aspect,
                mip_level: 0,
                base_array_layer: layer,
                layer_count: 1,
            },
            image_offset: vk::Offset3D::default(),
            image_extent: desc.extent,
        })
        .collect()
}

/// Fill mip levels 1.. by blitting each level from the previous one.
///
/// Expects every level in TRANSFER_DST_OPTIMAL with level 0 filled; leaves
/// every level in SHADER_READ_ONLY_OPTIMAL.
pub fn generate_mipmaps(device: &ash::Device, cmd: vk::CommandBuffer, desc: &TextureDesc, image: vk::Image) {
    let mut width = desc.extent.width as i32;
    let mut height = desc.extent.height as i32;

    let level_range = |level: u32| vk::ImageSubresourceRange {
        aspect_mask: desc.aspect,
        base_mip_level: level,
        level_count: 1,
        base_array_layer: 0,
        layer_count: desc.array_layers,
    };

    for level in 1..desc.mip_levels {
        transition_layout(
            device,
            cmd,
            image,
            level_range(level - 1),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );

        let next_width = (width / 2).max(1);
        let next_height = (height / 2).max(1);

        let blit = vk::ImageBlit {
            src_subresource: vk::ImageSubresourceLayers {
                aspect_mask: desc.aspect,
                mip_level: level - 1,
                base_array_layer: 0,
                layer_count: desc.array_layers,
            },
            src_offsets: [vk::Offset3D::default(), vk::Offset3D { x: width, y: height, z: 1 }],
            dst_subresource: vk::ImageSubresourceLayers {
                aspect_mask: desc.aspect,
                mip_level: level,
                base_array_layer: 0,
                layer_count: desc.array_layers,
            },
            dst_offsets: [
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: next_width,
                    y: next_height,
                    z: 1,
                },
            ],
        };

        unsafe {
            device.cmd_blit_image(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            );
        }

        transition_layout(
            device,
            cmd,
            image,
            level_range(level - 1),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );

        width = next_width;
        height = next_height;
    }

    // Last level was only ever written
    transition_layout(
        device,
        cmd,
        image,
        level_range(desc.mip_levels.saturating_sub(1)),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );
}
