// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Physical device selection (discrete GPU policy)
// - Queue family selection with dedicated-queue preference
// - Logical device + queue creation
// - Memory allocator setup

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use std::ffi::{c_char, CStr};
use std::mem::ManuallyDrop;
use std::sync::Arc;

use super::instance::{find_missing, name_from_array};
use super::VulkanInstance;
use crate::error::{EngineError, EngineResult};

/// Which kinds of GPU are acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpuPreference {
    /// Only a discrete GPU will do; initialization fails otherwise
    #[default]
    DiscreteOnly,
    /// Discrete first, then integrated, then anything else
    PreferDiscrete,
}

/// Pick a device index from the reported device types.
pub fn pick_physical_device(
    device_types: &[vk::PhysicalDeviceType],
    preference: GpuPreference,
) -> EngineResult<usize> {
    if device_types.is_empty() {
        return Err(EngineError::NoSuitableGpu);
    }

    if let Some(index) = device_types
        .iter()
        .position(|&t| t == vk::PhysicalDeviceType::DISCRETE_GPU)
    {
        return Ok(index);
    }

    match preference {
        GpuPreference::DiscreteOnly => Err(EngineError::NoDiscreteGpu),
        GpuPreference::PreferDiscrete => {
            let score = |t: vk::PhysicalDeviceType| match t {
                vk::PhysicalDeviceType::INTEGRATED_GPU => 3,
                vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
                vk::PhysicalDeviceType::CPU => 1,
                _ => 0,
            };
            device_types
                .iter()
                .enumerate()
                .filter(|&(_, t)| score(*t) > 0)
                .max_by_key(|&(i, t)| (score(*t), std::cmp::Reverse(i)))
                .map(|(i, _)| i)
                .ok_or(EngineError::NoSuitableGpu)
        }
    }
}

/// Find a queue family for `flags`, preferring one dedicated to that work.
///
/// A graphics family without compute, a compute family without graphics, and
/// a transfer family with neither are preferred. Otherwise the first family
/// whose flags are a superset of `flags` is used.
pub fn find_queue_family(families: &[vk::QueueFamilyProperties], flags: vk::QueueFlags) -> Option<u32> {
    let graphics = vk::QueueFlags::GRAPHICS;
    let compute = vk::QueueFlags::COMPUTE;
    let transfer = vk::QueueFlags::TRANSFER;

    let dedicated = |want: vk::QueueFlags, exclude: vk::QueueFlags| {
        families
            .iter()
            .position(|f| f.queue_flags.contains(want) && !f.queue_flags.intersects(exclude))
    };

    let exclusive = if flags == graphics {
        dedicated(graphics, compute)
    } else if flags == compute {
        dedicated(compute, graphics)
    } else if flags == transfer {
        dedicated(transfer, graphics | compute)
    } else {
        None
    };

    exclusive
        .or_else(|| families.iter().position(|f| f.queue_flags.contains(flags)))
        .map(|i| i as u32)
}

/// Queue families chosen for the logical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub compute: Option<u32>,
    pub transfer: Option<u32>,
}

impl QueueFamilies {
    /// Select every requested family. A missing graphics family, or a missing
    /// requested compute/transfer family, is a fatal lookup error.
    pub fn select(
        families: &[vk::QueueFamilyProperties],
        request_compute: bool,
        request_transfer: bool,
    ) -> EngineResult<Self> {
        let lookup = |flags: vk::QueueFlags| {
            find_queue_family(families, flags).ok_or(EngineError::QueueFamilyNotFound(flags))
        };

        Ok(Self {
            graphics: lookup(vk::QueueFlags::GRAPHICS)?,
            compute: request_compute
                .then(|| lookup(vk::QueueFlags::COMPUTE))
                .transpose()?,
            transfer: request_transfer
                .then(|| lookup(vk::QueueFlags::TRANSFER))
                .transpose()?,
        })
    }

    /// Distinct family indices, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        let mut unique = vec![self.graphics];
        for family in [self.compute, self.transfer].into_iter().flatten() {
            if !unique.contains(&family) {
                unique.push(family);
            }
        }
        unique
    }
}

/// What the logical device must provide.
pub struct DeviceDesc<'a> {
    pub extensions: &'a [&'a CStr],
    pub preference: GpuPreference,
    pub request_compute: bool,
    pub request_transfer: bool,
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    allocator: ManuallyDrop<Mutex<Allocator>>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,

    pub queue_families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub compute_queue: Option<vk::Queue>,
    pub transfer_queue: Option<vk::Queue>,

    // Device properties (cached for performance)
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub features: vk::PhysicalDeviceFeatures,

    // Keeps the instance alive until the device is gone
    pub instance: Arc<VulkanInstance>,
}

impl VulkanDevice {
    pub fn new(instance: Arc<VulkanInstance>, desc: &DeviceDesc<'_>) -> EngineResult<Arc<Self>> {
        let physical_device = Self::select_physical_device(&instance.instance, desc.preference)?;

        let properties = unsafe { instance.instance.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.instance.get_physical_device_memory_properties(physical_device) };
        let supported_features =
            unsafe { instance.instance.get_physical_device_features(physical_device) };

        log::info!("Using physical device: {}", name_from_array(&properties.device_name).to_string_lossy());
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        Self::check_device_extension_support(&instance.instance, physical_device, desc.extensions)?;

        let family_properties = unsafe {
            instance
                .instance
                .get_physical_device_queue_family_properties(physical_device)
        };
        let queue_families =
            QueueFamilies::select(&family_properties, desc.request_compute, desc.request_transfer)?;
        log::debug!("Queue families: {:?}", queue_families);

        // Only optional features the hardware reports are switched on
        let features = vk::PhysicalDeviceFeatures {
            fill_mode_non_solid: supported_features.fill_mode_non_solid,
            wide_lines: supported_features.wide_lines,
            sampler_anisotropy: supported_features.sampler_anisotropy,
            multi_draw_indirect: supported_features.multi_draw_indirect,
            ..Default::default()
        };

        let device = Self::create_logical_device(
            &instance.instance,
            physical_device,
            &queue_families,
            desc.extensions,
            &features,
        )?;

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let compute_queue = queue_families
            .compute
            .map(|family| unsafe { device.get_device_queue(family, 0) });
        let transfer_queue = queue_families
            .transfer
            .map(|family| unsafe { device.get_device_queue(family, 0) });

        let allocator = match Self::create_allocator(&instance.instance, physical_device, &device) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e);
            }
        };

        Ok(Arc::new(Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            device,
            physical_device,
            queue_families,
            graphics_queue,
            compute_queue,
            transfer_queue,
            properties,
            memory_properties,
            features,
            instance,
        }))
    }

    fn select_physical_device(
        instance: &ash::Instance,
        preference: GpuPreference,
    ) -> EngineResult<vk::PhysicalDevice> {
        let devices = unsafe { instance.enumerate_physical_devices() }?;

        let device_types: Vec<vk::PhysicalDeviceType> = devices
            .iter()
            .map(|&d| unsafe { instance.get_physical_device_properties(d) }.device_type)
            .collect();

        match pick_physical_device(&device_types, preference) {
            Ok(index) => Ok(devices[index]),
            Err(e) => {
                log::error!("{}", e);
                Err(e)
            }
        }
    }

    fn check_device_extension_support(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        extensions: &[&CStr],
    ) -> EngineResult<()> {
        if extensions.is_empty() {
            return Ok(());
        }

        let properties = unsafe { instance.enumerate_device_extension_properties(physical_device) }?;
        let available: Vec<&CStr> = properties
            .iter()
            .map(|p| name_from_array(&p.extension_name))
            .collect();

        if let Some(missing) = find_missing(extensions, &available) {
            let name = missing.to_string_lossy().into_owned();
            log::error!("Device extension {} not found", name);
            return Err(EngineError::MissingDeviceExtension(name));
        }
        Ok(())
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_families: &QueueFamilies,
        extensions: &[&CStr],
        features: &vk::PhysicalDeviceFeatures,
    ) -> EngineResult<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let extension_ptrs: Vec<*const c_char> = extensions.iter().map(|e| e.as_ptr()).collect();

        // Rendering without render pass / framebuffer objects
        let mut dynamic_rendering =
            vk::PhysicalDeviceDynamicRenderingFeatures::default().dynamic_rendering(true);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(features)
            .push_next(&mut dynamic_rendering);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }?;
        Ok(device)
    }

    fn create_allocator(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: &ash::Device,
    ) -> EngineResult<Allocator> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        Ok(allocator)
    }

    /// Allocate device memory through the shared allocator.
    pub fn allocate(&self, desc: &AllocationCreateDesc<'_>) -> EngineResult<Allocation> {
        Ok(self.allocator.lock().allocate(desc)?)
    }

    /// Return an allocation to the allocator. Failures are logged only.
    pub fn free(&self, allocation: Allocation) {
        if let Err(e) = self.allocator.lock().free(allocation) {
            log::error!("Failed to free allocation: {}", e);
        }
    }

    /// Wait for device to be idle (e.g., before cleanup or swapchain recreation)
    pub fn wait_idle(&self) -> EngineResult<()> {
        if self.device.handle() == vk::Device::null() {
            return Ok(());
        }
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }

    /// Wait until the graphics queue has drained.
    pub fn wait_queue_idle(&self) -> EngineResult<()> {
        if self.graphics_queue == vk::Queue::null() {
            return Ok(());
        }
        unsafe { self.device.queue_wait_idle(self.graphics_queue) }?;
        Ok(())
    }

    pub fn name(&self) -> String {
        name_from_array(&self.properties.device_name)
            .to_string_lossy()
            .into_owned()
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        unsafe {
            // The allocator frees its memory blocks through the device
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
    }
}
