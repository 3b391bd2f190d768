// Vulkan Instance - the API binding object
//
// Owns the loader entry and the instance function table. Everything created
// from the instance keeps an Arc to it, so it is destroyed last.

use ash::{vk, Entry};
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};

pub struct VulkanInstance {
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub instance: ash::Instance,
    pub entry: Entry,
    pub api_version: u32,
}

impl VulkanInstance {
    /// Load Vulkan and create an instance with exactly the requested layers
    /// and extensions.
    ///
    /// Every requested name is validated first; the first missing one is
    /// logged and returned as an error.
    pub fn new(
        app_name: &str,
        layers: &[&CStr],
        extensions: &[&CStr],
        api_version: u32,
    ) -> EngineResult<Arc<Self>> {
        log::info!("Creating Vulkan instance: {}", app_name);

        let entry = unsafe { Entry::load() }?;

        check_instance_layer_support(&entry, layers)?;
        check_instance_extension_support(&entry, extensions)?;

        let app_name_cstr = CString::new(app_name).unwrap_or_default();
        let engine_name = c"Vulkan Engine";

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(api_version);

        let layer_ptrs: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();
        let extension_ptrs: Vec<*const c_char> = extensions.iter().map(|e| e.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_layer_names(&layer_ptrs)
            .enabled_extension_names(&extension_ptrs);

        let instance = unsafe { entry.create_instance(&create_info, None) }?;

        // Messenger only makes sense when the extension was asked for
        let debug_utils = if extensions.contains(&ash::ext::debug_utils::NAME) {
            match Self::setup_debug_messenger(&entry, &instance) {
                Ok(pair) => Some(pair),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        log::info!(
            "Instance API version {}.{}.{}",
            vk::api_version_major(api_version),
            vk::api_version_minor(api_version),
            vk::api_version_patch(api_version)
        );

        Ok(Arc::new(Self {
            debug_utils,
            instance,
            entry,
            api_version,
        }))
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> EngineResult<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }?;

        Ok((debug_utils, messenger))
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan instance...");
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Returns the first requested name absent from `available`.
pub fn find_missing<'a>(requested: &[&'a CStr], available: &[&CStr]) -> Option<&'a CStr> {
    requested
        .iter()
        .copied()
        .find(|name| !available.contains(name))
}

/// Reads a fixed-size, nul-terminated name array as a CStr.
pub(crate) fn name_from_array(raw: &[c_char]) -> &CStr {
    // Vulkan guarantees the arrays are nul-terminated
    unsafe { CStr::from_ptr(raw.as_ptr()) }
}

fn check_instance_layer_support(entry: &Entry, layers: &[&CStr]) -> EngineResult<()> {
    if layers.is_empty() {
        return Ok(());
    }

    let properties = unsafe { entry.enumerate_instance_layer_properties() }?;
    let available: Vec<&CStr> = properties
        .iter()
        .map(|p| name_from_array(&p.layer_name))
        .collect();

    if let Some(missing) = find_missing(layers, &available) {
        let name = missing.to_string_lossy().into_owned();
        log::error!("Instance layer {} not found", name);
        return Err(EngineError::MissingInstanceLayer(name));
    }
    Ok(())
}

fn check_instance_extension_support(entry: &Entry, extensions: &[&CStr]) -> EngineResult<()> {
    if extensions.is_empty() {
        return Ok(());
    }

    let properties = unsafe { entry.enumerate_instance_extension_properties(None) }?;
    let available: Vec<&CStr> = properties
        .iter()
        .map(|p| name_from_array(&p.extension_name))
        .collect();

    if let Some(missing) = find_missing(extensions, &available) {
        let name = missing.to_string_lossy().into_owned();
        log::error!("Instance extension {} not found", name);
        return Err(EngineError::MissingInstanceExtension(name));
    }
    Ok(())
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_missing_reports_first_absent_name() {
        let available = [c"VK_KHR_surface", c"VK_KHR_win32_surface"];
        let requested = [c"VK_KHR_surface", c"VK_EXT_debug_utils", c"VK_KHR_other"];

        assert_eq!(
            find_missing(&requested, &available),
            Some(c"VK_EXT_debug_utils")
        );
    }

    #[test]
    fn test_find_missing_empty_request_passes() {
        assert_eq!(find_missing(&[], &[c"VK_KHR_surface"]), None);
        assert_eq!(find_missing(&[c"VK_KHR_surface"], &[c"VK_KHR_surface"]), None);
    }

    #[test]
    fn test_name_from_array_stops_at_nul() {
        let mut raw = [0 as c_char; vk::MAX_EXTENSION_NAME_SIZE];
        for (dst, src) in raw.iter_mut().zip(b"VK_KHR_swapchain") {
            *dst = *src as c_char;
        }
        assert_eq!(name_from_array(&raw), c"VK_KHR_swapchain");
    }
}
