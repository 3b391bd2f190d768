// Presentation surface bound to a window

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::CStr;
use std::sync::Arc;

use super::VulkanInstance;
use crate::error::{EngineError, EngineResult};

pub struct Surface {
    pub handle: vk::SurfaceKHR,
    pub loader: ash::khr::surface::Instance,
    _instance: Arc<VulkanInstance>,
}

impl Surface {
    /// Create a surface for `window`. Failure is reported as an error, never a panic.
    pub fn new<W>(instance: Arc<VulkanInstance>, window: &W) -> EngineResult<Self>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        let display_handle = window
            .display_handle()
            .map_err(|e| EngineError::Surface(format!("no display handle: {e}")))?
            .as_raw();
        let window_handle = window
            .window_handle()
            .map_err(|e| EngineError::Surface(format!("no window handle: {e}")))?
            .as_raw();

        let handle = unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.instance,
                display_handle,
                window_handle,
                None,
            )
        }
        .map_err(|e| {
            log::error!("Failed to create window surface: {:?}", e);
            EngineError::Surface(format!("{e:?}"))
        })?;

        let loader = ash::khr::surface::Instance::new(&instance.entry, &instance.instance);

        Ok(Self {
            handle,
            loader,
            _instance: instance,
        })
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.handle, None) };
    }
}

/// Instance extensions the windowing system needs for presentation.
pub fn required_surface_extensions<W: HasDisplayHandle>(
    window: &W,
) -> EngineResult<Vec<&'static CStr>> {
    let display_handle = window
        .display_handle()
        .map_err(|e| EngineError::Surface(format!("no display handle: {e}")))?
        .as_raw();

    let names = ash_window::enumerate_required_extensions(display_handle)?;

    // The slice is static and every entry is a nul-terminated extension name
    Ok(names
        .iter()
        .map(|&ptr| unsafe { CStr::from_ptr(ptr) })
        .collect())
}
