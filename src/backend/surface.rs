// Surface - the window's presentation target, bound to the instance

use ash::vk;
use std::sync::Arc;

use super::driver::WindowSystem;
use super::instance::Instance;
use crate::error::{GpuError, GpuResult};

pub struct Surface {
    pub handle: vk::SurfaceKHR,
    instance: Arc<Instance>,
}

impl Surface {
    pub fn new(instance: &Arc<Instance>, window: &dyn WindowSystem) -> GpuResult<Arc<Self>> {
        let handle = instance
            .driver()
            .create_surface(window.raw_display_handle(), window.raw_window_handle())
            .map_err(GpuError::SurfaceCreationFailed)?;

        Ok(Arc::new(Self {
            handle,
            instance: instance.clone(),
        }))
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    /// Whether `queue_family_index` on `physical_device` can present here.
    pub fn supports_presentation(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
    ) -> GpuResult<bool> {
        self.instance
            .driver()
            .surface_support(physical_device, queue_family_index, self.handle)
            .map_err(GpuError::vulkan("vkGetPhysicalDeviceSurfaceSupportKHR"))
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        self.instance.driver().destroy_surface(self.handle);
    }
}
