// ash driver - the real Vulkan implementation of the driver seam
//
// Owns the loaded library, the instance-level and device-level function
// tables and the extension loaders (surface, swapchain, debug utils).

use ash::extensions::{ext::DebugUtils, khr};
use ash::prelude::VkResult;
use ash::{vk, Entry};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{c_char, c_void, CStr, CString};
use std::sync::Arc;

use super::driver::{
    AcceleratorDescriptor, DeviceDesc, DeviceDriver, InstanceDesc, InstanceDriver, Loader,
    SubmitDesc,
};
use crate::error::{GpuError, GpuResult};

/// Entry point backed by the system Vulkan loader.
pub struct AshLoader {
    entry: Entry,
}

impl AshLoader {
    pub fn new() -> GpuResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| GpuError::Loading(format!("{}. Is Vulkan installed?", e)))?;
        Ok(Self { entry })
    }
}

impl Loader for AshLoader {
    fn enumerate_instance_extensions(&self) -> VkResult<Vec<String>> {
        let properties = self.entry.enumerate_instance_extension_properties(None)?;
        Ok(properties
            .iter()
            .map(|p| c_name(&p.extension_name))
            .collect())
    }

    fn enumerate_instance_layers(&self) -> VkResult<Vec<String>> {
        let properties = self.entry.enumerate_instance_layer_properties()?;
        Ok(properties.iter().map(|p| c_name(&p.layer_name)).collect())
    }

    fn create_instance(&self, desc: &InstanceDesc) -> VkResult<Arc<dyn InstanceDriver>> {
        let app_name = to_cstring(&desc.app_name)?;
        let engine_name = to_cstring("vk-bootstrap")?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        let extensions = to_cstrings(&desc.extensions)?;
        let layers = to_cstrings(&desc.layers)?;
        let extension_ptrs = as_ptrs(&extensions);
        let layer_ptrs = as_ptrs(&layers);

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe { self.entry.create_instance(&create_info, None) }?;

        let debug_utils = if desc.debug_messenger {
            match setup_debug_messenger(&self.entry, &instance) {
                Ok(pair) => Some(pair),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        let surface_loader = khr::Surface::new(&self.entry, &instance);

        Ok(Arc::new(AshInstance {
            entry: self.entry.clone(),
            instance,
            surface_loader,
            debug_utils,
        }))
    }
}

pub struct AshInstance {
    entry: Entry,
    instance: ash::Instance,
    surface_loader: khr::Surface,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl InstanceDriver for AshInstance {
    fn enumerate_accelerators(&self) -> VkResult<Vec<AcceleratorDescriptor>> {
        let devices = unsafe { self.instance.enumerate_physical_devices() }?;

        Ok(devices
            .into_iter()
            .map(|handle| {
                let props = unsafe { self.instance.get_physical_device_properties(handle) };
                let memory = unsafe { self.instance.get_physical_device_memory_properties(handle) };
                let queue_families = unsafe {
                    self.instance
                        .get_physical_device_queue_family_properties(handle)
                };

                AcceleratorDescriptor {
                    handle,
                    name: c_name(&props.device_name),
                    device_type: props.device_type,
                    api_version: props.api_version,
                    memory_types: memory.memory_types[..memory.memory_type_count as usize].to_vec(),
                    memory_heaps: memory.memory_heaps[..memory.memory_heap_count as usize].to_vec(),
                    queue_families,
                }
            })
            .collect())
    }

    fn enumerate_device_extensions(&self, physical_device: vk::PhysicalDevice) -> VkResult<Vec<String>> {
        let properties = unsafe {
            self.instance
                .enumerate_device_extension_properties(physical_device)
        }?;
        Ok(properties
            .iter()
            .map(|p| c_name(&p.extension_name))
            .collect())
    }

    fn create_surface(
        &self,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> VkResult<vk::SurfaceKHR> {
        unsafe { ash_window::create_surface(&self.entry, &self.instance, display, window, None) }
    }

    fn surface_support(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
        surface: vk::SurfaceKHR,
    ) -> VkResult<bool> {
        unsafe {
            self.surface_loader.get_physical_device_surface_support(
                physical_device,
                queue_family_index,
                surface,
            )
        }
    }

    fn surface_capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(physical_device, surface)
        }
    }

    fn surface_formats(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(physical_device, surface)
        }
    }

    fn surface_present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VkResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(physical_device, surface)
        }
    }

    fn destroy_surface(&self, surface: vk::SurfaceKHR) {
        unsafe { self.surface_loader.destroy_surface(surface, None) };
    }

    fn create_device(
        &self,
        physical_device: vk::PhysicalDevice,
        desc: &DeviceDesc,
    ) -> VkResult<Arc<dyn DeviceDriver>> {
        let queue_create_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(desc.queue_family_index)
            .queue_priorities(&desc.queue_priorities)
            .build();

        let extensions = to_cstrings(&desc.extensions)?;
        let extension_ptrs = as_ptrs(&extensions);
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&features);

        let device = unsafe {
            self.instance
                .create_device(physical_device, &create_info, None)
        }?;
        let swapchain_loader = khr::Swapchain::new(&self.instance, &device);

        Ok(Arc::new(AshDevice {
            device,
            swapchain_loader,
        }))
    }

    fn destroy_instance(&self) {
        unsafe {
            if let Some((debug_utils, messenger)) = &self.debug_utils {
                debug_utils.destroy_debug_utils_messenger(*messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

pub struct AshDevice {
    device: ash::Device,
    swapchain_loader: khr::Swapchain,
}

impl DeviceDriver for AshDevice {
    fn get_device_queue(&self, queue_family_index: u32, queue_index: u32) -> vk::Queue {
        unsafe { self.device.get_device_queue(queue_family_index, queue_index) }
    }

    fn device_wait_idle(&self) -> VkResult<()> {
        unsafe { self.device.device_wait_idle() }
    }

    fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR) -> VkResult<vk::SwapchainKHR> {
        unsafe { self.swapchain_loader.create_swapchain(info, None) }
    }

    fn get_swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
    }

    fn create_command_pool(&self, info: &vk::CommandPoolCreateInfo) -> VkResult<vk::CommandPool> {
        unsafe { self.device.create_command_pool(info, None) }
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) };
    }

    fn allocate_command_buffers(
        &self,
        info: &vk::CommandBufferAllocateInfo,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        unsafe { self.device.allocate_command_buffers(info) }
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        unsafe { self.device.free_command_buffers(pool, buffers) };
    }

    fn begin_command_buffer(
        &self,
        buffer: vk::CommandBuffer,
        info: &vk::CommandBufferBeginInfo,
    ) -> VkResult<()> {
        unsafe { self.device.begin_command_buffer(buffer, info) }
    }

    fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.device.end_command_buffer(buffer) }
    }

    fn cmd_fill_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        data: u32,
    ) {
        unsafe {
            self.device
                .cmd_fill_buffer(command_buffer, buffer, offset, size, data)
        };
    }

    fn queue_submit(&self, queue: vk::Queue, submits: &[SubmitDesc<'_>], fence: vk::Fence) -> VkResult<()> {
        let infos: Vec<vk::SubmitInfo> = submits
            .iter()
            .map(|s| {
                vk::SubmitInfo::builder()
                    .wait_semaphores(s.wait_semaphores)
                    .wait_dst_stage_mask(s.wait_stages)
                    .command_buffers(s.command_buffers)
                    .signal_semaphores(s.signal_semaphores)
                    .build()
            })
            .collect();

        unsafe { self.device.queue_submit(queue, &infos, fence) }
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::builder().flags(flags);
        unsafe { self.device.create_fence(&info, None) }
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::builder();
        unsafe { self.device.create_semaphore(&info, None) }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn create_buffer(&self, info: &vk::BufferCreateInfo) -> VkResult<vk::Buffer> {
        unsafe { self.device.create_buffer(info, None) }
    }

    fn get_buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        unsafe { self.device.get_buffer_memory_requirements(buffer) }
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device.destroy_buffer(buffer, None) };
    }

    fn allocate_memory(&self, info: &vk::MemoryAllocateInfo) -> VkResult<vk::DeviceMemory> {
        unsafe { self.device.allocate_memory(info, None) }
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.free_memory(memory, None) };
    }

    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        unsafe { self.device.bind_buffer_memory(buffer, memory, offset) }
    }

    fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> VkResult<*mut c_void> {
        unsafe {
            self.device
                .map_memory(memory, offset, size, vk::MemoryMapFlags::empty())
        }
    }

    fn unmap_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.unmap_memory(memory) };
    }

    fn destroy_device(&self) {
        unsafe { self.device.destroy_device(None) };
    }
}

fn setup_debug_messenger(
    entry: &Entry,
    instance: &ash::Instance,
) -> VkResult<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
    let debug_utils = DebugUtils::new(entry, instance);

    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
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

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
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

fn c_name(raw: &[c_char]) -> String {
    unsafe { CStr::from_ptr(raw.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

// Names with interior NULs can never match a driver-reported name.
fn to_cstring(name: &str) -> VkResult<CString> {
    CString::new(name).map_err(|_| vk::Result::ERROR_INITIALIZATION_FAILED)
}

fn to_cstrings(names: &[String]) -> VkResult<Vec<CString>> {
    names.iter().map(|n| to_cstring(n)).collect()
}

fn as_ptrs(names: &[CString]) -> Vec<*const c_char> {
    names.iter().map(|n| n.as_ptr()).collect()
}
