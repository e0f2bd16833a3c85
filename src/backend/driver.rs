// Driver seam - the raw Vulkan calls the core depends on
//
// Components never talk to ash directly. They go through these object-safe
// traits, implemented by `vulkan` for real hardware and by `mock` in tests.
// Methods mirror the Vulkan entry points one to one and hand back raw
// `vk::Result` errors; classification into `GpuError` kinds happens in the
// calling component.

use ash::prelude::VkResult;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::c_void;
use std::sync::Arc;

use crate::error::GpuResult;

/// Immutable snapshot of one physical device.
#[derive(Debug, Clone)]
pub struct AcceleratorDescriptor {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub memory_types: Vec<vk::MemoryType>,
    pub memory_heaps: Vec<vk::MemoryHeap>,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
}

/// Everything needed to create the instance.
#[derive(Debug, Clone, Default)]
pub struct InstanceDesc {
    pub app_name: String,
    pub extensions: Vec<String>,
    pub layers: Vec<String>,
    /// Route validation output through a debug messenger.
    pub debug_messenger: bool,
}

#[derive(Debug, Clone)]
pub struct DeviceDesc {
    pub queue_family_index: u32,
    pub queue_priorities: Vec<f32>,
    pub extensions: Vec<String>,
}

/// One queue submission batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SubmitDesc<'a> {
    pub wait_semaphores: &'a [vk::Semaphore],
    pub wait_stages: &'a [vk::PipelineStageFlags],
    pub command_buffers: &'a [vk::CommandBuffer],
    pub signal_semaphores: &'a [vk::Semaphore],
}

/// Windowing collaborator: supplies the presentation target.
pub trait WindowSystem {
    /// Instance extensions the platform needs to create a surface.
    fn required_extensions(&self) -> GpuResult<Vec<String>>;
    fn raw_display_handle(&self) -> RawDisplayHandle;
    fn raw_window_handle(&self) -> RawWindowHandle;
    fn extent(&self) -> vk::Extent2D;
}

/// Entry-level calls, available before an instance exists.
pub trait Loader {
    fn enumerate_instance_extensions(&self) -> VkResult<Vec<String>>;
    fn enumerate_instance_layers(&self) -> VkResult<Vec<String>>;
    fn create_instance(&self, desc: &InstanceDesc) -> VkResult<Arc<dyn InstanceDriver>>;
}

pub trait InstanceDriver: Send + Sync {
    fn enumerate_accelerators(&self) -> VkResult<Vec<AcceleratorDescriptor>>;
    fn enumerate_device_extensions(&self, physical_device: vk::PhysicalDevice) -> VkResult<Vec<String>>;

    fn create_surface(
        &self,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> VkResult<vk::SurfaceKHR>;
    fn surface_support(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
        surface: vk::SurfaceKHR,
    ) -> VkResult<bool>;
    fn surface_capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VkResult<vk::SurfaceCapabilitiesKHR>;
    fn surface_formats(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VkResult<Vec<vk::SurfaceFormatKHR>>;
    fn surface_present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VkResult<Vec<vk::PresentModeKHR>>;
    fn destroy_surface(&self, surface: vk::SurfaceKHR);

    fn create_device(
        &self,
        physical_device: vk::PhysicalDevice,
        desc: &DeviceDesc,
    ) -> VkResult<Arc<dyn DeviceDriver>>;

    /// Must be the last call made through this driver.
    fn destroy_instance(&self);
}

pub trait DeviceDriver: Send + Sync {
    fn get_device_queue(&self, queue_family_index: u32, queue_index: u32) -> vk::Queue;
    fn device_wait_idle(&self) -> VkResult<()>;

    // Swapchain
    fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR) -> VkResult<vk::SwapchainKHR>;
    fn get_swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);

    // Commands
    fn create_command_pool(&self, info: &vk::CommandPoolCreateInfo) -> VkResult<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffers(
        &self,
        info: &vk::CommandBufferAllocateInfo,
    ) -> VkResult<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    fn begin_command_buffer(
        &self,
        buffer: vk::CommandBuffer,
        info: &vk::CommandBufferBeginInfo,
    ) -> VkResult<()>;
    fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> VkResult<()>;
    fn cmd_fill_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        data: u32,
    );
    fn queue_submit(&self, queue: vk::Queue, submits: &[SubmitDesc<'_>], fence: vk::Fence) -> VkResult<()>;

    // Synchronization
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn create_semaphore(&self) -> VkResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    // Buffers and memory
    fn create_buffer(&self, info: &vk::BufferCreateInfo) -> VkResult<vk::Buffer>;
    fn get_buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;
    fn destroy_buffer(&self, buffer: vk::Buffer);
    fn allocate_memory(&self, info: &vk::MemoryAllocateInfo) -> VkResult<vk::DeviceMemory>;
    fn free_memory(&self, memory: vk::DeviceMemory);
    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()>;
    fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> VkResult<*mut c_void>;
    fn unmap_memory(&self, memory: vk::DeviceMemory);

    /// Must be the last call made through this driver.
    fn destroy_device(&self);
}
