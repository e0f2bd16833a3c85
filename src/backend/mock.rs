// Mock driver for tests (no GPU required)
//
// Implements all three driver traits over shared in-process state:
// - Device memory is real host memory, so mappings can be read and written
// - Fill commands are queued on submit and only applied once the host waits
//   (device idle or fence), like work still running on a real GPU
// - Every state-changing call is appended to a call log

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use parking_lot::Mutex;
use raw_window_handle::{
    RawDisplayHandle, RawWindowHandle, XlibDisplayHandle, XlibWindowHandle,
};
use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::{Arc, Barrier};

use super::device::Device;
use super::driver::{
    AcceleratorDescriptor, DeviceDesc, DeviceDriver, InstanceDesc, InstanceDriver, Loader,
    SubmitDesc, WindowSystem,
};
use super::instance::Instance;
use super::selector::select_accelerator;
use super::surface::Surface;
use super::swapchain::DEFAULT_FORMAT;
use crate::error::GpuResult;

const HEAP_SIZE: vk::DeviceSize = 256 * 1024 * 1024;
const BUFFER_ALIGNMENT: vk::DeviceSize = 16;

#[derive(Debug, Clone)]
pub struct MockConfig {
    pub instance_extensions: Vec<String>,
    pub layers: Vec<String>,
    pub device_extensions: Vec<String>,
    pub accelerators: Vec<AcceleratorDescriptor>,
    /// Presentation support per queue family index; missing entries are true.
    pub present_support: Vec<bool>,
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub swapchain_image_count: u32,
    pub fail_device_creation: bool,
    pub fail_submit: bool,
    pub fail_end_command_buffer: bool,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            instance_extensions: strings(&["VK_KHR_surface", "VK_KHR_xlib_surface", "VK_EXT_debug_utils"]),
            layers: strings(&["VK_LAYER_KHRONOS_validation"]),
            device_extensions: strings(&["VK_KHR_swapchain"]),
            accelerators: vec![
                accelerator("Mock Integrated", vk::PhysicalDeviceType::INTEGRATED_GPU),
                accelerator("Mock Discrete", vk::PhysicalDeviceType::DISCRETE_GPU),
            ],
            present_support: Vec::new(),
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: vk::Extent2D {
                    width: 800,
                    height: 600,
                },
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                max_image_array_layers: 1,
                supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSFER_DST,
            },
            formats: vec![DEFAULT_FORMAT],
            present_modes: vec![
                vk::PresentModeKHR::FIFO,
                vk::PresentModeKHR::IMMEDIATE,
                vk::PresentModeKHR::MAILBOX,
            ],
            swapchain_image_count: 4,
            fail_device_creation: false,
            fail_submit: false,
            fail_end_command_buffer: false,
        }
    }
}

/// What the last `queue_submit` carried.
#[derive(Debug, Clone)]
pub struct RecordedSubmit {
    pub wait_semaphores: Vec<vk::Semaphore>,
    pub signal_semaphores: Vec<vk::Semaphore>,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub fence: vk::Fence,
}

#[derive(Debug, Clone, Copy)]
struct FillOp {
    buffer: u64,
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
    data: u32,
}

#[derive(Debug, Clone, Copy)]
struct MockBuffer {
    size: vk::DeviceSize,
    binding: Option<(u64, vk::DeviceSize)>,
}

// Host backing store, kept as an address so the state stays Send
#[derive(Debug, Clone, Copy)]
struct MockAllocation {
    addr: usize,
    len: usize,
}

#[derive(Default)]
struct MockState {
    next_handle: u64,
    calls: Vec<String>,
    last_device_desc: Option<DeviceDesc>,
    last_submit: Option<RecordedSubmit>,
    last_swapchain_min_image_count: Option<u32>,
    allocations: HashMap<u64, MockAllocation>,
    buffers: HashMap<u64, MockBuffer>,
    recorded: HashMap<u64, Vec<FillOp>>,
    pending: Vec<FillOp>,
    pending_fences: Vec<u64>,
    signaled_fences: HashMap<u64, bool>,
    wait_idle_gate: Option<Arc<Barrier>>,
}

impl MockState {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        0x1000 + self.next_handle
    }

    fn log(&mut self, call: &str) {
        self.calls.push(call.to_string());
    }

    /// Everything queued so far finishes.
    fn complete_all(&mut self) {
        for op in std::mem::take(&mut self.pending) {
            self.apply(op);
        }
        for fence in std::mem::take(&mut self.pending_fences) {
            self.signaled_fences.insert(fence, true);
        }
    }

    fn apply(&mut self, op: FillOp) {
        let Some(buffer) = self.buffers.get(&op.buffer).copied() else {
            return;
        };
        let Some((memory, memory_offset)) = buffer.binding else {
            return;
        };
        let Some(allocation) = self.allocations.get(&memory).copied() else {
            return;
        };

        let size = if op.size == vk::WHOLE_SIZE {
            buffer.size - op.offset
        } else {
            op.size
        };
        let start = (memory_offset + op.offset) as usize;
        let word = op.data.to_ne_bytes();

        for i in 0..size as usize {
            let at = start + i;
            if at >= allocation.len {
                break;
            }
            unsafe { *(allocation.addr as *mut u8).add(at) = word[i % 4] };
        }
    }
}

impl Drop for MockState {
    fn drop(&mut self) {
        for (_, allocation) in self.allocations.drain() {
            free_backing(allocation);
        }
    }
}

fn free_backing(allocation: MockAllocation) {
    let slice = std::ptr::slice_from_raw_parts_mut(allocation.addr as *mut u8, allocation.len);
    drop(unsafe { Box::from_raw(slice) });
}

#[derive(Clone)]
pub struct MockDriver {
    config: Arc<MockConfig>,
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn last_device_desc(&self) -> Option<DeviceDesc> {
        self.state.lock().last_device_desc.clone()
    }

    pub fn last_submit(&self) -> Option<RecordedSubmit> {
        self.state.lock().last_submit.clone()
    }

    pub fn last_swapchain_min_image_count(&self) -> Option<u32> {
        self.state.lock().last_swapchain_min_image_count
    }

    /// The next `device_wait_idle` meets the caller at the returned barrier
    /// twice before it completes anything: once on entry, once to resume.
    pub fn pause_next_wait_idle(&self) -> Arc<Barrier> {
        let gate = Arc::new(Barrier::new(2));
        self.state.lock().wait_idle_gate = Some(gate.clone());
        gate
    }

    fn new_handle<H: Handle>(&self, call: &str) -> H {
        let mut state = self.state.lock();
        state.log(call);
        H::from_raw(state.handle())
    }

    fn log(&self, call: &str) {
        self.state.lock().log(call);
    }
}

impl Loader for MockDriver {
    fn enumerate_instance_extensions(&self) -> VkResult<Vec<String>> {
        Ok(self.config.instance_extensions.clone())
    }

    fn enumerate_instance_layers(&self) -> VkResult<Vec<String>> {
        Ok(self.config.layers.clone())
    }

    fn create_instance(&self, _desc: &InstanceDesc) -> VkResult<Arc<dyn InstanceDriver>> {
        self.log("create_instance");
        Ok(Arc::new(self.clone()))
    }
}

impl InstanceDriver for MockDriver {
    fn enumerate_accelerators(&self) -> VkResult<Vec<AcceleratorDescriptor>> {
        Ok(self.config.accelerators.clone())
    }

    fn enumerate_device_extensions(&self, _physical_device: vk::PhysicalDevice) -> VkResult<Vec<String>> {
        Ok(self.config.device_extensions.clone())
    }

    fn create_surface(
        &self,
        _display: RawDisplayHandle,
        _window: RawWindowHandle,
    ) -> VkResult<vk::SurfaceKHR> {
        Ok(self.new_handle("create_surface"))
    }

    fn surface_support(
        &self,
        _physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
        _surface: vk::SurfaceKHR,
    ) -> VkResult<bool> {
        Ok(self
            .config
            .present_support
            .get(queue_family_index as usize)
            .copied()
            .unwrap_or(true))
    }

    fn surface_capabilities(
        &self,
        _physical_device: vk::PhysicalDevice,
        _surface: vk::SurfaceKHR,
    ) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        Ok(self.config.capabilities)
    }

    fn surface_formats(
        &self,
        _physical_device: vk::PhysicalDevice,
        _surface: vk::SurfaceKHR,
    ) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.config.formats.clone())
    }

    fn surface_present_modes(
        &self,
        _physical_device: vk::PhysicalDevice,
        _surface: vk::SurfaceKHR,
    ) -> VkResult<Vec<vk::PresentModeKHR>> {
        Ok(self.config.present_modes.clone())
    }

    fn destroy_surface(&self, _surface: vk::SurfaceKHR) {
        self.log("destroy_surface");
    }

    fn create_device(
        &self,
        _physical_device: vk::PhysicalDevice,
        desc: &DeviceDesc,
    ) -> VkResult<Arc<dyn DeviceDriver>> {
        let mut state = self.state.lock();
        state.log("create_device");
        state.last_device_desc = Some(desc.clone());
        if self.config.fail_device_creation {
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }
        drop(state);
        Ok(Arc::new(self.clone()))
    }

    fn destroy_instance(&self) {
        self.log("destroy_instance");
    }
}

impl DeviceDriver for MockDriver {
    fn get_device_queue(&self, queue_family_index: u32, _queue_index: u32) -> vk::Queue {
        vk::Queue::from_raw(0x100 + queue_family_index as u64)
    }

    fn device_wait_idle(&self) -> VkResult<()> {
        let gate = self.state.lock().wait_idle_gate.take();
        if let Some(gate) = gate {
            gate.wait();
            gate.wait();
        }

        let mut state = self.state.lock();
        state.log("device_wait_idle");
        state.complete_all();
        Ok(())
    }

    fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR) -> VkResult<vk::SwapchainKHR> {
        self.state.lock().last_swapchain_min_image_count = Some(info.min_image_count);
        Ok(self.new_handle("create_swapchain"))
    }

    fn get_swapchain_images(&self, _swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let mut state = self.state.lock();
        Ok((0..self.config.swapchain_image_count)
            .map(|_| vk::Image::from_raw(state.handle()))
            .collect())
    }

    fn destroy_swapchain(&self, _swapchain: vk::SwapchainKHR) {
        self.log("destroy_swapchain");
    }

    fn create_command_pool(&self, _info: &vk::CommandPoolCreateInfo) -> VkResult<vk::CommandPool> {
        Ok(self.new_handle("create_command_pool"))
    }

    fn destroy_command_pool(&self, _pool: vk::CommandPool) {
        self.log("destroy_command_pool");
    }

    fn allocate_command_buffers(
        &self,
        info: &vk::CommandBufferAllocateInfo,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let mut state = self.state.lock();
        state.log("allocate_command_buffers");
        Ok((0..info.command_buffer_count)
            .map(|_| vk::CommandBuffer::from_raw(state.handle()))
            .collect())
    }

    fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let mut state = self.state.lock();
        state.log("free_command_buffers");
        for buffer in buffers {
            state.recorded.remove(&buffer.as_raw());
        }
    }

    fn begin_command_buffer(
        &self,
        buffer: vk::CommandBuffer,
        _info: &vk::CommandBufferBeginInfo,
    ) -> VkResult<()> {
        let mut state = self.state.lock();
        state.log("begin_command_buffer");
        state.recorded.insert(buffer.as_raw(), Vec::new());
        Ok(())
    }

    fn end_command_buffer(&self, _buffer: vk::CommandBuffer) -> VkResult<()> {
        self.log("end_command_buffer");
        if self.config.fail_end_command_buffer {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        Ok(())
    }

    fn cmd_fill_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        data: u32,
    ) {
        let mut state = self.state.lock();
        state.log("cmd_fill_buffer");
        state
            .recorded
            .entry(command_buffer.as_raw())
            .or_default()
            .push(FillOp {
                buffer: buffer.as_raw(),
                offset,
                size,
                data,
            });
    }

    fn queue_submit(&self, _queue: vk::Queue, submits: &[SubmitDesc<'_>], fence: vk::Fence) -> VkResult<()> {
        let mut state = self.state.lock();
        state.log("queue_submit");
        if self.config.fail_submit {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }

        for submit in submits {
            for buffer in submit.command_buffers {
                let ops = state.recorded.get(&buffer.as_raw()).cloned().unwrap_or_default();
                state.pending.extend(ops);
            }
            state.last_submit = Some(RecordedSubmit {
                wait_semaphores: submit.wait_semaphores.to_vec(),
                signal_semaphores: submit.signal_semaphores.to_vec(),
                command_buffers: submit.command_buffers.to_vec(),
                fence,
            });
        }
        if fence != vk::Fence::null() {
            state.pending_fences.push(fence.as_raw());
        }
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let fence: vk::Fence = self.new_handle("create_fence");
        self.state.lock().signaled_fences.insert(fence.as_raw(), signaled);
        Ok(fence)
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> VkResult<()> {
        let mut state = self.state.lock();
        state.log("wait_for_fence");
        if state.signaled_fences.get(&fence.as_raw()).copied().unwrap_or(false) {
            return Ok(());
        }
        if state.pending_fences.contains(&fence.as_raw()) {
            // In-order queue: the fence signals once everything before it ran
            state.complete_all();
            return Ok(());
        }
        Err(vk::Result::TIMEOUT)
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut state = self.state.lock();
        state.log("reset_fence");
        state.signaled_fences.insert(fence.as_raw(), false);
        Ok(())
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock();
        state.log("destroy_fence");
        state.signaled_fences.remove(&fence.as_raw());
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        Ok(self.new_handle("create_semaphore"))
    }

    fn destroy_semaphore(&self, _semaphore: vk::Semaphore) {
        self.log("destroy_semaphore");
    }

    fn create_buffer(&self, info: &vk::BufferCreateInfo) -> VkResult<vk::Buffer> {
        let buffer: vk::Buffer = self.new_handle("create_buffer");
        self.state.lock().buffers.insert(
            buffer.as_raw(),
            MockBuffer {
                size: info.size,
                binding: None,
            },
        );
        Ok(buffer)
    }

    fn get_buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        let size = self
            .state
            .lock()
            .buffers
            .get(&buffer.as_raw())
            .map_or(0, |b| b.size);
        let type_count = self
            .config
            .accelerators
            .iter()
            .map(|a| a.memory_types.len())
            .max()
            .unwrap_or(0);

        vk::MemoryRequirements {
            size: (size + BUFFER_ALIGNMENT - 1) / BUFFER_ALIGNMENT * BUFFER_ALIGNMENT,
            alignment: BUFFER_ALIGNMENT,
            memory_type_bits: ((1u64 << type_count) - 1) as u32,
        }
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut state = self.state.lock();
        state.log("destroy_buffer");
        state.buffers.remove(&buffer.as_raw());
    }

    fn allocate_memory(&self, info: &vk::MemoryAllocateInfo) -> VkResult<vk::DeviceMemory> {
        let mut state = self.state.lock();
        state.log("allocate_memory");
        if info.allocation_size > HEAP_SIZE {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }

        let len = info.allocation_size as usize;
        let backing = vec![0u8; len].into_boxed_slice();
        let addr = Box::into_raw(backing) as *mut u8 as usize;

        let handle = state.handle();
        state.allocations.insert(handle, MockAllocation { addr, len });
        Ok(vk::DeviceMemory::from_raw(handle))
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        let mut state = self.state.lock();
        state.log("free_memory");
        if let Some(allocation) = state.allocations.remove(&memory.as_raw()) {
            free_backing(allocation);
        }
    }

    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        let mut state = self.state.lock();
        state.log("bind_buffer_memory");
        match state.buffers.get_mut(&buffer.as_raw()) {
            Some(b) => {
                b.binding = Some((memory.as_raw(), offset));
                Ok(())
            }
            None => Err(vk::Result::ERROR_UNKNOWN),
        }
    }

    fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        _size: vk::DeviceSize,
    ) -> VkResult<*mut c_void> {
        let mut state = self.state.lock();
        state.log("map_memory");
        let allocation = state
            .allocations
            .get(&memory.as_raw())
            .copied()
            .ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)?;
        Ok((allocation.addr + offset as usize) as *mut c_void)
    }

    fn unmap_memory(&self, _memory: vk::DeviceMemory) {
        self.log("unmap_memory");
    }

    fn destroy_device(&self) {
        self.log("destroy_device");
    }
}

/// Window stand-in for headless tests.
#[derive(Debug, Clone)]
pub struct HeadlessWindow {
    pub extensions: Vec<String>,
    pub extent: vk::Extent2D,
}

impl Default for HeadlessWindow {
    fn default() -> Self {
        Self {
            extensions: strings(&["VK_KHR_surface", "VK_KHR_xlib_surface"]),
            extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
        }
    }
}

impl WindowSystem for HeadlessWindow {
    fn required_extensions(&self) -> GpuResult<Vec<String>> {
        Ok(self.extensions.clone())
    }

    fn raw_display_handle(&self) -> RawDisplayHandle {
        RawDisplayHandle::Xlib(XlibDisplayHandle::empty())
    }

    fn raw_window_handle(&self) -> RawWindowHandle {
        RawWindowHandle::Xlib(XlibWindowHandle::empty())
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

pub fn strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

pub fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
    vk::QueueFamilyProperties {
        queue_flags: flags,
        queue_count: 1,
        ..Default::default()
    }
}

pub fn memory_type(flags: vk::MemoryPropertyFlags) -> vk::MemoryType {
    let host_only = !flags.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL);
    vk::MemoryType {
        property_flags: flags,
        heap_index: host_only as u32,
    }
}

/// Accelerator with a combined graphics family and a desktop-like memory layout.
pub fn accelerator(name: &str, device_type: vk::PhysicalDeviceType) -> AcceleratorDescriptor {
    use vk::MemoryPropertyFlags as M;

    AcceleratorDescriptor {
        handle: vk::PhysicalDevice::from_raw(name.len() as u64 + device_type.as_raw() as u64 * 0x100),
        name: name.to_string(),
        device_type,
        api_version: vk::API_VERSION_1_0,
        memory_types: vec![
            memory_type(M::DEVICE_LOCAL),
            memory_type(M::HOST_VISIBLE | M::HOST_COHERENT),
            memory_type(M::DEVICE_LOCAL | M::HOST_VISIBLE | M::HOST_COHERENT),
            memory_type(M::HOST_VISIBLE | M::HOST_COHERENT | M::HOST_CACHED),
        ],
        memory_heaps: vec![
            vk::MemoryHeap {
                size: HEAP_SIZE,
                flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
            },
            vk::MemoryHeap {
                size: HEAP_SIZE,
                flags: vk::MemoryHeapFlags::empty(),
            },
        ],
        queue_families: vec![
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ],
    }
}

/// Instance + surface + device on queue family 0 of the preferred accelerator.
pub fn test_surface_device(config: MockConfig) -> (MockDriver, Arc<Surface>, Arc<Device>) {
    let driver = MockDriver::new(config);
    let instance = Instance::new(&driver, &InstanceDesc::default()).unwrap();
    let surface = Surface::new(&instance, &HeadlessWindow::default()).unwrap();
    let accelerator = select_accelerator(&instance).unwrap();
    let device = Device::new(&instance, accelerator, 0, &[], &[]).unwrap();
    (driver, surface, device)
}

pub fn test_device(config: MockConfig) -> (MockDriver, Arc<Device>) {
    let (driver, _surface, device) = test_surface_device(config);
    (driver, device)
}
