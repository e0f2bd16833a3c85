// Memory - ad hoc device memory allocation for buffers
//
// Provides:
// - Memory type selection ("last match" over the accelerator's type list)
// - Fixed-size memory blocks, bound to exactly one buffer
// - Scoped host mappings of coherent memory

use ash::vk;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::device::Device;
use super::driver::AcceleratorDescriptor;
use crate::error::{GpuError, GpuResult};

/// Memory both the host and the device can see without flushes.
pub const HOST_SHARED: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_COHERENT.as_raw()
        | vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
        | vk::MemoryPropertyFlags::DEVICE_LOCAL.as_raw(),
);

const MAPPABLE: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// Index of the last memory type whose flags contain all of `required`.
pub fn select_memory_type(
    accelerator: &AcceleratorDescriptor,
    required: vk::MemoryPropertyFlags,
) -> GpuResult<u32> {
    select_memory_type_for(accelerator, u32::MAX, required)
}

/// Same policy, restricted to the types set in `type_bits`
/// (a `vk::MemoryRequirements::memory_type_bits` mask).
pub fn select_memory_type_for(
    accelerator: &AcceleratorDescriptor,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> GpuResult<u32> {
    let mut chosen = None;

    for (index, memory_type) in accelerator.memory_types.iter().enumerate() {
        // Vulkan reports at most 32 types; anything past bit 31 is never allowed
        let allowed = index < 32 && type_bits & (1 << index) != 0;
        let matches = memory_type.property_flags.contains(required);

        log::debug!(
            "Memory type {}: flags {:032b}, heap {}, matches: {}",
            index,
            memory_type.property_flags.as_raw(),
            memory_type.heap_index,
            allowed && matches
        );

        // No early exit: a later match replaces an earlier one
        if allowed && matches {
            chosen = Some(index as u32);
        }
    }

    chosen.ok_or(GpuError::NoCompatibleMemoryType { required })
}

pub struct MemoryBlock {
    pub handle: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    pub type_index: u32,
    pub properties: vk::MemoryPropertyFlags,
    bound: AtomicBool,
    mapped: AtomicBool,
    device: Arc<Device>,
}

impl MemoryBlock {
    pub fn allocate(device: &Arc<Device>, type_index: u32, size: vk::DeviceSize) -> GpuResult<Arc<Self>> {
        let properties = device
            .accelerator
            .memory_types
            .get(type_index as usize)
            .map(|t| t.property_flags)
            .ok_or_else(|| {
                GpuError::InvalidUsage(format!("memory type {} does not exist", type_index))
            })?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(size)
            .memory_type_index(type_index)
            .build();

        let handle = device
            .driver()
            .allocate_memory(&alloc_info)
            .map_err(|result| GpuError::AllocationFailed { size, result })?;

        log::info!("Allocated {} bytes from memory type {}", size, type_index);

        Ok(Arc::new(Self {
            handle,
            size,
            type_index,
            properties,
            bound: AtomicBool::new(false),
            mapped: AtomicBool::new(false),
            device: device.clone(),
        }))
    }

    /// Pick a type the buffer accepts that has `required`, then allocate.
    pub fn allocate_for(
        device: &Arc<Device>,
        buffer: &Buffer,
        required: vk::MemoryPropertyFlags,
        size: vk::DeviceSize,
    ) -> GpuResult<Arc<Self>> {
        let type_index = select_memory_type_for(
            &device.accelerator,
            buffer.requirements.memory_type_bits,
            required,
        )?;
        Self::allocate(device, type_index, size)
    }

    /// Map the whole block. Only coherent host-visible memory is mappable here.
    pub fn map(&self) -> GpuResult<MappedMemory<'_>> {
        if !self.properties.contains(MAPPABLE) {
            return Err(GpuError::InvalidUsage(format!(
                "memory type {} is not host-visible and coherent",
                self.type_index
            )));
        }
        if self.mapped.swap(true, Ordering::AcqRel) {
            return Err(GpuError::InvalidUsage("memory block is already mapped".into()));
        }

        let ptr = match self.device.driver().map_memory(self.handle, 0, vk::WHOLE_SIZE) {
            Ok(ptr) => ptr.cast::<u8>(),
            Err(result) => {
                self.mapped.store(false, Ordering::Release);
                return Err(GpuError::Vulkan {
                    call: "vkMapMemory",
                    result,
                });
            }
        };

        Ok(MappedMemory {
            block: self,
            ptr,
            len: self.size as usize,
            _marker: PhantomData,
        })
    }
}

impl Drop for MemoryBlock {
    fn drop(&mut self) {
        if !self.device.is_idle() {
            log::warn!("Memory block freed while work is pending, waiting for device");
            if let Err(e) = self.device.wait_idle() {
                log::error!("Wait before freeing memory failed: {}", e);
            }
        }
        self.device.driver().free_memory(self.handle);
    }
}

/// Host view of a mapped block; unmapped on drop.
pub struct MappedMemory<'a> {
    block: &'a MemoryBlock,
    ptr: *mut u8,
    len: usize,
    _marker: PhantomData<&'a mut [u8]>,
}

impl MappedMemory<'_> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Native-endian word at `offset`. The device must be idle: a read racing
    /// the GPU would observe stale data.
    pub fn read_u32(&self, offset: usize) -> GpuResult<u32> {
        let bytes = self.read_bytes(offset, 4)?;
        Ok(u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_bytes(&self, offset: usize, len: usize) -> GpuResult<Vec<u8>> {
        self.block.device.ensure_idle("reading mapped memory")?;
        self.check_range(offset, len)?;

        let mut out = vec![0u8; len];
        unsafe { std::ptr::copy_nonoverlapping(self.ptr.add(offset), out.as_mut_ptr(), len) };
        Ok(out)
    }

    pub fn write_bytes(&mut self, offset: usize, data: &[u8]) -> GpuResult<()> {
        self.block.device.ensure_idle("writing mapped memory")?;
        self.check_range(offset, data.len())?;

        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.add(offset), data.len()) };
        Ok(())
    }

    fn check_range(&self, offset: usize, len: usize) -> GpuResult<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(GpuError::InvalidUsage(format!(
                "mapped access {}+{} outside {} bytes",
                offset, len, self.len
            ))),
        }
    }
}

impl Drop for MappedMemory<'_> {
    fn drop(&mut self) {
        self.block.device.driver().unmap_memory(self.block.handle);
        self.block.mapped.store(false, Ordering::Release);
    }
}

/// Linear GPU buffer. Unusable until `bind` succeeds.
pub struct Buffer {
    pub handle: vk::Buffer,
    pub size: vk::DeviceSize,
    pub requirements: vk::MemoryRequirements,
    memory: Option<Arc<MemoryBlock>>,
    device: Arc<Device>,
}

impl Buffer {
    pub fn new(device: &Arc<Device>, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> GpuResult<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .build();

        let handle = device
            .driver()
            .create_buffer(&buffer_info)
            .map_err(GpuError::vulkan("vkCreateBuffer"))?;

        let requirements = device.driver().get_buffer_memory_requirements(handle);
        log::info!("Buffer memory requirements:");
        log::info!("\tAlignment: {}", requirements.alignment);
        log::info!("\tSize: {}", requirements.size);
        log::info!("\tMemory types: {:032b}", requirements.memory_type_bits);

        Ok(Self {
            handle,
            size,
            requirements,
            memory: None,
            device: device.clone(),
        })
    }

    /// Bind `block` at `offset`. The block keeps living until this buffer is
    /// destroyed.
    pub fn bind(&mut self, block: &Arc<MemoryBlock>, offset: vk::DeviceSize) -> GpuResult<()> {
        if self.memory.is_some() {
            return Err(GpuError::InvalidUsage("buffer already has memory bound".into()));
        }
        if self.requirements.memory_type_bits & (1 << block.type_index) == 0 {
            return Err(GpuError::InvalidUsage(format!(
                "memory type {} is not accepted by this buffer (mask {:032b})",
                block.type_index, self.requirements.memory_type_bits
            )));
        }

        let available = block.size.saturating_sub(offset);
        if offset > block.size || available < self.requirements.size {
            return Err(GpuError::BufferMemorySizeMismatch {
                required: self.requirements.size,
                available,
            });
        }
        if self.requirements.alignment > 0 && offset % self.requirements.alignment != 0 {
            return Err(GpuError::InvalidUsage(format!(
                "bind offset {} violates alignment {}",
                offset, self.requirements.alignment
            )));
        }
        if block.bound.swap(true, Ordering::AcqRel) {
            return Err(GpuError::InvalidUsage("memory block is already bound to a buffer".into()));
        }

        if let Err(result) = self
            .device
            .driver()
            .bind_buffer_memory(self.handle, block.handle, offset)
        {
            block.bound.store(false, Ordering::Release);
            return Err(GpuError::Vulkan {
                call: "vkBindBufferMemory",
                result,
            });
        }

        self.memory = Some(block.clone());
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.memory.is_some()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if !self.device.is_idle() {
            log::warn!("Buffer destroyed while work is pending, waiting for device");
            if let Err(e) = self.device.wait_idle() {
                log::error!("Wait before buffer destruction failed: {}", e);
            }
        }
        self.device.driver().destroy_buffer(self.handle);
        // The bound block (if any) is released after the buffer handle
        self.memory.take();
    }
}
