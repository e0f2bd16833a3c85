// Command submission - pools, buffers and one-shot recording
//
// Lifecycle of a buffer:
//   Initial -> Recording -> Executable -> Submitted -> (completed) -> Initial
// Completion is only known once the host has waited (device idle or fence);
// until then the buffer stays Submitted and cannot be re-recorded or freed.

use ash::vk;
use std::sync::Arc;

use super::device::Device;
use super::memory::Buffer;
use crate::error::{GpuError, GpuResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferState {
    Initial,
    Recording,
    Executable,
    Submitted,
}

/// GPU operations this pipeline knows how to record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Repeat a 32-bit word over `[offset, offset + size)` of `buffer`.
    FillBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        data: u32,
    },
}

impl Command {
    /// Fill a bound buffer's byte range with `data`.
    pub fn fill_buffer(
        buffer: &Buffer,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        data: u32,
    ) -> GpuResult<Self> {
        if !buffer.is_bound() {
            return Err(GpuError::InvalidUsage(
                "fill recorded for a buffer with no memory bound".into(),
            ));
        }
        if size == 0 {
            return Err(GpuError::InvalidUsage("fill range must not be empty".into()));
        }
        if offset % 4 != 0 || size % 4 != 0 {
            return Err(GpuError::InvalidUsage(format!(
                "fill range {}+{} is not 4-byte aligned",
                offset, size
            )));
        }
        if offset.checked_add(size).map_or(true, |end| end > buffer.size) {
            return Err(GpuError::InvalidUsage(format!(
                "fill range {}+{} exceeds buffer size {}",
                offset, size, buffer.size
            )));
        }

        Ok(Command::FillBuffer {
            buffer: buffer.handle,
            offset,
            size,
            data,
        })
    }
}

pub struct CommandPool {
    pub handle: vk::CommandPool,
    family_index: u32,
    device: Arc<Device>,
}

impl CommandPool {
    /// Pools may only target the family of the device's submission queue.
    pub fn new(device: &Arc<Device>, queue_family_index: u32) -> GpuResult<Arc<Self>> {
        if queue_family_index != device.queue_family_index() {
            return Err(GpuError::InvalidUsage(format!(
                "command pool for queue family {} but the device queue is family {}",
                queue_family_index,
                device.queue_family_index()
            )));
        }

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family_index)
            // TRANSIENT: Command buffers are short-lived
            // RESET: Allow individual buffer reset
            .flags(vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .build();

        let handle = device
            .driver()
            .create_command_pool(&pool_info)
            .map_err(GpuError::vulkan("vkCreateCommandPool"))?;

        Ok(Arc::new(Self {
            handle,
            family_index: queue_family_index,
            device: device.clone(),
        }))
    }

    /// Allocate one primary command buffer.
    pub fn allocate(self: &Arc<Self>) -> GpuResult<CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.handle)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1)
            .build();

        let handle = self
            .device
            .driver()
            .allocate_command_buffers(&alloc_info)
            .map_err(GpuError::vulkan("vkAllocateCommandBuffers"))?
            .into_iter()
            .next()
            .ok_or(GpuError::Vulkan {
                call: "vkAllocateCommandBuffers",
                result: vk::Result::ERROR_UNKNOWN,
            })?;

        Ok(CommandBuffer {
            handle,
            state: CommandBufferState::Initial,
            ticket: 0,
            pool: self.clone(),
        })
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        self.device.driver().destroy_command_pool(self.handle);
    }
}

pub struct CommandBuffer {
    pub handle: vk::CommandBuffer,
    state: CommandBufferState,
    ticket: u64,
    pool: Arc<CommandPool>,
}

impl CommandBuffer {
    pub fn state(&self) -> CommandBufferState {
        match self.state {
            CommandBufferState::Submitted if self.pool.device.is_complete(self.ticket) => {
                CommandBufferState::Initial
            }
            state => state,
        }
    }

    pub fn queue_family_index(&self) -> u32 {
        self.pool.family_index
    }

    /// Record `commands` as a one-time-submit batch.
    pub fn record_one_shot(&mut self, commands: &[Command]) -> GpuResult<()> {
        match self.state() {
            CommandBufferState::Initial | CommandBufferState::Executable => {}
            state => {
                return Err(GpuError::InvalidUsage(format!(
                    "cannot begin recording a command buffer in the {:?} state",
                    state
                )))
            }
        }

        let driver = self.pool.device.driver();
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
            .build();

        driver
            .begin_command_buffer(self.handle, &begin_info)
            .map_err(GpuError::submission("vkBeginCommandBuffer"))?;
        self.state = CommandBufferState::Recording;

        for command in commands {
            match *command {
                Command::FillBuffer {
                    buffer,
                    offset,
                    size,
                    data,
                } => driver.cmd_fill_buffer(self.handle, buffer, offset, size, data),
            }
        }

        if let Err(e) = driver.end_command_buffer(self.handle) {
            // The pool allows a reset, so the next begin starts over
            self.state = CommandBufferState::Initial;
            return Err(GpuError::submission("vkEndCommandBuffer")(e));
        }
        self.state = CommandBufferState::Executable;

        Ok(())
    }

    pub(crate) fn mark_submitted(&mut self, ticket: u64) {
        self.state = CommandBufferState::Submitted;
        self.ticket = ticket;
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        if self.state() == CommandBufferState::Submitted {
            log::warn!("Command buffer dropped while pending, waiting for device");
            if let Err(e) = self.pool.device.wait_idle() {
                log::error!("Wait before freeing command buffer failed: {}", e);
            }
        }
        self.pool
            .device
            .driver()
            .free_command_buffers(self.pool.handle, &[self.handle]);
    }
}
