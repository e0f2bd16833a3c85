// Graphics context - the full bring-up chain in one owner
//
// Creation order:
//   capabilities -> instance -> surface -> accelerator -> queue family
//   -> device -> swapchain -> command pool -> command buffer
// Fields are declared in the reverse order so the default drop releases
// everything children-first.

use ash::vk;
use std::sync::Arc;

use crate::backend::command::{Command, CommandBuffer, CommandPool};
use crate::backend::device::{Device, SubmitSync, REQUIRED_DEVICE_EXTENSIONS};
use crate::backend::driver::{Loader, WindowSystem};
use crate::backend::instance::{Capabilities, Instance};
use crate::backend::memory::{Buffer, MemoryBlock, HOST_SHARED};
use crate::backend::selector::{device_extensions, find_queue_family, select_accelerator};
use crate::backend::surface::Surface;
use crate::backend::swapchain::{Swapchain, SwapchainRequest, DEFAULT_FORMAT};
use crate::config::{Config, RoundTripConfig};
use crate::error::{GpuError, GpuResult};

pub struct GraphicsContext {
    command_buffer: CommandBuffer,
    _command_pool: Arc<CommandPool>,
    swapchain: Swapchain,
    device: Arc<Device>,
    _surface: Arc<Surface>,
    instance: Arc<Instance>,
}

impl GraphicsContext {
    pub fn new(loader: &dyn Loader, window: &dyn WindowSystem, config: &Config) -> GpuResult<Self> {
        log::info!("Initializing Vulkan...");

        let capabilities = Capabilities::inspect(loader, window)?;
        let desc = capabilities.negotiate(&config.window.title, config.debug.validation_layers)?;
        let instance = Instance::new(loader, &desc)?;
        let surface = Surface::new(&instance, window)?;

        let accelerator = select_accelerator(&instance)?;
        let available = device_extensions(&instance, &accelerator)?;
        let family = find_queue_family(&accelerator, &surface)?.require(&accelerator)?;
        log::info!("Using queue family {}", family);

        let device = Device::new(
            &instance,
            accelerator,
            family,
            &available,
            REQUIRED_DEVICE_EXTENSIONS,
        )?;

        let request = SwapchainRequest {
            extent: window.extent(),
            min_image_count: config.graphics.min_image_count,
            formats: vec![DEFAULT_FORMAT],
            present_modes: config.present_modes(),
        };
        let swapchain = Swapchain::new(&device, &surface, &request)?;

        let command_pool = CommandPool::new(&device, family)?;
        let command_buffer = command_pool.allocate()?;

        log::info!("Vulkan initialized successfully!");
        Ok(Self {
            command_buffer,
            _command_pool: command_pool,
            swapchain,
            device,
            _surface: surface,
            instance,
        })
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    /// Fill a host-visible device-local buffer on the GPU and read the
    /// first word back through a mapping.
    pub fn fill_round_trip(&mut self, params: &RoundTripConfig) -> GpuResult<u32> {
        if params.buffer_size < 4 {
            return Err(GpuError::InvalidUsage(format!(
                "round trip buffer of {} bytes cannot hold a 32-bit word",
                params.buffer_size
            )));
        }
        let word = params.fill_word();

        let mut buffer = Buffer::new(&self.device, params.buffer_size, vk::BufferUsageFlags::TRANSFER_DST)?;
        let block = MemoryBlock::allocate_for(&self.device, &buffer, HOST_SHARED, params.allocation_size)?;
        buffer.bind(&block, 0)?;
        let mapping = block.map()?;

        // The reported size may be padded past the buffer; fills must stay inside it
        let fill_size = buffer.requirements.size.min(buffer.size) & !3;
        let fill = Command::fill_buffer(&buffer, 0, fill_size, word)?;

        self.command_buffer.record_one_shot(&[fill])?;
        self.device.submit(&mut self.command_buffer, &SubmitSync::default())?;
        self.device.wait_idle()?;

        let value = mapping.read_u32(0)?;
        log::info!("Round trip read back {:#010x} (pattern {:#04x})", value, params.pattern);
        Ok(value)
    }

    pub fn wait_idle(&self) -> GpuResult<()> {
        self.device.wait_idle()
    }

    /// Tear everything down. Fails with `InvalidUsage` if submissions are
    /// still unconfirmed; resources are released anyway, after a device wait.
    pub fn destroy(self) -> GpuResult<()> {
        log::info!("Destroying graphics context...");
        let idle = self.device.ensure_idle("destroying the graphics context");
        if let Err(e) = &idle {
            log::error!("{}", e);
        }
        drop(self);
        idle
    }
}
