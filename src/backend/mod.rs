// Backend module - Vulkan abstraction layer
//
// Design: RAII wrappers over a narrow driver seam. Each object holds an Arc to
// its parent, so release order is always the reverse of creation.

pub mod command;
pub mod device;
pub mod driver;
pub mod instance;
pub mod memory;
pub mod selector;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod vulkan;

#[cfg(test)]
pub mod mock;

pub use command::{Command, CommandBuffer, CommandBufferState, CommandPool};
pub use device::{Device, Queue, SubmitSync};
pub use driver::{AcceleratorDescriptor, DeviceDriver, InstanceDriver, Loader, WindowSystem};
pub use instance::{Capabilities, Instance};
pub use memory::{Buffer, MappedMemory, MemoryBlock};
pub use surface::Surface;
pub use swapchain::{Swapchain, SwapchainRequest};
pub use sync::{Fence, Semaphore};
pub use vulkan::AshLoader;
