// Error taxonomy for the Vulkan bring-up path
//
// Every variant is fatal at this layer: each one reflects a missing
// hardware/driver capability or a broken usage contract, so nothing retries.

use ash::vk;
use thiserror::Error;

pub type GpuResult<T> = std::result::Result<T, GpuError>;

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("failed to load the Vulkan library: {0}")]
    Loading(String),

    #[error("failed to create the Vulkan instance: {0}")]
    ContextCreationFailed(String),

    #[error("failed to create a presentation surface: {0}")]
    SurfaceCreationFailed(vk::Result),

    #[error("no Vulkan-capable accelerator found")]
    NoAcceleratorFound,

    #[error("no queue family on '{accelerator}' supports both graphics and presentation")]
    NoSuitableQueueFamily { accelerator: String },

    #[error("failed to create the logical device: {0}")]
    DeviceCreationFailed(String),

    #[error("failed to create the swapchain: {0}")]
    SwapchainCreationFailed(String),

    #[error("no memory type satisfies the required properties {required:?}")]
    NoCompatibleMemoryType { required: vk::MemoryPropertyFlags },

    #[error("failed to allocate {size} bytes of device memory: {result}")]
    AllocationFailed { size: vk::DeviceSize, result: vk::Result },

    #[error("memory block too small: buffer needs {required} bytes, {available} available past the bind offset")]
    BufferMemorySizeMismatch {
        required: vk::DeviceSize,
        available: vk::DeviceSize,
    },

    #[error("command submission failed during {stage}: {result}")]
    CommandSubmissionFailed {
        stage: &'static str,
        result: vk::Result,
    },

    #[error("invalid usage: {0}")]
    InvalidUsage(String),

    #[error("{call} failed: {result}")]
    Vulkan {
        call: &'static str,
        result: vk::Result,
    },
}

impl GpuError {
    /// Wrap a raw driver result for calls that have no dedicated kind.
    pub fn vulkan(call: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| GpuError::Vulkan { call, result }
    }

    pub(crate) fn submission(stage: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| GpuError::CommandSubmissionFailed { stage, result }
    }
}
