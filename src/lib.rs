// vk-bootstrap - Vulkan context bring-up and a buffer fill round trip
//
// The library holds the whole pipeline; the binary only adds a window.

pub mod backend;
pub mod config;
pub mod context;
pub mod error;

pub use context::GraphicsContext;
pub use error::{GpuError, GpuResult};
