// Instance - capability inspection and context creation
//
// Responsibilities:
// - Enumerate instance extensions/layers and the platform's required extensions
// - Negotiate what gets enabled (validation only when it is installed)
// - Own the instance handle; destroyed after everything created from it

use std::sync::Arc;

use super::driver::{InstanceDesc, InstanceDriver, Loader, WindowSystem};
use crate::error::{GpuError, GpuResult};

pub const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";
pub const DEBUG_UTILS_EXTENSION: &str = "VK_EXT_debug_utils";

/// Read-only snapshot of what the Vulkan loader offers.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub extensions: Vec<String>,
    pub layers: Vec<String>,
    /// Extensions the windowing system needs for surface creation.
    pub required_extensions: Vec<String>,
}

impl Capabilities {
    pub fn inspect(loader: &dyn Loader, window: &dyn WindowSystem) -> GpuResult<Self> {
        let extensions = loader
            .enumerate_instance_extensions()
            .map_err(GpuError::vulkan("vkEnumerateInstanceExtensionProperties"))?;
        log::info!("{} instance extensions supported", extensions.len());
        for name in &extensions {
            log::info!("\t{}", name);
        }

        let layers = loader
            .enumerate_instance_layers()
            .map_err(GpuError::vulkan("vkEnumerateInstanceLayerProperties"))?;
        log::info!("Available layers:");
        for name in &layers {
            log::info!("\t{}", name);
        }

        let required_extensions = window.required_extensions()?;
        log::info!("Required extensions:");
        for name in &required_extensions {
            log::info!("\t{}", name);
        }

        Ok(Self {
            extensions,
            layers,
            required_extensions,
        })
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|e| e == name)
    }

    pub fn has_layer(&self, name: &str) -> bool {
        self.layers.iter().any(|l| l == name)
    }

    /// Build the instance request. Fails if a platform-required extension is
    /// missing; validation is dropped with a warning when not installed.
    pub fn negotiate(&self, app_name: &str, enable_validation: bool) -> GpuResult<InstanceDesc> {
        let missing: Vec<&str> = self
            .required_extensions
            .iter()
            .filter(|name| !self.has_extension(name))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(GpuError::ContextCreationFailed(format!(
                "missing required instance extensions: {}",
                missing.join(", ")
            )));
        }

        let mut desc = InstanceDesc {
            app_name: app_name.to_string(),
            extensions: self.required_extensions.clone(),
            layers: Vec::new(),
            debug_messenger: false,
        };

        if enable_validation {
            if self.has_layer(VALIDATION_LAYER) {
                desc.layers.push(VALIDATION_LAYER.to_string());
                if self.has_extension(DEBUG_UTILS_EXTENSION) {
                    desc.extensions.push(DEBUG_UTILS_EXTENSION.to_string());
                    desc.debug_messenger = true;
                }
            } else {
                log::warn!("{} requested but not installed, continuing without it", VALIDATION_LAYER);
            }
        }

        Ok(desc)
    }
}

/// Top-level API context.
pub struct Instance {
    driver: Arc<dyn InstanceDriver>,
    pub extensions: Vec<String>,
    pub layers: Vec<String>,
}

impl Instance {
    pub fn new(loader: &dyn Loader, desc: &InstanceDesc) -> GpuResult<Arc<Self>> {
        log::info!("Creating Vulkan instance: {}", desc.app_name);

        let driver = loader
            .create_instance(desc)
            .map_err(|e| GpuError::ContextCreationFailed(e.to_string()))?;

        Ok(Arc::new(Self {
            driver,
            extensions: desc.extensions.clone(),
            layers: desc.layers.clone(),
        }))
    }

    pub fn driver(&self) -> &dyn InstanceDriver {
        self.driver.as_ref()
    }

    /// Whether `name` was enabled at creation.
    pub fn has_layer(&self, name: &str) -> bool {
        self.layers.iter().any(|l| l == name)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan instance");
        self.driver.destroy_instance();
    }
}
