// Device selection - physical accelerator and queue family negotiation
//
// Policy:
// - Accelerator: first discrete GPU, else first integrated, else first listed
// - Queue family: lowest index that is graphics capable AND can present
//   to the bound surface (one combined queue, no split graphics/present)

use ash::vk;

use super::driver::AcceleratorDescriptor;
use super::instance::Instance;
use super::surface::Surface;
use crate::error::{GpuError, GpuResult};

/// Type preference, most wanted first.
const TYPE_PREFERENCE: [vk::PhysicalDeviceType; 2] = [
    vk::PhysicalDeviceType::DISCRETE_GPU,
    vk::PhysicalDeviceType::INTEGRATED_GPU,
];

/// Outcome of queue family negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueFamilySelection {
    Found(u32),
    NotFound,
}

impl QueueFamilySelection {
    /// `NotFound` is fatal for this design.
    pub fn require(self, accelerator: &AcceleratorDescriptor) -> GpuResult<u32> {
        match self {
            QueueFamilySelection::Found(index) => Ok(index),
            QueueFamilySelection::NotFound => Err(GpuError::NoSuitableQueueFamily {
                accelerator: accelerator.name.clone(),
            }),
        }
    }
}

/// Enumerate the instance's accelerators and pick one.
pub fn select_accelerator(instance: &Instance) -> GpuResult<AcceleratorDescriptor> {
    let candidates = instance
        .driver()
        .enumerate_accelerators()
        .map_err(GpuError::vulkan("vkEnumeratePhysicalDevices"))?;

    log::info!("Physical devices available:");
    for candidate in &candidates {
        log::info!("\t{} ({:?})", candidate.name, candidate.device_type);
    }

    let chosen = choose_accelerator(candidates)?;
    log::info!(
        "Chosen physical device: {} (API {}.{}.{})",
        chosen.name,
        vk::api_version_major(chosen.api_version),
        vk::api_version_minor(chosen.api_version),
        vk::api_version_patch(chosen.api_version)
    );
    Ok(chosen)
}

pub fn choose_accelerator(
    mut candidates: Vec<AcceleratorDescriptor>,
) -> GpuResult<AcceleratorDescriptor> {
    if candidates.is_empty() {
        return Err(GpuError::NoAcceleratorFound);
    }

    let index = TYPE_PREFERENCE
        .iter()
        .find_map(|wanted| candidates.iter().position(|c| c.device_type == *wanted))
        .unwrap_or(0);

    Ok(candidates.swap_remove(index))
}

/// Lowest family index that is graphics capable and passes `can_present`.
pub fn select_queue_family<F>(
    accelerator: &AcceleratorDescriptor,
    mut can_present: F,
) -> GpuResult<QueueFamilySelection>
where
    F: FnMut(u32) -> GpuResult<bool>,
{
    for (index, family) in accelerator.queue_families.iter().enumerate() {
        let index = index as u32;
        if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && can_present(index)? {
            return Ok(QueueFamilySelection::Found(index));
        }
    }
    Ok(QueueFamilySelection::NotFound)
}

/// Queue family negotiation against a real surface.
pub fn find_queue_family(
    accelerator: &AcceleratorDescriptor,
    surface: &Surface,
) -> GpuResult<QueueFamilySelection> {
    select_queue_family(accelerator, |index| {
        surface.supports_presentation(accelerator.handle, index)
    })
}

/// List (and log) the accelerator's device extensions.
pub fn device_extensions(
    instance: &Instance,
    accelerator: &AcceleratorDescriptor,
) -> GpuResult<Vec<String>> {
    let extensions = instance
        .driver()
        .enumerate_device_extensions(accelerator.handle)
        .map_err(GpuError::vulkan("vkEnumerateDeviceExtensionProperties"))?;

    log::info!("Available device extensions:");
    for name in &extensions {
        log::info!("\t{}", name);
    }
    Ok(extensions)
}
