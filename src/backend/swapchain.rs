// Swapchain - presentable image chain
//
// The configuration is negotiated against what the surface reports:
// desired formats and present modes are intersected with the supported
// ones, and creation fails only when an intersection is empty.
// The image list is always read back from the driver after creation.

use ash::vk;
use std::sync::Arc;

use super::device::Device;
use super::surface::Surface;
use crate::error::{GpuError, GpuResult};

pub const DEFAULT_MIN_IMAGE_COUNT: u32 = 4;

/// 8-bit BGRA, sRGB non-linear.
pub const DEFAULT_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

const IMAGE_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::COLOR_ATTACHMENT;

/// What the caller wants; preference lists are ordered most wanted first.
#[derive(Debug, Clone)]
pub struct SwapchainRequest {
    pub extent: vk::Extent2D,
    pub min_image_count: u32,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainRequest {
    pub fn new(extent: vk::Extent2D) -> Self {
        Self {
            extent,
            min_image_count: DEFAULT_MIN_IMAGE_COUNT,
            formats: vec![DEFAULT_FORMAT],
            present_modes: vec![vk::PresentModeKHR::IMMEDIATE],
        }
    }
}

pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    device: Arc<Device>,
    _surface: Arc<Surface>,
}

impl Swapchain {
    pub fn new(device: &Arc<Device>, surface: &Arc<Surface>, request: &SwapchainRequest) -> GpuResult<Self> {
        log::info!(
            "Creating swapchain: {}x{}",
            request.extent.width,
            request.extent.height
        );

        let instance = surface.instance().driver();
        let physical_device = device.accelerator.handle;
        let query_failed = |what: &str, e: vk::Result| {
            GpuError::SwapchainCreationFailed(format!("querying surface {} failed: {}", what, e))
        };

        let caps = instance
            .surface_capabilities(physical_device, surface.handle)
            .map_err(|e| query_failed("capabilities", e))?;
        let formats = instance
            .surface_formats(physical_device, surface.handle)
            .map_err(|e| query_failed("formats", e))?;
        let present_modes = instance
            .surface_present_modes(physical_device, surface.handle)
            .map_err(|e| query_failed("present modes", e))?;

        let format = negotiate_format(&formats, &request.formats).ok_or_else(|| {
            GpuError::SwapchainCreationFailed(format!(
                "none of the requested formats {:?} is supported (surface offers {:?})",
                request.formats, formats
            ))
        })?;
        let present_mode = negotiate_present_mode(&present_modes, &request.present_modes)
            .ok_or_else(|| {
                GpuError::SwapchainCreationFailed(format!(
                    "none of the requested present modes {:?} is supported (surface offers {:?})",
                    request.present_modes, present_modes
                ))
            })?;
        log::info!("Surface format: {:?}, present mode: {:?}", format, present_mode);

        let image_count = negotiate_image_count(&caps, request.min_image_count)?;
        let extent = choose_extent(&caps, request.extent);

        if !caps.supported_transforms.contains(vk::SurfaceTransformFlagsKHR::IDENTITY) {
            return Err(GpuError::SwapchainCreationFailed(
                "identity pre-transform not supported".into(),
            ));
        }
        if !caps.supported_composite_alpha.contains(vk::CompositeAlphaFlagsKHR::OPAQUE) {
            return Err(GpuError::SwapchainCreationFailed(
                "opaque composite alpha not supported".into(),
            ));
        }
        if !caps.supported_usage_flags.contains(IMAGE_USAGE) {
            return Err(GpuError::SwapchainCreationFailed(
                "color attachment usage not supported".into(),
            ));
        }

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(IMAGE_USAGE)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(vk::SurfaceTransformFlagsKHR::IDENTITY)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .build();

        let handle = device
            .driver()
            .create_swapchain(&create_info)
            .map_err(|e| GpuError::SwapchainCreationFailed(e.to_string()))?;

        // From here on the struct owns the handle, so early returns clean up
        let mut swapchain = Self {
            handle,
            images: Vec::new(),
            format,
            present_mode,
            extent,
            device: device.clone(),
            _surface: surface.clone(),
        };

        swapchain.images = device
            .driver()
            .get_swapchain_images(handle)
            .map_err(GpuError::vulkan("vkGetSwapchainImagesKHR"))?;

        if (swapchain.images.len() as u32) < image_count {
            return Err(GpuError::SwapchainCreationFailed(format!(
                "driver returned {} images, fewer than the {} requested",
                swapchain.images.len(),
                image_count
            )));
        }

        log::info!("Created swapchain with {} images", swapchain.images.len());
        Ok(swapchain)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.device.driver().destroy_swapchain(self.handle);
    }
}

/// First desired format the surface supports.
pub fn negotiate_format(
    supported: &[vk::SurfaceFormatKHR],
    desired: &[vk::SurfaceFormatKHR],
) -> Option<vk::SurfaceFormatKHR> {
    // A single UNDEFINED entry means the surface takes any format
    if let [only] = supported {
        if only.format == vk::Format::UNDEFINED {
            return desired.first().copied();
        }
    }

    desired.iter().copied().find(|want| {
        supported
            .iter()
            .any(|have| have.format == want.format && have.color_space == want.color_space)
    })
}

/// First desired present mode the surface supports.
pub fn negotiate_present_mode(
    supported: &[vk::PresentModeKHR],
    desired: &[vk::PresentModeKHR],
) -> Option<vk::PresentModeKHR> {
    desired.iter().copied().find(|mode| supported.contains(mode))
}

fn negotiate_image_count(caps: &vk::SurfaceCapabilitiesKHR, requested: u32) -> GpuResult<u32> {
    let count = requested.max(caps.min_image_count);
    // max_image_count == 0 means no upper limit
    if caps.max_image_count > 0 && count > caps.max_image_count {
        return Err(GpuError::SwapchainCreationFailed(format!(
            "{} images requested but the surface allows at most {}",
            count, caps.max_image_count
        )));
    }
    Ok(count)
}

fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, wanted: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: wanted
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: wanted
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}
