// Swapchain - Window presentation
//
// The swapchain and its image views are part of the swapchain-dependent
// resource set: created whole and dropped whole on every rebuild. Format and
// present mode are negotiated by the pure helpers at the bottom so they can
// be checked without a GPU.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use std::time::Duration;

use super::VulkanDevice;
use crate::error::{FrameError, FrameResult};
use crate::frame::Extent;

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    pub fn new(
        device: Arc<VulkanDevice>,
        requested: Extent,
        present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        log::info!("Creating swapchain: {}", requested);

        let surface_caps = device.surface_capabilities()?;
        let formats = device.surface_formats()?;

        let surface_format = choose_surface_format(&formats).context("Surface reports no formats")?;
        let extent = choose_extent(&surface_caps, requested);
        let image_count = choose_image_count(&surface_caps, present_mode);

        log::info!(
            "Surface format {:?}/{:?}, present mode {:?}, requesting {} images",
            surface_format.format,
            surface_format.color_space,
            present_mode,
            image_count
        );

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(device.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = unsafe { device.swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        let images = unsafe { device.swapchain_loader.get_swapchain_images(swapchain) }?;

        // The driver may hand out more images than requested; every one gets a slot
        log::info!("Created swapchain with {} images ({}x{})", images.len(), extent.width, extent.height);

        let mut this = Self {
            swapchain,
            images,
            image_views: Vec::new(),
            format: surface_format.format,
            extent,
            device,
        };

        for &image in &this.images {
            let create_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = unsafe { this.device.device.create_image_view(&create_info, None) }
                .context("Failed to create image view")?;
            this.image_views.push(view);
        }

        Ok(this)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn frame_extent(&self) -> Extent {
        Extent::new(self.extent.width, self.extent.height)
    }

    /// Acquire the next image, signalling `semaphore` when it is ready.
    pub fn acquire_next_image(
        &self,
        semaphore: vk::Semaphore,
        timeout: Duration,
    ) -> FrameResult<(u32, bool)> {
        let result = unsafe {
            self.device.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout_ns(timeout),
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok(acquired) => Ok(acquired),
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Err(FrameError::AcquireTimeout { timeout }),
            Err(e) => Err(FrameError::from_vk(e)),
        }
    }

    /// Present rendered image to screen. `Ok(true)` means suboptimal.
    pub fn present(&self, image_index: u32, wait_semaphore: vk::Semaphore) -> FrameResult<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe {
            self.device
                .swapchain_loader
                .queue_present(self.device.graphics_queue, &present_info)
        }
        .map_err(FrameError::from_vk)
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.device
                .swapchain_loader
                .destroy_swapchain(self.swapchain, None);
        }
    }
}

pub fn timeout_ns(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

/// Preferred UNORM formats in order; anything else falls back to the first reported.
const PREFERRED_FORMATS: [vk::Format; 4] = [
    vk::Format::B8G8R8A8_UNORM,
    vk::Format::R8G8B8A8_UNORM,
    vk::Format::B8G8R8_UNORM,
    vk::Format::R8G8B8_UNORM,
];

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    // A lone UNDEFINED entry means the surface takes anything
    if let [only] = formats {
        if only.format == vk::Format::UNDEFINED {
            return Some(vk::SurfaceFormatKHR {
                format: PREFERRED_FORMATS[0],
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            });
        }
    }

    PREFERRED_FORMATS
        .iter()
        .find_map(|&wanted| {
            formats
                .iter()
                .find(|f| f.format == wanted && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        })
        .or_else(|| formats.first())
        .copied()
}

/// The configured mode if the surface supports it, otherwise FIFO (always available).
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Frames in flight requested for a present mode: three for mailbox, two otherwise.
pub fn frames_in_flight(present_mode: vk::PresentModeKHR) -> u32 {
    if present_mode == vk::PresentModeKHR::MAILBOX {
        3
    } else {
        2
    }
}

pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR, present_mode: vk::PresentModeKHR) -> u32 {
    let mut count = frames_in_flight(present_mode).max(caps.min_image_count);
    if caps.max_image_count > 0 {
        count = count.min(caps.max_image_count);
    }
    count
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, requested: Extent) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: requested
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: requested
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn preferred_unorm_format_wins() {
        let formats = [
            format(vk::Format::B8G8R8A8_SRGB),
            format(vk::Format::R8G8B8A8_UNORM),
            format(vk::Format::B8G8R8A8_UNORM),
        ];
        assert_eq!(choose_surface_format(&formats).unwrap().format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn unknown_formats_fall_back_to_first() {
        let formats = [format(vk::Format::A2B10G10R10_UNORM_PACK32), format(vk::Format::B8G8R8A8_SRGB)];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::A2B10G10R10_UNORM_PACK32
        );
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn undefined_format_means_free_choice() {
        let chosen = choose_surface_format(&[format(vk::Format::UNDEFINED)]).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn unsupported_present_mode_falls_back_to_fifo() {
        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&available, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&available, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::IMMEDIATE
        );
    }

    #[test]
    fn mailbox_gets_three_images_fifo_two() {
        assert_eq!(choose_image_count(&caps(2, 8), vk::PresentModeKHR::MAILBOX), 3);
        assert_eq!(choose_image_count(&caps(2, 8), vk::PresentModeKHR::FIFO), 2);
    }

    #[test]
    fn image_count_respects_surface_limits() {
        // Driver demands more than we want
        assert_eq!(choose_image_count(&caps(4, 0), vk::PresentModeKHR::FIFO), 4);
        // Driver caps below what we want
        assert_eq!(choose_image_count(&caps(1, 2), vk::PresentModeKHR::MAILBOX), 2);
    }

    #[test]
    fn extent_follows_surface_when_fixed() {
        let mut fixed = caps(2, 3);
        fixed.current_extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        let chosen = choose_extent(&fixed, Extent::new(800, 600));
        assert_eq!((chosen.width, chosen.height), (640, 480));

        let chosen = choose_extent(&caps(2, 3), Extent::new(9000, 600));
        assert_eq!((chosen.width, chosen.height), (4096, 600));
    }

    #[test]
    fn timeout_saturates() {
        assert_eq!(timeout_ns(Duration::from_millis(5)), 5_000_000);
        assert_eq!(timeout_ns(Duration::MAX), u64::MAX);
    }
}
