// Images: depth targets and sampled textures
//
// Depth images belong to the swapchain-dependent set and are recreated with
// it. The texture is device-level and uploaded once through a staging buffer.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::path::Path;
use std::sync::Arc;

use super::buffer::GpuBuffer;
use super::VulkanDevice;

/// Depth formats in order of preference.
pub const DEPTH_FORMATS: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

pub fn pick_depth_format(supports: impl Fn(vk::Format) -> bool) -> Option<vk::Format> {
    DEPTH_FORMATS.iter().copied().find(|&format| supports(format))
}

pub fn find_depth_format(device: &VulkanDevice) -> Result<vk::Format> {
    pick_depth_format(|format| {
        let props = unsafe {
            device
                .instance
                .get_physical_device_format_properties(device.physical_device, format)
        };
        props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
    .context("No supported depth format")
}

pub struct GpuImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl GpuImage {
    pub fn new(
        device: &Arc<VulkanDevice>,
        name: &str,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> Result<Self> {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.device.create_image(&image_info, None) }
            .with_context(|| format!("Failed to create image '{}'", name))?;
        let requirements = unsafe { device.device.get_image_memory_requirements(image) };

        let allocation = device.allocator.lock().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_image(image, None) };
                return Err(e).with_context(|| format!("Failed to allocate memory for '{}'", name));
            }
        };

        let (memory, offset) = (unsafe { allocation.memory() }, allocation.offset());
        let mut this = Self {
            image,
            view: vk::ImageView::null(),
            format,
            extent,
            allocation: Some(allocation),
            device: device.clone(),
        };
        unsafe { device.device.bind_image_memory(image, memory, offset) }
            .with_context(|| format!("Failed to bind memory for '{}'", name))?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(subresource_range(aspect));
        this.view = unsafe { device.device.create_image_view(&view_info, None) }
            .with_context(|| format!("Failed to create view for '{}'", name))?;

        Ok(this)
    }

    pub fn depth(device: &Arc<VulkanDevice>, extent: vk::Extent2D, format: vk::Format) -> Result<Self> {
        Self::new(
            device,
            "depth",
            extent,
            format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
        )
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.device.destroy_image_view(self.view, None);
            }
            self.device.device.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator.lock().free(allocation) {
                log::error!("Failed to free image memory: {}", e);
            }
        }
    }
}

fn subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Stage and access that must finish before an image in `layout` is overwritten.
fn prior_use(layout: vk::ImageLayout) -> (vk::PipelineStageFlags, vk::AccessFlags) {
    if layout == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL {
        (vk::PipelineStageFlags::FRAGMENT_SHADER, vk::AccessFlags::SHADER_READ)
    } else {
        (vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::empty())
    }
}

fn rgba_len(size: vk::Extent2D) -> usize {
    size.width as usize * size.height as usize * 4
}

/// Copy tightly packed RGBA8 `pixels` into the `size` region of `image` at
/// `offset`, leaving the image in SHADER_READ_ONLY_OPTIMAL.
///
/// `old_layout` is UNDEFINED for a fresh image, which discards its contents,
/// or SHADER_READ_ONLY_OPTIMAL for a partial update that keeps them.
pub fn upload_rgba(
    device: &Arc<VulkanDevice>,
    image: &GpuImage,
    pixels: &[u8],
    offset: vk::Offset2D,
    size: vk::Extent2D,
    old_layout: vk::ImageLayout,
) -> Result<()> {
    anyhow::ensure!(
        pixels.len() == rgba_len(size),
        "Expected {} bytes for a {}x{} RGBA region, got {}",
        rgba_len(size),
        size.width,
        size.height,
        pixels.len()
    );
    let staging = GpuBuffer::with_data(device, "image staging", vk::BufferUsageFlags::TRANSFER_SRC, pixels)?;
    let (src_stage, src_access) = prior_use(old_layout);

    device.one_time_submit(|cmd| unsafe {
        let to_transfer = vk::ImageMemoryBarrier::default()
            .old_layout(old_layout)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image.image)
            .subresource_range(subresource_range(vk::ImageAspectFlags::COLOR))
            .src_access_mask(src_access)
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE);
        device.device.cmd_pipeline_barrier(
            cmd,
            src_stage,
            vk::PipelineStageFlags::TRANSFER,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[to_transfer],
        );

        let region = vk::BufferImageCopy::default()
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D {
                x: offset.x,
                y: offset.y,
                z: 0,
            })
            .image_extent(vk::Extent3D {
                width: size.width,
                height: size.height,
                depth: 1,
            });
        device.device.cmd_copy_buffer_to_image(
            cmd,
            staging.buffer,
            image.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );

        let to_shader = vk::ImageMemoryBarrier::default()
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image.image)
            .subresource_range(subresource_range(vk::ImageAspectFlags::COLOR))
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ);
        device.device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[to_shader],
        );
    })
}

/// Sampled RGBA texture.
pub struct Texture {
    pub image: GpuImage,
    pub sampler: vk::Sampler,
}

impl Texture {
    pub fn load(device: &Arc<VulkanDevice>, path: &Path) -> Result<Self> {
        let decoded = image::open(path)
            .with_context(|| format!("Failed to load texture {:?}", path))?
            .into_rgba8();
        let (width, height) = decoded.dimensions();
        log::info!("Loaded texture {:?} ({}x{})", path, width, height);

        let extent = vk::Extent2D { width, height };
        let image = GpuImage::new(
            device,
            "texture",
            extent,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            vk::ImageAspectFlags::COLOR,
        )?;
        upload_rgba(
            device,
            &image,
            decoded.as_raw(),
            vk::Offset2D::default(),
            extent,
            vk::ImageLayout::UNDEFINED,
        )?;

        let mut sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .max_lod(1.0);
        if device.anisotropy {
            sampler_info = sampler_info
                .anisotropy_enable(true)
                .max_anisotropy(device.properties.limits.max_sampler_anisotropy);
        }
        let sampler = unsafe { device.device.create_sampler(&sampler_info, None) }
            .context("Failed to create texture sampler")?;

        Ok(Self { image, sampler })
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            self.image
                .device
                .device
                .destroy_sampler(self.sampler, None)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_format_prefers_pure_float() {
        assert_eq!(pick_depth_format(|_| true), Some(vk::Format::D32_SFLOAT));
    }

    #[test]
    fn depth_format_falls_through_the_list() {
        let only_d24 = |f| f == vk::Format::D24_UNORM_S8_UINT;
        assert_eq!(pick_depth_format(only_d24), Some(vk::Format::D24_UNORM_S8_UINT));
        assert_eq!(pick_depth_format(|_| false), None);
    }

    #[test]
    fn partial_updates_wait_for_fragment_reads() {
        assert_eq!(
            prior_use(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            (vk::PipelineStageFlags::FRAGMENT_SHADER, vk::AccessFlags::SHADER_READ)
        );
        assert_eq!(
            prior_use(vk::ImageLayout::UNDEFINED),
            (vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::empty())
        );
    }

    #[test]
    fn rgba_regions_are_four_bytes_per_texel() {
        assert_eq!(rgba_len(vk::Extent2D { width: 3, height: 2 }), 24);
        assert_eq!(rgba_len(vk::Extent2D { width: 0, height: 7 }), 0);
    }
}
