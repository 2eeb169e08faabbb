// Swapchain-dependent resources
//
// Everything whose shape depends on the surface extent, the swapchain image
// count or the recording thread count lives here and is rebuilt as one unit:
// swapchain and views, depth image, render passes, framebuffers, pipelines,
// command pools, the per-slot sync objects and GUI mesh buffers.

use anyhow::{Context, Result};
use ash::vk;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::commands::CommandPools;
use super::gui::OverlayMesh;
use super::pipeline;
use super::shader::{ShaderPair, OVERLAY_SHADERS, SCENE_SHADERS};
use super::swapchain::{timeout_ns, Swapchain};
use super::sync::FrameSync;
use super::texture::GpuImage;
use super::VulkanDevice;
use crate::error::{FrameError, FrameResult};
use crate::frame::{segment_count, AcquiredImage, FrameParams, SlotSync, SwapchainResources};

/// Device-level inputs that stay fixed across rebuilds.
pub struct ResourceTemplate<'a> {
    pub present_mode: vk::PresentModeKHR,
    pub depth_format: vk::Format,
    pub set_layout: vk::DescriptorSetLayout,
    pub overlay_set_layout: vk::DescriptorSetLayout,
    pub resource_path: &'a Path,
}

pub struct FrameResources {
    params: FrameParams,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    /// Clears color before the scene.
    pub render_pass: vk::RenderPass,
    /// Keeps the previous color. Compatible with `render_pass`.
    pub render_pass_no_clear: vk::RenderPass,
    pub overlay_pass: vk::RenderPass,
    pub overlay_pipeline: vk::Pipeline,
    pub overlay_pipeline_layout: vk::PipelineLayout,
    pub commands: CommandPools,
    pub sync: Vec<FrameSync>,
    /// One per slot.
    pub overlay_meshes: Vec<OverlayMesh>,
    pub depth: GpuImage,
    pub swapchain: Swapchain,
    device: Arc<VulkanDevice>,
}

impl FrameResources {
    pub fn new(device: &Arc<VulkanDevice>, params: &FrameParams, template: &ResourceTemplate) -> Result<Self> {
        let swapchain = Swapchain::new(device.clone(), params.extent, template.present_mode)?;
        let depth = GpuImage::depth(device, swapchain.extent, template.depth_format)?;

        let slots = swapchain.image_count();
        let workers = 1 + segment_count(params.thread_count);
        let commands = CommandPools::new(&device.device, device.graphics_queue_family, slots, workers)?;

        // Null handles are valid to destroy, so Drop can clean up a partial build
        let mut this = Self {
            params: FrameParams {
                extent: swapchain.frame_extent(),
                thread_count: params.thread_count,
            },
            framebuffers: Vec::new(),
            pipeline: vk::Pipeline::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            render_pass: vk::RenderPass::null(),
            render_pass_no_clear: vk::RenderPass::null(),
            overlay_pass: vk::RenderPass::null(),
            overlay_pipeline: vk::Pipeline::null(),
            overlay_pipeline_layout: vk::PipelineLayout::null(),
            commands,
            sync: Vec::new(),
            overlay_meshes: (0..slots).map(|_| OverlayMesh::default()).collect(),
            depth,
            swapchain,
            device: device.clone(),
        };

        let color_format = this.swapchain.format;
        this.render_pass = pipeline::create_render_pass(device, color_format, template.depth_format, true)?;
        this.render_pass_no_clear = pipeline::create_render_pass(device, color_format, template.depth_format, false)?;
        this.overlay_pass = pipeline::create_overlay_pass(device, color_format, template.depth_format)?;
        this.framebuffers = pipeline::create_framebuffers(
            device,
            &this.swapchain.image_views,
            this.depth.view,
            this.render_pass,
            this.swapchain.extent,
        )?;

        this.pipeline_layout = pipeline::create_pipeline_layout(device, template.set_layout)?;
        let shaders = ShaderPair::load(device, template.resource_path, SCENE_SHADERS)?;
        this.pipeline = pipeline::create_graphics_pipeline(
            device,
            this.render_pass,
            this.pipeline_layout,
            shaders.vert,
            shaders.frag,
        )?;
        drop(shaders);

        this.overlay_pipeline_layout = pipeline::create_overlay_pipeline_layout(device, template.overlay_set_layout)?;
        let shaders = ShaderPair::load(device, template.resource_path, OVERLAY_SHADERS)?;
        this.overlay_pipeline = pipeline::create_overlay_pipeline(
            device,
            this.overlay_pass,
            this.overlay_pipeline_layout,
            shaders.vert,
            shaders.frag,
        )?;
        drop(shaders);

        for _ in 0..slots {
            let sync = FrameSync::new(&device.device).context("Failed to create frame sync objects")?;
            this.sync.push(sync);
        }

        log::info!(
            "Frame resources ready: {} slots, {} recording segments, {}",
            slots,
            workers - 1,
            this.params.extent
        );
        Ok(this)
    }

    pub fn sync(&self, index: usize) -> FrameResult<&FrameSync> {
        self.sync.get(index).ok_or(FrameError::SlotOutOfRange {
            index,
            count: self.sync.len(),
        })
    }
}

impl SlotSync for FrameResources {
    fn slot_count(&self) -> usize {
        self.swapchain.image_count()
    }

    fn acquire_image(&self, semaphore_slot: usize, timeout: Duration) -> FrameResult<AcquiredImage> {
        let semaphore = self.sync(semaphore_slot)?.image_acquired;
        let (index, suboptimal) = self.swapchain.acquire_next_image(semaphore, timeout)?;
        Ok(AcquiredImage {
            index: index as usize,
            suboptimal,
        })
    }

    fn wait_fence(&self, slot: usize, timeout: Duration) -> FrameResult<()> {
        let fence = self.sync(slot)?.fence;
        match unsafe { self.device.device.wait_for_fences(&[fence], true, timeout_ns(timeout)) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(FrameError::FenceTimeout { slot, timeout }),
            Err(e) => Err(FrameError::from_vk(e)),
        }
    }

    fn reset_fence(&self, slot: usize) -> FrameResult<()> {
        let fence = self.sync(slot)?.fence;
        unsafe { self.device.device.reset_fences(&[fence]) }.map_err(FrameError::from_vk)
    }
}

impl SwapchainResources for FrameResources {
    fn params(&self) -> FrameParams {
        self.params
    }
}

impl Drop for FrameResources {
    fn drop(&mut self) {
        let device = &self.device.device;
        unsafe {
            for &framebuffer in &self.framebuffers {
                device.destroy_framebuffer(framebuffer, None);
            }
            device.destroy_pipeline(self.overlay_pipeline, None);
            device.destroy_pipeline_layout(self.overlay_pipeline_layout, None);
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            device.destroy_render_pass(self.overlay_pass, None);
            device.destroy_render_pass(self.render_pass_no_clear, None);
            device.destroy_render_pass(self.render_pass, None);
        }
        self.commands.destroy(device);
        for sync in &self.sync {
            sync.destroy(device);
        }
        // depth, swapchain and overlay meshes release themselves
    }
}
