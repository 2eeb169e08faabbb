// =============================================================================
// VULKAN BACKEND - FrameBackend over the device
// =============================================================================
//
// Owns the device-level objects that survive swapchain rebuilds (geometry,
// textures, uniform buffer, descriptor sets, shader watcher) and builds a fresh
// `FrameResources` whenever the frame driver asks for one.

use anyhow::{bail, Context, Result};
use ash::vk;
use egui::TexturesDelta;
use gpu_allocator::MemoryLocation;
use std::path::PathBuf;
use std::sync::Arc;

use super::buffer::GpuBuffer;
use super::descriptor::SceneDescriptors;
use super::gui::{OverlayBatch, OverlayTextures};
use super::record::{record_primary, DrawSegments, GuiDraws, PrimaryPass};
use super::resources::{FrameResources, ResourceTemplate};
use super::shader::{spirv_dir, ShaderWatcher};
use super::swapchain::choose_present_mode;
use super::texture::{find_depth_format, Texture};
use super::VulkanDevice;
use crate::error::{FrameError, FrameResult};
use crate::frame::{record_segments, Acquired, FrameBackend, FrameParams, FrameView};
use crate::scene::uniforms::aligned_stride;
use crate::scene::{InstanceGrid, Mesh, UniformArray, UniformBufferObject};

/// Scene and presentation choices made once at startup.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub resource_path: PathBuf,
    /// Texture path relative to `resource_path`.
    pub texture: String,
    /// Optional OBJ model relative to `resource_path`.
    pub model: Option<String>,
    pub grid: InstanceGrid,
    pub present_mode: vk::PresentModeKHR,
    pub hot_reload_shaders: bool,
}

pub struct VulkanBackend {
    shader_watcher: Option<ShaderWatcher>,
    overlay_textures: OverlayTextures,
    descriptors: SceneDescriptors,
    texture: Texture,
    uniforms: GpuBuffer,
    index_buffer: GpuBuffer,
    vertex_buffer: GpuBuffer,
    index_count: u32,
    uniform_stride: usize,
    grid: InstanceGrid,
    present_mode: vk::PresentModeKHR,
    depth_format: vk::Format,
    resource_path: PathBuf,
    device: Arc<VulkanDevice>,
}

impl VulkanBackend {
    pub fn new(device: Arc<VulkanDevice>, settings: &BackendSettings) -> Result<Self> {
        let present_mode = choose_present_mode(&device.present_modes()?, settings.present_mode);
        if present_mode != settings.present_mode {
            log::warn!(
                "Present mode {:?} not supported, using {:?}",
                settings.present_mode,
                present_mode
            );
        }
        let depth_format = find_depth_format(&device)?;
        log::info!("Depth format: {:?}", depth_format);

        let mesh = match &settings.model {
            Some(model) => Mesh::load(&settings.resource_path.join(model))?,
            None => Mesh::quad(),
        };
        if mesh.indices.is_empty() {
            bail!("Mesh has no triangles");
        }

        let vertex_buffer = GpuBuffer::device_local(
            &device,
            "vertices",
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(&mesh.vertices),
        )?;
        let index_buffer = GpuBuffer::device_local(
            &device,
            "indices",
            vk::BufferUsageFlags::INDEX_BUFFER,
            bytemuck::cast_slice(&mesh.indices),
        )?;

        let texture = Texture::load(&device, &settings.resource_path.join(&settings.texture))?;

        let uniform_stride = aligned_stride(
            std::mem::size_of::<UniformBufferObject>(),
            device.uniform_alignment(),
        );
        let uniforms = GpuBuffer::new(
            &device,
            "uniforms",
            (uniform_stride * settings.grid.count()) as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
        )?;

        let descriptors = SceneDescriptors::new(&device, &uniforms, &texture)?;
        let overlay_textures = OverlayTextures::new(&device)?;

        let shader_watcher = if settings.hot_reload_shaders {
            match ShaderWatcher::new(&spirv_dir(&settings.resource_path)) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    log::warn!("Shader hot reload disabled: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        log::info!(
            "Scene: {} vertices, {} indices, {}x{} instances",
            mesh.vertices.len(),
            mesh.indices.len(),
            settings.grid.nx,
            settings.grid.ny
        );

        Ok(Self {
            shader_watcher,
            overlay_textures,
            descriptors,
            texture,
            uniforms,
            index_buffer,
            vertex_buffer,
            index_count: mesh.index_count(),
            uniform_stride,
            grid: settings.grid,
            present_mode,
            depth_format,
            resource_path: settings.resource_path.clone(),
            device,
        })
    }

    pub fn device(&self) -> &Arc<VulkanDevice> {
        &self.device
    }

    /// Present mode negotiated at startup.
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }
}

impl FrameBackend for VulkanBackend {
    type Resources = FrameResources;

    fn create_resources(&mut self, params: &FrameParams) -> Result<FrameResources> {
        let template = ResourceTemplate {
            present_mode: self.present_mode,
            depth_format: self.depth_format,
            set_layout: self.descriptors.layout,
            overlay_set_layout: self.overlay_textures.layout,
            resource_path: &self.resource_path,
        };
        FrameResources::new(&self.device, params, &template)
    }

    fn destroy_resources(&mut self, resources: FrameResources) {
        drop(resources);
    }

    fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }

    fn instance_grid(&self) -> InstanceGrid {
        self.grid
    }

    fn uniform_alignment(&self) -> usize {
        self.device.uniform_alignment()
    }

    fn upload_uniforms(&mut self, uniforms: &UniformArray) -> Result<()> {
        self.uniforms
            .write(0, uniforms.as_bytes())
            .context("Failed to upload uniforms")
    }

    fn update_overlay_textures(&mut self, delta: &TexturesDelta) -> Result<()> {
        self.overlay_textures.update(delta)
    }

    fn record(&self, resources: &mut FrameResources, frame: &Acquired, view: &FrameView) -> Result<()> {
        let extent = resources.swapchain.extent;

        // The slot's fence has been waited on, so its GUI buffers are free
        let gui_batch = match view.overlay {
            Some(overlay) => {
                let batch = OverlayBatch::build(&overlay.primitives, overlay.pixels_per_point, extent);
                if !batch.is_empty() {
                    resources
                        .overlay_meshes
                        .get_mut(frame.slot)
                        .context("No overlay mesh for frame slot")?
                        .upload(&self.device, &batch)
                        .context("Failed to upload overlay geometry")?;
                }
                Some((batch, overlay.pixels_per_point))
            }
            None => None,
        };

        let device = &self.device.device;
        let commands = &resources.commands;
        commands.reset_slot(device, frame.slot)?;

        let framebuffer = *resources
            .framebuffers
            .get(frame.slot)
            .context("No framebuffer for frame slot")?;
        let render_pass = if view.clear_color.is_some() {
            resources.render_pass
        } else {
            resources.render_pass_no_clear
        };

        let segments = DrawSegments {
            device,
            render_pass,
            framebuffer,
            pipeline: resources.pipeline,
            pipeline_layout: resources.pipeline_layout,
            descriptor_set: self.descriptors.set,
            vertex_buffer: self.vertex_buffer.buffer,
            index_buffer: self.index_buffer.buffer,
            index_count: self.index_count,
            uniform_stride: self.uniform_stride,
            grid: self.grid,
            extent: resources.swapchain.frame_extent(),
        };
        let executed = record_segments(&segments, commands.secondaries(frame.slot), self.grid.count())?;

        let gui = match (&gui_batch, resources.overlay_meshes.get(frame.slot)) {
            (Some((batch, pixels_per_point)), Some(mesh)) if !batch.is_empty() => {
                let (vertex_buffer, index_buffer) = mesh.buffers().context("Overlay mesh was not uploaded")?;
                Some(GuiDraws {
                    pipeline: resources.overlay_pipeline,
                    layout: resources.overlay_pipeline_layout,
                    vertex_buffer,
                    index_buffer,
                    draws: &batch.draws,
                    textures: &self.overlay_textures,
                    screen_size: [
                        extent.width as f32 / pixels_per_point,
                        extent.height as f32 / pixels_per_point,
                    ],
                })
            }
            _ => None,
        };

        let pass = PrimaryPass {
            render_pass,
            overlay_pass: resources.overlay_pass,
            framebuffer,
            extent,
            clear_color: view.clear_color.unwrap_or_default(),
            secondaries: &executed,
            gui,
        };
        record_primary(device, commands.primary(frame.slot), &pass)
    }

    fn submit(&self, resources: &FrameResources, frame: &Acquired) -> FrameResult<()> {
        let image_acquired = resources.sync(frame.acquire_semaphore)?.image_acquired;
        let slot = resources.sync(frame.slot)?;
        let wait_semaphores = [image_acquired];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [resources.commands.primary(frame.slot)];
        let signal_semaphores = [slot.render_complete];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .device
                .queue_submit(self.device.graphics_queue, &[submit_info], slot.fence)
        }
        .map_err(FrameError::from_vk)
    }

    fn present(&self, resources: &FrameResources, frame: &Acquired) -> FrameResult<bool> {
        let render_complete = resources.sync(frame.slot)?.render_complete;
        resources
            .swapchain
            .present(frame.slot as u32, render_complete)
    }

    fn poll_shader_reload(&mut self) -> bool {
        let changed = self
            .shader_watcher
            .as_ref()
            .is_some_and(ShaderWatcher::take_changed);
        if changed {
            log::info!("Shaders changed, rebuilding pipelines");
        }
        changed
    }
}
