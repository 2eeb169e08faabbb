// Overlay GUI rendering
//
// Textures (the font atlas and anything the GUI registers) are device-level
// and change rarely. Vertex and index data is rewritten every frame into
// buffers owned by the frame slot, so a slot's buffers are only touched after
// its fence wait.

use anyhow::{bail, Context, Result};
use ash::vk;
use egui::epaint::{ClippedPrimitive, ImageData, ImageDelta, Primitive, Vertex};
use egui::{TextureId, TexturesDelta};
use gpu_allocator::MemoryLocation;
use std::collections::HashMap;
use std::sync::Arc;

use super::buffer::GpuBuffer;
use super::texture::{upload_rgba, GpuImage};
use super::VulkanDevice;

/// Descriptor sets available to GUI textures at once.
const MAX_TEXTURES: u32 = 64;
/// Smallest mesh buffer, in bytes.
const MIN_MESH_BYTES: usize = 64 * 1024;

struct OverlayTexture {
    image: GpuImage,
    set: vk::DescriptorSet,
}

/// Sampled images the GUI refers to by `TextureId`.
pub struct OverlayTextures {
    pub layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    sampler: vk::Sampler,
    textures: HashMap<TextureId, OverlayTexture>,
    /// Freed by the GUI last update; still referenced by frames in flight then.
    pending_free: Vec<TextureId>,
    device: Arc<VulkanDevice>,
}

impl OverlayTextures {
    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self> {
        // Null handles are valid to destroy, so Drop can clean up a partial build
        let mut this = Self {
            layout: vk::DescriptorSetLayout::null(),
            pool: vk::DescriptorPool::null(),
            sampler: vk::Sampler::null(),
            textures: HashMap::new(),
            pending_free: Vec::new(),
            device: device.clone(),
        };

        let bindings = [vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)];
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        this.layout = unsafe { device.device.create_descriptor_set_layout(&layout_info, None) }
            .context("Failed to create overlay descriptor set layout")?;

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: MAX_TEXTURES,
        }];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .pool_sizes(&pool_sizes)
            .max_sets(MAX_TEXTURES);
        this.pool = unsafe { device.device.create_descriptor_pool(&pool_info, None) }
            .context("Failed to create overlay descriptor pool")?;

        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .max_lod(1.0);
        this.sampler = unsafe { device.device.create_sampler(&sampler_info, None) }
            .context("Failed to create overlay sampler")?;

        Ok(this)
    }

    /// Descriptor set for `id`, if the GUI has uploaded it.
    pub fn set(&self, id: TextureId) -> Option<vk::DescriptorSet> {
        self.textures.get(&id).map(|texture| texture.set)
    }

    /// Apply one batch of GUI texture changes.
    ///
    /// Frees requested by `delta` are held until the next call, since the
    /// frame that still draws with them may not have been recorded yet.
    pub fn update(&mut self, delta: &TexturesDelta) -> Result<()> {
        if delta.is_empty() && self.pending_free.is_empty() {
            return Ok(());
        }
        // Images below may still be sampled by frames in flight
        self.device.wait_idle()?;

        for id in std::mem::take(&mut self.pending_free) {
            if let Some(texture) = self.textures.remove(&id) {
                self.release(texture);
            }
        }
        for (id, image_delta) in &delta.set {
            self.apply(*id, image_delta)
                .with_context(|| format!("Failed to update overlay texture {:?}", id))?;
        }
        self.pending_free.extend(delta.free.iter().copied());
        Ok(())
    }

    fn apply(&mut self, id: TextureId, delta: &ImageDelta) -> Result<()> {
        let [width, height] = delta.image.size();
        let size = vk::Extent2D {
            width: width as u32,
            height: height as u32,
        };
        let pixels = rgba_bytes(&delta.image);

        if let Some([x, y]) = delta.pos {
            let texture = self
                .textures
                .get(&id)
                .context("partial update of a texture that was never uploaded")?;
            let offset = vk::Offset2D {
                x: x as i32,
                y: y as i32,
            };
            return upload_rgba(
                &self.device,
                &texture.image,
                &pixels,
                offset,
                size,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
        }

        let image = GpuImage::new(
            &self.device,
            "overlay texture",
            size,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            vk::ImageAspectFlags::COLOR,
        )?;
        upload_rgba(
            &self.device,
            &image,
            &pixels,
            vk::Offset2D::default(),
            size,
            vk::ImageLayout::UNDEFINED,
        )?;
        let set = self.allocate_set(image.view)?;
        log::debug!("Overlay texture {:?} uploaded ({}x{})", id, width, height);
        if let Some(old) = self.textures.insert(id, OverlayTexture { image, set }) {
            self.release(old);
        }
        Ok(())
    }

    fn allocate_set(&self, view: vk::ImageView) -> Result<vk::DescriptorSet> {
        let layouts = [self.layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);
        let set = unsafe { self.device.device.allocate_descriptor_sets(&alloc_info) }
            .context("Overlay descriptor pool exhausted")?[0];

        let image_info = [vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info);
        unsafe { self.device.device.update_descriptor_sets(&[write], &[]) };
        Ok(set)
    }

    fn release(&self, texture: OverlayTexture) {
        if let Err(e) = unsafe { self.device.device.free_descriptor_sets(self.pool, &[texture.set]) } {
            log::error!("Failed to free overlay descriptor set: {}", e);
        }
        // image releases itself
    }
}

impl Drop for OverlayTextures {
    fn drop(&mut self) {
        // Images go before the pool and sampler their sets point at
        self.textures.clear();
        unsafe {
            self.device.device.destroy_descriptor_pool(self.pool, None);
            self.device.device.destroy_sampler(self.sampler, None);
            self.device
                .device
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Tightly packed RGBA8 bytes of a GUI image.
fn rgba_bytes(image: &ImageData) -> Vec<u8> {
    match image {
        ImageData::Color(image) => image.pixels.iter().flat_map(|c| c.to_array()).collect(),
        ImageData::Font(image) => image.srgba_pixels(None).flat_map(|c| c.to_array()).collect(),
    }
}

/// One indexed draw of the merged overlay mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayDraw {
    pub texture: TextureId,
    pub scissor: vk::Rect2D,
    pub first_index: u32,
    pub index_count: u32,
    pub vertex_offset: i32,
}

/// Every GUI mesh of a frame merged into one vertex and one index stream.
#[derive(Debug, Default)]
pub struct OverlayBatch {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub draws: Vec<OverlayDraw>,
}

impl OverlayBatch {
    /// Merge `primitives` for a framebuffer of `extent` pixels.
    ///
    /// Clip rectangles arrive in points and leave as pixel scissors clamped to
    /// the framebuffer; meshes clipped away entirely are dropped.
    pub fn build(primitives: &[ClippedPrimitive], pixels_per_point: f32, extent: vk::Extent2D) -> Self {
        let mut batch = Self::default();
        for primitive in primitives {
            let mesh = match &primitive.primitive {
                Primitive::Mesh(mesh) => mesh,
                Primitive::Callback(_) => {
                    log::debug!("Skipping overlay paint callback");
                    continue;
                }
            };
            if mesh.indices.is_empty() {
                continue;
            }
            let Some(scissor) = scissor_for(primitive.clip_rect, pixels_per_point, extent) else {
                continue;
            };

            batch.draws.push(OverlayDraw {
                texture: mesh.texture_id,
                scissor,
                first_index: batch.indices.len() as u32,
                index_count: mesh.indices.len() as u32,
                vertex_offset: batch.vertices.len() as i32,
            });
            batch.vertices.extend_from_slice(&mesh.vertices);
            batch.indices.extend_from_slice(&mesh.indices);
        }
        batch
    }

    pub fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }
}

fn scissor_for(clip: egui::Rect, pixels_per_point: f32, extent: vk::Extent2D) -> Option<vk::Rect2D> {
    let to_px = |v: f32, max: u32| (v * pixels_per_point).round().clamp(0.0, max as f32) as u32;
    let (x0, y0) = (to_px(clip.min.x, extent.width), to_px(clip.min.y, extent.height));
    let (x1, y1) = (to_px(clip.max.x, extent.width), to_px(clip.max.y, extent.height));
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(vk::Rect2D {
        offset: vk::Offset2D {
            x: x0 as i32,
            y: y0 as i32,
        },
        extent: vk::Extent2D {
            width: x1 - x0,
            height: y1 - y0,
        },
    })
}

/// Host-visible vertex and index buffers for one frame slot.
#[derive(Default)]
pub struct OverlayMesh {
    vertices: Option<GpuBuffer>,
    indices: Option<GpuBuffer>,
}

impl OverlayMesh {
    /// Copy `batch` in, growing either buffer when it is too small.
    pub fn upload(&mut self, device: &Arc<VulkanDevice>, batch: &OverlayBatch) -> Result<()> {
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&batch.vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(&batch.indices);
        write_growing(
            device,
            &mut self.vertices,
            "overlay vertices",
            vk::BufferUsageFlags::VERTEX_BUFFER,
            vertex_bytes,
        )?;
        write_growing(
            device,
            &mut self.indices,
            "overlay indices",
            vk::BufferUsageFlags::INDEX_BUFFER,
            index_bytes,
        )
    }

    /// `(vertex, index)` buffers, once something has been uploaded.
    pub fn buffers(&self) -> Option<(vk::Buffer, vk::Buffer)> {
        Some((self.vertices.as_ref()?.buffer, self.indices.as_ref()?.buffer))
    }
}

/// Capacity for `len` bytes: a power of two, at least `MIN_MESH_BYTES`.
fn mesh_capacity(len: usize) -> usize {
    len.max(MIN_MESH_BYTES).next_power_of_two()
}

fn write_growing(
    device: &Arc<VulkanDevice>,
    slot: &mut Option<GpuBuffer>,
    name: &str,
    usage: vk::BufferUsageFlags,
    bytes: &[u8],
) -> Result<()> {
    let fits = slot
        .as_ref()
        .is_some_and(|buffer| buffer.size as usize >= bytes.len());
    if !fits {
        let capacity = mesh_capacity(bytes.len());
        log::debug!("Growing {} to {} bytes", name, capacity);
        *slot = Some(GpuBuffer::new(
            device,
            name,
            capacity as vk::DeviceSize,
            usage,
            MemoryLocation::CpuToGpu,
        )?);
    }
    match slot.as_mut() {
        Some(buffer) => buffer.write(0, bytes),
        None => bail!("{} missing after allocation", name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use egui::epaint::Mesh;
    use egui::{pos2, Color32, Rect};

    fn triangle(texture: TextureId) -> Mesh {
        let mut mesh = Mesh::with_texture(texture);
        mesh.colored_vertex(pos2(0.0, 0.0), Color32::WHITE);
        mesh.colored_vertex(pos2(10.0, 0.0), Color32::WHITE);
        mesh.colored_vertex(pos2(0.0, 10.0), Color32::WHITE);
        mesh.add_triangle(0, 1, 2);
        mesh
    }

    fn clipped(clip_rect: Rect, mesh: Mesh) -> ClippedPrimitive {
        ClippedPrimitive {
            clip_rect,
            primitive: Primitive::Mesh(mesh),
        }
    }

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 800,
        height: 600,
    };

    #[test]
    fn meshes_are_merged_with_running_offsets() {
        let clip = Rect::from_min_max(pos2(0.0, 0.0), pos2(100.0, 100.0));
        let user = TextureId::User(7);
        let primitives = [
            clipped(clip, triangle(TextureId::default())),
            clipped(clip, triangle(user)),
        ];

        let batch = OverlayBatch::build(&primitives, 1.0, EXTENT);
        assert_eq!(batch.vertices.len(), 6);
        assert_eq!(batch.indices, vec![0, 1, 2, 0, 1, 2]);
        assert_eq!(batch.draws.len(), 2);
        assert_eq!(batch.draws[1].first_index, 3);
        assert_eq!(batch.draws[1].vertex_offset, 3);
        assert_eq!(batch.draws[1].index_count, 3);
        assert_eq!(batch.draws[1].texture, user);
    }

    #[test]
    fn clip_rects_scale_to_pixels_and_stay_inside_the_framebuffer() {
        let clip = Rect::from_min_max(pos2(10.0, 10.0), pos2(2000.0, 30.0));
        let batch = OverlayBatch::build(&[clipped(clip, triangle(TextureId::default()))], 2.0, EXTENT);

        let scissor = batch.draws[0].scissor;
        assert_eq!((scissor.offset.x, scissor.offset.y), (20, 20));
        assert_eq!((scissor.extent.width, scissor.extent.height), (780, 40));
    }

    #[test]
    fn empty_and_fully_clipped_meshes_are_dropped() {
        let outside = Rect::from_min_max(pos2(900.0, 0.0), pos2(950.0, 50.0));
        let inside = Rect::from_min_max(pos2(0.0, 0.0), pos2(50.0, 50.0));
        let primitives = [
            clipped(outside, triangle(TextureId::default())),
            clipped(inside, Mesh::default()),
        ];

        let batch = OverlayBatch::build(&primitives, 1.0, EXTENT);
        assert!(batch.is_empty());
        assert!(batch.vertices.is_empty());
    }

    #[test]
    fn vertices_upload_as_twenty_byte_records() {
        let batch = OverlayBatch::build(
            &[clipped(
                Rect::from_min_max(pos2(0.0, 0.0), pos2(10.0, 10.0)),
                triangle(TextureId::default()),
            )],
            1.0,
            EXTENT,
        );
        let bytes: &[u8] = bytemuck::cast_slice(&batch.vertices);
        assert_eq!(bytes.len(), 3 * 20);
    }

    #[test]
    fn mesh_buffers_grow_in_powers_of_two() {
        assert_eq!(mesh_capacity(0), MIN_MESH_BYTES);
        assert_eq!(mesh_capacity(MIN_MESH_BYTES + 1), 2 * MIN_MESH_BYTES);
    }

    #[test]
    fn color_images_upload_as_packed_rgba() {
        let image = ImageData::Color(Arc::new(egui::ColorImage::new([2, 1], Color32::RED)));
        assert_eq!(rgba_bytes(&image), vec![255, 0, 0, 255, 255, 0, 0, 255]);
    }
}
