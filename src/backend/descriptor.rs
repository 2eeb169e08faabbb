// Descriptor set for the scene
//
// A single set serves every instance: binding 0 is a dynamic uniform buffer
// indexed per draw through its dynamic offset, binding 1 the sampled texture.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::buffer::GpuBuffer;
use super::texture::Texture;
use super::VulkanDevice;
use crate::scene::UniformBufferObject;

pub struct SceneDescriptors {
    pub layout: vk::DescriptorSetLayout,
    pub set: vk::DescriptorSet,
    pool: vk::DescriptorPool,
    device: Arc<VulkanDevice>,
}

impl SceneDescriptors {
    pub fn new(device: &Arc<VulkanDevice>, uniforms: &GpuBuffer, texture: &Texture) -> Result<Self> {
        let bindings = [
            vk::DescriptorSetLayoutBinding::default()
                .binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::VERTEX),
            vk::DescriptorSetLayoutBinding::default()
                .binding(1)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT),
        ];
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let layout = unsafe { device.device.create_descriptor_set_layout(&layout_info, None) }
            .context("Failed to create descriptor set layout")?;

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                descriptor_count: 1,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: 1,
            },
        ];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(1);
        let pool = match unsafe { device.device.create_descriptor_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.device.destroy_descriptor_set_layout(layout, None) };
                return Err(e).context("Failed to create descriptor pool");
            }
        };

        // Drop owns the layout and pool from here
        let mut this = Self {
            layout,
            set: vk::DescriptorSet::null(),
            pool,
            device: device.clone(),
        };

        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        this.set = unsafe { device.device.allocate_descriptor_sets(&alloc_info) }
            .context("Failed to allocate descriptor set")?[0];

        let buffer_info = [vk::DescriptorBufferInfo {
            buffer: uniforms.buffer,
            offset: 0,
            range: std::mem::size_of::<UniformBufferObject>() as vk::DeviceSize,
        }];
        let image_info = [vk::DescriptorImageInfo {
            sampler: texture.sampler,
            image_view: texture.image.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];
        let writes = [
            vk::WriteDescriptorSet::default()
                .dst_set(this.set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
                .buffer_info(&buffer_info),
            vk::WriteDescriptorSet::default()
                .dst_set(this.set)
                .dst_binding(1)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(&image_info),
        ];
        unsafe { device.device.update_descriptor_sets(&writes, &[]) };

        Ok(this)
    }
}

impl Drop for SceneDescriptors {
    fn drop(&mut self) {
        unsafe {
            // Destroying the pool frees the set
            self.device.device.destroy_descriptor_pool(self.pool, None);
            self.device
                .device
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}
