// Buffer utilities for vertex, index, uniform and staging buffers
//
// Memory comes from gpu-allocator. Host-visible buffers stay persistently
// mapped; device-local buffers are filled through a staging copy.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::VulkanDevice;

pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl GpuBuffer {
    pub fn new(
        device: &Arc<VulkanDevice>,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .with_context(|| format!("Failed to create buffer '{}'", name))?;
        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator.lock().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e).with_context(|| format!("Failed to allocate memory for '{}'", name));
            }
        };

        let (memory, offset) = (unsafe { allocation.memory() }, allocation.offset());
        // From here on Drop releases both the buffer and its memory
        let this = Self {
            buffer,
            size,
            allocation: Some(allocation),
            device: device.clone(),
        };
        unsafe { device.device.bind_buffer_memory(buffer, memory, offset) }
            .with_context(|| format!("Failed to bind memory for '{}'", name))?;

        Ok(this)
    }

    /// Host-visible buffer initialised with `bytes`.
    pub fn with_data(
        device: &Arc<VulkanDevice>,
        name: &str,
        usage: vk::BufferUsageFlags,
        bytes: &[u8],
    ) -> Result<Self> {
        let mut buffer = Self::new(device, name, bytes.len() as vk::DeviceSize, usage, MemoryLocation::CpuToGpu)?;
        buffer.write(0, bytes)?;
        Ok(buffer)
    }

    /// Device-local buffer filled through a staging copy.
    pub fn device_local(
        device: &Arc<VulkanDevice>,
        name: &str,
        usage: vk::BufferUsageFlags,
        bytes: &[u8],
    ) -> Result<Self> {
        let staging = Self::with_data(device, "staging", vk::BufferUsageFlags::TRANSFER_SRC, bytes)?;
        let buffer = Self::new(
            device,
            name,
            staging.size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
        )?;

        device.one_time_submit(|cmd| unsafe {
            let region = vk::BufferCopy::default().size(staging.size);
            device.device.cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, &[region]);
        })?;

        Ok(buffer)
    }

    /// Copy `bytes` into the mapped memory at `offset`.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let mapped = self
            .allocation
            .as_mut()
            .and_then(|a| a.mapped_slice_mut())
            .context("Buffer is not host visible")?;
        let end = offset + bytes.len();
        if end > mapped.len() {
            anyhow::bail!("write of {} bytes at {} overflows a {} byte buffer", bytes.len(), offset, mapped.len());
        }
        mapped[offset..end].copy_from_slice(bytes);
        Ok(())
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_buffer(self.buffer, None) };
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator.lock().free(allocation) {
                log::error!("Failed to free buffer memory: {}", e);
            }
        }
    }
}
