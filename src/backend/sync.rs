// Synchronization primitives
//
// One set per frame slot. The fence is the only host-side guard on a slot's
// command buffers; the semaphores order acquire -> render -> present on the GPU.

use anyhow::Result;
use ash::vk;

/// Frame synchronization - one per frame slot
pub struct FrameSync {
    pub image_acquired: vk::Semaphore,
    pub render_complete: vk::Semaphore,
    pub fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &ash::Device) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        // Start signaled so the first wait on every slot returns immediately
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            Ok(Self {
                image_acquired: device.create_semaphore(&semaphore_info, None)?,
                render_complete: device.create_semaphore(&semaphore_info, None)?,
                fence: device.create_fence(&fence_info, None)?,
            })
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_acquired, None);
            device.destroy_semaphore(self.render_complete, None);
            device.destroy_fence(self.fence, None);
        }
    }
}
