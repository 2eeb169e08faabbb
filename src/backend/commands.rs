// Command pools and buffers
//
// One pool per (frame slot, worker), each owning exactly one buffer. Worker 0
// holds the slot's primary buffer; workers 1.. hold the secondary buffers the
// recording fan-out writes into. Pools of a slot are reset together right
// after that slot's fence wait, so no pool is ever reset while in flight.

use anyhow::{Context, Result};
use ash::vk;

use crate::frame::SlotGrid;

pub struct CommandPools {
    pools: SlotGrid<vk::CommandPool>,
    buffers: SlotGrid<vk::CommandBuffer>,
}

impl CommandPools {
    /// `workers` includes the primary column.
    pub fn new(device: &ash::Device, queue_family: u32, slots: usize, workers: usize) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default().queue_family_index(queue_family);

        let mut created = Vec::with_capacity(slots * workers);
        let pools = SlotGrid::try_from_fn(slots, workers, |_, _| {
            let pool = unsafe { device.create_command_pool(&pool_info, None) }?;
            created.push(pool);
            Ok::<_, vk::Result>(pool)
        });
        let pools = match pools {
            Ok(pools) => pools,
            Err(e) => {
                for pool in created {
                    unsafe { device.destroy_command_pool(pool, None) };
                }
                return Err(e).context("Failed to create command pool");
            }
        };

        let buffers = SlotGrid::try_from_fn(slots, workers, |slot, worker| {
            let level = if worker == 0 {
                vk::CommandBufferLevel::PRIMARY
            } else {
                vk::CommandBufferLevel::SECONDARY
            };
            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(pools[(slot, worker)])
                .level(level)
                .command_buffer_count(1);
            unsafe { device.allocate_command_buffers(&alloc_info) }.map(|buffers| buffers[0])
        });

        match buffers {
            Ok(buffers) => {
                log::debug!("Created {} x {} command pools", slots, workers);
                Ok(Self { pools, buffers })
            }
            Err(e) => {
                // Destroying a pool frees its buffers
                for &pool in pools.iter() {
                    unsafe { device.destroy_command_pool(pool, None) };
                }
                Err(e).context("Failed to allocate command buffers")
            }
        }
    }

    pub fn primary(&self, slot: usize) -> vk::CommandBuffer {
        self.buffers[(slot, 0)]
    }

    /// Secondary buffers of `slot`, one per recording segment.
    pub fn secondaries(&self, slot: usize) -> &[vk::CommandBuffer] {
        &self.buffers.row(slot)[1..]
    }

    /// Reset every pool belonging to `slot`. The slot's fence must have been waited on.
    pub fn reset_slot(&self, device: &ash::Device, slot: usize) -> Result<()> {
        for &pool in self.pools.row(slot) {
            unsafe { device.reset_command_pool(pool, vk::CommandPoolResetFlags::empty()) }
                .context("Failed to reset command pool")?;
        }
        Ok(())
    }

    pub fn destroy(&self, device: &ash::Device) {
        for &pool in self.pools.iter() {
            unsafe { device.destroy_command_pool(pool, None) };
        }
    }
}
