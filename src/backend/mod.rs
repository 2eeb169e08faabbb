// Backend module - Vulkan implementation of the frame core's FrameBackend
//
// Device-level objects live in `VulkanDevice` and `VulkanBackend`; everything
// that is rebuilt with the swapchain lives in `FrameResources`.

pub mod buffer;
pub mod commands;
pub mod descriptor;
pub mod device;
pub mod gui;
pub mod pipeline;
pub mod record;
pub mod renderer;
pub mod resources;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod texture;

pub use device::{DeviceOptions, VulkanDevice};
pub use renderer::{BackendSettings, VulkanBackend};
pub use resources::FrameResources;
pub use surface::SurfaceFactory;
